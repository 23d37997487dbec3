//! Application state for the gateway API

use std::time::Instant;

use iota_gateway::Gateway;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    started_at: Instant,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was created
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
