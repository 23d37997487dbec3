//! iota-gateway - KNoT thing gateway
//!
//! Maintains the thing/device hierarchy, replaces a thing's whole subtree
//! when it registers again, dispatches broker commands to devices and fans
//! events out to every connected session.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Gateway                              │
//! │                                                                │
//! │   session request ──▶ SessionHandler ──▶ Reconciler            │
//! │                             │                 │                │
//! │                             ▼                 ▼                │
//! │                      NorthboundAdapter ◀── RegistryGateway     │
//! │                       │          │                │            │
//! │                       ▼          ▼                ▼            │
//! │            EventBroadcaster  CommandExecutor   EntityStore     │
//! │                       │          │                             │
//! └───────────────────────┼──────────┼─────────────────────────────┘
//!                         ▼          ▼
//!                     sessions    device endpoints (UL over HTTP)
//! ```

pub mod broadcast;
pub mod commands;
pub mod config;
mod gateway;
pub mod northbound;
pub mod provision;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod testing;

pub use broadcast::{EventBroadcaster, SessionHandle, SessionInfo, SessionRegistry};
pub use commands::{CommandExecutor, CommandReporter};
pub use config::{GatewayConfig, ServiceGroup};
pub use gateway::Gateway;
pub use northbound::{NorthboundAdapter, PreparedCommand};
pub use reconcile::{CascadeOutcome, Reconciler};
pub use registry::RegistryGateway;
pub use session::SessionHandler;

// Re-export core types for convenience
pub use iota_core::{GatewayError, GatewayResult};
