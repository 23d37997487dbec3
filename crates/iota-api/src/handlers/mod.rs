//! HTTP and WebSocket handlers

pub mod health;
pub mod northbound;
pub mod session;
