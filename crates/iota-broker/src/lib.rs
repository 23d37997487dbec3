//! iota-broker - NGSIv2 context broker client
//!
//! Implements [`iota_core::ContextBroker`] over HTTP so the gateway can push
//! measures and properties, read entities back and retract removed ones.

mod client;

pub use client::{HttpContextBroker, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};
