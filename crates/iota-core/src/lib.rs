//! iota-core - Core traits and types for the KNoT thing gateway
//!
//! This crate holds the entity model shared by every layer (things,
//! devices, typed attributes, command lifecycle), the error type, and the
//! two seams to external collaborators: the [`EntityStore`] document store
//! and the [`ContextBroker`] northbound service.

pub mod broker;
pub mod error;
pub mod models;
pub mod naming;
pub mod protocol;
pub mod store;

pub use broker::{BrokerRouting, ContextBroker};
pub use error::{CascadeStep, GatewayError, GatewayResult};
pub use models::*;
pub use store::{EntityStore, MemoryStore};
