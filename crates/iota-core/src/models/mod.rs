//! Data models for things, devices and their attributes

mod attribute;
mod command;
mod entity;

pub use attribute::*;
pub use command::*;
pub use entity::*;
