//! Port traits the domain depends on. Concrete implementations live in
//! [`crate::adapters`].

pub mod config_port;
pub mod sink_port;
pub mod source_port;
