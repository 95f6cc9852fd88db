//! Common utilities and client wrappers shared by the risk gateway services

pub mod clients;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event_bus;

pub use clients::*;
pub use config::*;
pub use constants::*;
pub use errors::*;
pub use event_bus::*;
