//! Shared configuration and error types for botsense.

pub mod config;
pub mod error;

pub use config::*;
pub use error::{BotsenseError, BotsenseResult};
