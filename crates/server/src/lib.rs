//! Public HTTP surface of botsense: event collection, the JS execution
//! beacon, request evaluation and session teardown.

pub mod config;
pub mod context;
pub mod service;

pub use config::LoadedConfig;
pub use context::RequestContext;
pub use service::{build_router, ApiError, AppHandle, BotsenseService};
