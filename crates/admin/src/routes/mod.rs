pub mod config;
pub mod decisions;
pub mod health;
pub mod metrics;
pub mod stats;
