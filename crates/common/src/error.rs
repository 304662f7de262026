use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotsenseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rate limit exceeded for key: {key} (retry after {retry_after_secs}s)")]
    RateLimited { key: String, retry_after_secs: u64 },

    #[error("invalid or expired beacon token")]
    InvalidBeacon,
}

pub type BotsenseResult<T> = Result<T, BotsenseError>;
