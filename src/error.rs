use thiserror::Error;

/// Failures that end a harvest run. Page-state rejections are not errors; they come back
/// as an outcome.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("`query` is required")]
    MissingQuery,

    #[error("attempt timed out after {secs}s")]
    AttemptTimeout { secs: u64 },

    #[error("all {attempts} attempts failed; last error: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },
}
