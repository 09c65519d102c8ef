use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid credential")]
    Unauthorized,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Session '{session_id}' changed concurrently {attempts} times; giving up")]
    Conflict { session_id: String, attempts: u32 },

    #[error("Invalid matching rule: {0}")]
    Rule(#[from] regex::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
