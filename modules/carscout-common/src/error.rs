use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarScoutError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scrape error: {0}")]
    Scrape(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("LLM transport error: {0}")]
    Llm(String),

    #[error("Messaging transport error: {0}")]
    Messaging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stage deadline exceeded after {0}s")]
    DeadlineExceeded(u64),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
