use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("CSV read/write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed identifier: {0}")]
    MalformedId(String),

    #[error("Crosswalk resolution failed for source {geoid} (vintage {vintage}): {reason}")]
    Crosswalk {
        geoid: String,
        vintage: u16,
        reason: String,
    },

    #[error("Duplicate {table} key: {key} appears {count} times")]
    DuplicateKey {
        table: &'static str,
        key: String,
        count: usize,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
