use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Source error: {message}")]
    Source { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Failed to persist batch of {batch_size} records to '{table}': {message}")]
    Persistence {
        table: String,
        batch_size: usize,
        message: String,
    },

    #[error("Persistence sink is closed")]
    SinkClosed,

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Database {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "db")]
impl From<libsql::Error> for CatalogError {
    fn from(err: libsql::Error) -> Self {
        CatalogError::Database {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
