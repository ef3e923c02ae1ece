//! Error type shared by the stock-out modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StockError {
    #[error("{context}: {source}")]
    Db {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration v{version}: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Attach a short context label to rusqlite results.
pub trait DbContext<T> {
    fn db_ctx(self, context: &'static str) -> Result<T, StockError>;
}

impl<T> DbContext<T> for Result<T, rusqlite::Error> {
    fn db_ctx(self, context: &'static str) -> Result<T, StockError> {
        self.map_err(|source| StockError::Db { context, source })
    }
}

pub type StockResult<T> = Result<T, StockError>;
