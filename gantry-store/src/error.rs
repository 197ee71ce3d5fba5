//! Storage layer errors

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found
    #[error("Record not found: {id}")]
    NotFound {
        /// Id of the missing record
        id: String,
    },

    /// A record with the same id already exists
    #[error("Duplicate record: {id}")]
    Duplicate {
        /// Conflicting id
        id: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a duplicate error
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::Duplicate { id: id.into() }
    }

    /// Whether this error is a duplicate-key violation
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound { id: "unknown".to_string() },
            sqlx::Error::Database(db_err) => {
                // 23505 = unique constraint violation
                if db_err.code().map(|c| c == "23505").unwrap_or(false) {
                    StoreError::Duplicate { id: "unknown".to_string() }
                } else {
                    StoreError::Database(db_err.to_string())
                }
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}
