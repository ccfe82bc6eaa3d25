//! Database-specific error types and conversions.

use rxconsent_core::error::RxError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

impl From<DbError> for RxError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => RxError::NotFound { entity, id },
            other => RxError::Database(other.to_string()),
        }
    }
}
