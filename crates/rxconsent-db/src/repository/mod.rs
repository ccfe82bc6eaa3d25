//! SurrealDB repository implementations.

mod access_token;
mod consent_request;
mod patient;
mod prescription;

pub use access_token::SurrealAccessTokenRepository;
pub use consent_request::SurrealConsentRequestRepository;
pub use patient::SurrealPatientRepository;
pub use prescription::SurrealPrescriptionRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

/// UUIDs are stored as strings; a value that does not parse means the
/// row was written by something other than these repositories.
pub(crate) fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Corrupt {
        table,
        message: format!("invalid UUID {value:?}: {e}"),
    })
}
