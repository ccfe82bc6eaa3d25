//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "consent_protocol",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1: consent protocol tables
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Patients (Identity Store)
-- =======================================================================
DEFINE TABLE patient SCHEMAFULL;
DEFINE FIELD prn ON TABLE patient TYPE string;
DEFINE FIELD full_name ON TABLE patient TYPE string;
DEFINE FIELD phone ON TABLE patient TYPE option<string>;
DEFINE FIELD created_at ON TABLE patient TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_patient_prn ON TABLE patient COLUMNS prn UNIQUE;

-- =======================================================================
-- Consent requests
-- =======================================================================
DEFINE TABLE consent_request SCHEMAFULL;
DEFINE FIELD patient_prn ON TABLE consent_request TYPE string;
DEFINE FIELD requested_by ON TABLE consent_request TYPE string;
DEFINE FIELD state ON TABLE consent_request TYPE string \
    ASSERT $value IN ['Pending', 'Approved', 'Denied', 'Expired'];
DEFINE FIELD otp_hash ON TABLE consent_request TYPE string;
DEFINE FIELD otp_attempts ON TABLE consent_request TYPE int DEFAULT 0;
DEFINE FIELD resolved_via ON TABLE consent_request TYPE option<string> \
    ASSERT $value = NONE OR $value IN ['Patient', 'Otp', 'System'];
DEFINE FIELD resolved_at ON TABLE consent_request TYPE option<datetime>;
DEFINE FIELD token_issued_at ON TABLE consent_request TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE consent_request TYPE datetime;
DEFINE FIELD expires_at ON TABLE consent_request TYPE datetime;
DEFINE INDEX idx_consent_request_state ON TABLE consent_request \
    COLUMNS state, expires_at;
DEFINE INDEX idx_consent_request_prn ON TABLE consent_request \
    COLUMNS patient_prn;

-- =======================================================================
-- Access tokens (one per approved consent request)
-- =======================================================================
DEFINE TABLE access_token SCHEMAFULL;
DEFINE FIELD request_id ON TABLE access_token TYPE string;
DEFINE FIELD patient_prn ON TABLE access_token TYPE string;
DEFINE FIELD requested_by ON TABLE access_token TYPE string;
DEFINE FIELD token_hash ON TABLE access_token TYPE string;
DEFINE FIELD token_ciphertext ON TABLE access_token TYPE string;
DEFINE FIELD consumed ON TABLE access_token TYPE bool DEFAULT false;
DEFINE FIELD issued_at ON TABLE access_token TYPE datetime;
DEFINE FIELD expires_at ON TABLE access_token TYPE datetime;
DEFINE INDEX idx_access_token_request ON TABLE access_token \
    COLUMNS request_id UNIQUE;
DEFINE INDEX idx_access_token_hash ON TABLE access_token \
    COLUMNS token_hash UNIQUE;

-- =======================================================================
-- Prescriptions (read-only to the consent protocol)
-- =======================================================================
DEFINE TABLE prescription SCHEMAFULL;
DEFINE FIELD patient_prn ON TABLE prescription TYPE string;
DEFINE FIELD prescriber ON TABLE prescription TYPE string;
DEFINE FIELD details ON TABLE prescription TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD prescribed_at ON TABLE prescription TYPE datetime;
DEFINE INDEX idx_prescription_patient ON TABLE prescription \
    COLUMNS patient_prn, prescribed_at;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// The `_migration` table is created on first use; every migration
/// newer than the highest recorded version is applied in order and
/// then recorded.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let applied = current_version(db).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "v{} '{}' failed: {e}",
                migration.version, migration.name
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "could not record v{}: {e}",
                    migration.version
                ))
            })?;
    }

    Ok(())
}

async fn current_version<C: Connection>(db: &Surreal<C>) -> Result<u32, DbError> {
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    Ok(records.first().map(|m| m.version).unwrap_or(0))
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
