//! SurrealDB implementation of [`PrescriptionRepository`].
//!
//! Line items and notes are kept together in a flexible `details`
//! object; only the columns the consent flow filters on are typed.

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::prescription::{CreatePrescription, Prescription, PrescriptionItem};
use rxconsent_core::repository::PrescriptionRepository;
use serde::{Deserialize, Serialize};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::parse_uuid;
use crate::error::DbError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Details {
    #[serde(default)]
    items: Vec<PrescriptionItem>,
    notes: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct PrescriptionRow {
    patient_prn: String,
    prescriber: String,
    details: serde_json::Value,
    prescribed_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct PrescriptionRowWithId {
    record_id: String,
    patient_prn: String,
    prescriber: String,
    details: serde_json::Value,
    prescribed_at: DateTime<Utc>,
}

fn parse_details(value: serde_json::Value) -> Result<Details, DbError> {
    serde_json::from_value(value).map_err(|e| DbError::Corrupt {
        table: "prescription",
        message: format!("details: {e}"),
    })
}

impl PrescriptionRow {
    fn into_prescription(self, id: Uuid) -> Result<Prescription, DbError> {
        let details = parse_details(self.details)?;
        Ok(Prescription {
            id,
            patient_prn: self.patient_prn,
            prescriber: self.prescriber,
            items: details.items,
            notes: details.notes,
            prescribed_at: self.prescribed_at,
        })
    }
}

impl PrescriptionRowWithId {
    fn try_into_prescription(self) -> Result<Prescription, DbError> {
        let id = parse_uuid("prescription", &self.record_id)?;
        PrescriptionRow {
            patient_prn: self.patient_prn,
            prescriber: self.prescriber,
            details: self.details,
            prescribed_at: self.prescribed_at,
        }
        .into_prescription(id)
    }
}

/// SurrealDB implementation of the prescription repository.
#[derive(Clone)]
pub struct SurrealPrescriptionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPrescriptionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PrescriptionRepository for SurrealPrescriptionRepository<C> {
    async fn create(&self, input: CreatePrescription) -> RxResult<Prescription> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let details = serde_json::to_value(Details {
            items: input.items,
            notes: input.notes,
        })
        .map_err(|e| DbError::Query(format!("details: {e}")))?;

        let result = self
            .db
            .query(
                "CREATE type::record('prescription', $id) SET \
                 patient_prn = $patient_prn, \
                 prescriber = $prescriber, \
                 details = $details, \
                 prescribed_at = $prescribed_at",
            )
            .bind(("id", id_str.clone()))
            .bind(("patient_prn", input.patient_prn))
            .bind(("prescriber", input.prescriber))
            .bind(("details", details))
            .bind(("prescribed_at", input.prescribed_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<PrescriptionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "prescription".into(),
            id: id_str,
        })?;

        Ok(row.into_prescription(id)?)
    }

    async fn get_latest_for_patient(&self, prn: &str) -> RxResult<Prescription> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM prescription \
                 WHERE patient_prn = $prn \
                 ORDER BY prescribed_at DESC LIMIT 1",
            )
            .bind(("prn", prn.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PrescriptionRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "prescription".into(),
            id: format!("prn={prn}"),
        })?;

        Ok(row.try_into_prescription()?)
    }
}
