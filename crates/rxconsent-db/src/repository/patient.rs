//! SurrealDB implementation of [`PatientRepository`].

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::patient::{CreatePatient, Patient};
use rxconsent_core::repository::PatientRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::parse_uuid;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct PatientRow {
    prn: String,
    full_name: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct PatientRowWithId {
    record_id: String,
    prn: String,
    full_name: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl PatientRow {
    fn into_patient(self, id: Uuid) -> Patient {
        Patient {
            id,
            prn: self.prn,
            full_name: self.full_name,
            phone: self.phone,
            created_at: self.created_at,
        }
    }
}

impl PatientRowWithId {
    fn try_into_patient(self) -> Result<Patient, DbError> {
        Ok(Patient {
            id: parse_uuid("patient", &self.record_id)?,
            prn: self.prn,
            full_name: self.full_name,
            phone: self.phone,
            created_at: self.created_at,
        })
    }
}

/// SurrealDB-backed Identity Store.
#[derive(Clone)]
pub struct SurrealPatientRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPatientRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PatientRepository for SurrealPatientRepository<C> {
    async fn create(&self, input: CreatePatient) -> RxResult<Patient> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('patient', $id) SET \
                 prn = $prn, full_name = $full_name, phone = $phone",
            )
            .bind(("id", id_str.clone()))
            .bind(("prn", input.prn))
            .bind(("full_name", input.full_name))
            .bind(("phone", input.phone))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<PatientRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "patient".into(),
            id: id_str,
        })?;

        Ok(row.into_patient(id))
    }

    async fn get_by_prn(&self, prn: &str) -> RxResult<Patient> {
        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM patient WHERE prn = $prn")
            .bind(("prn", prn.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PatientRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "patient".into(),
            id: format!("prn={prn}"),
        })?;

        Ok(row.try_into_patient()?)
    }
}
