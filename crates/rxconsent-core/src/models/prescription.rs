//! Prescription domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrescriptionItem {
    pub drug: String,
    pub dosage: String,
    pub quantity: u32,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_prn: String,
    pub prescriber: String,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
    pub prescribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrescription {
    pub patient_prn: String,
    pub prescriber: String,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
    pub prescribed_at: DateTime<Utc>,
}
