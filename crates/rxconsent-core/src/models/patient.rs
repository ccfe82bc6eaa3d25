//! Patient (Identity Store) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Patient {
    pub id: Uuid,
    /// Patient Registration Number, unique across the pharmacy.
    pub prn: String,
    pub full_name: String,
    /// Out-of-band address for consent notifications.
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatient {
    pub prn: String,
    pub full_name: String,
    pub phone: Option<String>,
}
