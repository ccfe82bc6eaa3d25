//! SurrealDB implementation of [`ConsentRequestRepository`].
//!
//! Every state change is a single conditional `UPDATE ... WHERE state =
//! 'Pending'` statement, so the database performs the check-and-set and
//! a request can leave `Pending` at most once no matter which channel
//! gets there first.

use chrono::{DateTime, Utc};
use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::models::consent::{
    ConsentRequest, ConsentState, CreateConsentRequest, ResolutionChannel,
};
use rxconsent_core::repository::ConsentRequestRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct ConsentRequestRow {
    patient_prn: String,
    requested_by: String,
    state: String,
    otp_hash: String,
    otp_attempts: u32,
    resolved_via: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    token_issued_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

fn parse_state(s: &str) -> Result<ConsentState, DbError> {
    ConsentState::parse(s).ok_or_else(|| DbError::Corrupt {
        table: "consent_request",
        message: format!("unknown state: {s}"),
    })
}

fn parse_channel(s: Option<&str>) -> Result<Option<ResolutionChannel>, DbError> {
    s.map(|v| {
        ResolutionChannel::parse(v).ok_or_else(|| DbError::Corrupt {
            table: "consent_request",
            message: format!("unknown resolution channel: {v}"),
        })
    })
    .transpose()
}

impl ConsentRequestRow {
    fn into_request(self, id: Uuid) -> Result<ConsentRequest, DbError> {
        Ok(ConsentRequest {
            id,
            state: parse_state(&self.state)?,
            resolved_via: parse_channel(self.resolved_via.as_deref())?,
            patient_prn: self.patient_prn,
            requested_by: self.requested_by,
            otp_hash: self.otp_hash,
            otp_attempts: self.otp_attempts,
            resolved_at: self.resolved_at,
            token_issued_at: self.token_issued_at,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// SurrealDB implementation of the consent request repository.
#[derive(Clone)]
pub struct SurrealConsentRequestRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealConsentRequestRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ConsentRequestRepository for SurrealConsentRequestRepository<C> {
    async fn create(&self, input: CreateConsentRequest) -> RxResult<ConsentRequest> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('consent_request', $id) SET \
                 patient_prn = $patient_prn, \
                 requested_by = $requested_by, \
                 state = 'Pending', \
                 otp_hash = $otp_hash, \
                 otp_attempts = 0, \
                 resolved_via = NONE, \
                 resolved_at = NONE, \
                 token_issued_at = NONE, \
                 created_at = $created_at, \
                 expires_at = $expires_at",
            )
            .bind(("id", id_str.clone()))
            .bind(("patient_prn", input.patient_prn))
            .bind(("requested_by", input.requested_by))
            .bind(("otp_hash", input.otp_hash))
            .bind(("created_at", input.created_at))
            .bind(("expires_at", input.expires_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "consent_request".into(),
            id: id_str,
        })?;

        Ok(row.into_request(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> RxResult<ConsentRequest> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('consent_request', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "consent_request".into(),
            id: id_str,
        })?;

        Ok(row.into_request(id)?)
    }

    async fn record_otp_attempt(&self, id: Uuid) -> RxResult<Option<u32>> {
        let result = self
            .db
            .query(
                "UPDATE type::record('consent_request', $id) \
                 SET otp_attempts += 1 \
                 WHERE state = 'Pending'",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().next().map(|row| row.otp_attempts))
    }

    async fn resolve(
        &self,
        id: Uuid,
        to: ConsentState,
        via: ResolutionChannel,
    ) -> RxResult<Option<ConsentRequest>> {
        if !ConsentState::Pending.can_transition_to(to) {
            return Err(RxError::Validation {
                message: format!("cannot resolve a consent request to {}", to.as_str()),
            });
        }

        let result = self
            .db
            .query(
                "UPDATE type::record('consent_request', $id) SET \
                 state = $state, \
                 resolved_via = $via, \
                 resolved_at = $resolved_at \
                 WHERE state = 'Pending'",
            )
            .bind(("id", id.to_string()))
            .bind(("state", to.as_str().to_string()))
            .bind(("via", via.as_str().to_string()))
            .bind(("resolved_at", Utc::now()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.into_request(id)?)),
            None => Ok(None),
        }
    }

    async fn record_token_issued(&self, id: Uuid, issued_at: DateTime<Utc>) -> RxResult<bool> {
        let result = self
            .db
            .query(
                "UPDATE type::record('consent_request', $id) \
                 SET token_issued_at = $issued_at \
                 WHERE state = 'Approved' AND token_issued_at = NONE",
            )
            .bind(("id", id.to_string()))
            .bind(("issued_at", issued_at))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> RxResult<u64> {
        let result = self
            .db
            .query(
                "UPDATE consent_request SET \
                 state = 'Expired', \
                 resolved_via = 'System', \
                 resolved_at = $now \
                 WHERE state = 'Pending' AND expires_at <= $now",
            )
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<ConsentRequestRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }
}
