//! SurrealDB implementation of [`AccessTokenRepository`].

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::access_token::{AccessToken, CreateAccessToken};
use rxconsent_core::repository::AccessTokenRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_uuid};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AccessTokenRow {
    request_id: String,
    patient_prn: String,
    requested_by: String,
    token_hash: String,
    token_ciphertext: String,
    consumed: bool,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AccessTokenRowWithId {
    record_id: String,
    request_id: String,
    patient_prn: String,
    requested_by: String,
    token_hash: String,
    token_ciphertext: String,
    consumed: bool,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessTokenRow {
    fn into_token(self, id: Uuid) -> Result<AccessToken, DbError> {
        Ok(AccessToken {
            id,
            request_id: parse_uuid("access_token", &self.request_id)?,
            patient_prn: self.patient_prn,
            requested_by: self.requested_by,
            token_hash: self.token_hash,
            token_ciphertext: self.token_ciphertext,
            consumed: self.consumed,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        })
    }
}

impl AccessTokenRowWithId {
    fn try_into_token(self) -> Result<AccessToken, DbError> {
        let id = parse_uuid("access_token", &self.record_id)?;
        AccessTokenRow {
            request_id: self.request_id,
            patient_prn: self.patient_prn,
            requested_by: self.requested_by,
            token_hash: self.token_hash,
            token_ciphertext: self.token_ciphertext,
            consumed: self.consumed,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
        .into_token(id)
    }
}

/// SurrealDB implementation of the access token repository.
#[derive(Clone)]
pub struct SurrealAccessTokenRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAccessTokenRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AccessTokenRepository for SurrealAccessTokenRepository<C> {
    async fn create(&self, input: CreateAccessToken) -> RxResult<AccessToken> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('access_token', $id) SET \
                 request_id = $request_id, \
                 patient_prn = $patient_prn, \
                 requested_by = $requested_by, \
                 token_hash = $token_hash, \
                 token_ciphertext = $token_ciphertext, \
                 consumed = false, \
                 issued_at = $issued_at, \
                 expires_at = $expires_at",
            )
            .bind(("id", id_str.clone()))
            .bind(("request_id", input.request_id.to_string()))
            .bind(("patient_prn", input.patient_prn))
            .bind(("requested_by", input.requested_by))
            .bind(("token_hash", input.token_hash))
            .bind(("token_ciphertext", input.token_ciphertext))
            .bind(("issued_at", input.issued_at))
            .bind(("expires_at", input.expires_at))
            .await
            .map_err(DbError::from)?;

        // A second token for the same request trips the unique index here.
        let mut result = result
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows: Vec<AccessTokenRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "access_token".into(),
            id: id_str,
        })?;

        Ok(row.into_token(id)?)
    }

    async fn find_by_request(&self, request_id: Uuid) -> RxResult<Option<AccessToken>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM access_token \
                 WHERE request_id = $request_id",
            )
            .bind(("request_id", request_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AccessTokenRowWithId> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_token()?)),
            None => Ok(None),
        }
    }

    async fn get_by_token_hash(&self, token_hash: &str) -> RxResult<AccessToken> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM access_token \
                 WHERE token_hash = $token_hash",
            )
            .bind(("token_hash", token_hash.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AccessTokenRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "access_token".into(),
            id: "token_hash".into(),
        })?;

        Ok(row.try_into_token()?)
    }

    async fn mark_consumed(&self, id: Uuid) -> RxResult<()> {
        self.db
            .query("UPDATE type::record('access_token', $id) SET consumed = true")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> RxResult<u64> {
        // Count expired tokens first, then delete.
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM access_token \
                 WHERE expires_at <= $now GROUP ALL",
            )
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        self.db
            .query("DELETE access_token WHERE expires_at <= $now")
            .bind(("now", now))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(total)
    }
}
