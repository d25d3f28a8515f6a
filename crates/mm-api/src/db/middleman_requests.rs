//! Middleman session persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `middleman_requests`
//! table. Every mutation is one conditional statement returning the updated
//! row, or `None` when its `WHERE` clause matched nothing. The conditions
//! mirror the transition rules of `mm_state::MiddlemanRequest`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mm_core::{PartyId, ThreadRef, TradeId};
use mm_state::{MiddlemanRequest, RequestOrigin, RequestStatus};

/// Column list shared by every `SELECT` and `RETURNING` clause.
const COLUMNS: &str = "id, trade_id, origin, party_a, party_b, party_a_accepted, party_b_accepted, \
     status, thread_ref, middleman_id, created_at, awaiting_since, resolved_at, updated_at";

/// Insert a new session.
pub async fn insert(pool: &PgPool, record: &MiddlemanRequest) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO middleman_requests (id, trade_id, origin, party_a, party_b, party_a_accepted, \
         party_b_accepted, status, thread_ref, middleman_id, created_at, awaiting_since, resolved_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(*record.id.as_uuid())
    .bind(record.trade_id.as_ref().map(TradeId::as_str))
    .bind(record.origin.as_str())
    .bind(record.party_a.as_str())
    .bind(record.party_b.as_ref().map(PartyId::as_str))
    .bind(record.party_a_accepted)
    .bind(record.party_b_accepted)
    .bind(record.status.as_str())
    .bind(record.thread_ref.as_ref().map(ThreadRef::as_str))
    .bind(record.middleman_id.as_ref().map(PartyId::as_str))
    .bind(record.created_at)
    .bind(record.awaiting_since)
    .bind(record.resolved_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a new trade session unless the trade already has an open one.
pub async fn insert_open_trade(pool: &PgPool, record: &MiddlemanRequest) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "INSERT INTO middleman_requests (id, trade_id, origin, party_a, party_b, party_a_accepted, \
         party_b_accepted, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, FALSE, FALSE, 'created', $6, $6)
         ON CONFLICT (trade_id) WHERE resolved_at IS NULL AND trade_id IS NOT NULL DO NOTHING
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(*record.id.as_uuid())
        .bind(record.trade_id.as_ref().map(TradeId::as_str))
        .bind(RequestOrigin::Trade.as_str())
        .bind(record.party_a.as_str())
        .bind(record.party_b.as_ref().map(PartyId::as_str))
        .bind(record.created_at)
        .fetch_optional(pool)
        .await
}

/// Join the counterparty's open half-request for a trade.
///
/// Applies only while the session is `created`, the requester is not the
/// opener, any known counterparty is the requester, and any counterparty the
/// requester names is the opener.
pub async fn merge_open_trade(
    pool: &PgPool,
    trade_id: &TradeId,
    requester: &PartyId,
    counterparty: Option<&PartyId>,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests
         SET party_b = $2, status = 'awaiting_acceptance', awaiting_since = $4, updated_at = $4
         WHERE trade_id = $1
           AND resolved_at IS NULL
           AND status = 'created'
           AND party_a <> $2
           AND (party_b IS NULL OR party_b = $2)
           AND ($3::text IS NULL OR party_a = $3)
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(trade_id.as_str())
        .bind(requester.as_str())
        .bind(counterparty.map(PartyId::as_str))
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// Open (unresolved) session for a trade.
pub async fn get_open_for_trade(pool: &PgPool, trade_id: &TradeId) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM middleman_requests WHERE trade_id = $1 AND resolved_at IS NULL");
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(trade_id.as_str())
        .fetch_optional(pool)
        .await
}

/// `created -> awaiting_acceptance` for a direct session, by its invitee.
pub async fn confirm_direct(
    pool: &PgPool,
    id: Uuid,
    party: &PartyId,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests
         SET status = 'awaiting_acceptance', awaiting_since = $3, updated_at = $3
         WHERE id = $1 AND origin = 'direct' AND party_b = $2
           AND status = 'created' AND resolved_at IS NULL
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .bind(party.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// Set the acceptance flag of `party`. Matches only when the flag is not
/// yet set, so a duplicate acceptance returns `None`.
pub async fn set_party_accepted(
    pool: &PgPool,
    id: Uuid,
    party: &PartyId,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests
         SET party_a_accepted = party_a_accepted OR party_a = $2,
             party_b_accepted = party_b_accepted OR party_b IS NOT DISTINCT FROM $2,
             updated_at = $3
         WHERE id = $1
           AND resolved_at IS NULL
           AND status = 'awaiting_acceptance'
           AND ((party_a = $2 AND NOT party_a_accepted) OR (party_b = $2 AND NOT party_b_accepted))
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .bind(party.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// Resolve an open session. `ready` additionally requires both flags.
pub async fn mark_resolved(
    pool: &PgPool,
    id: Uuid,
    status: RequestStatus,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests
         SET status = $2, resolved_at = $3, updated_at = $3
         WHERE id = $1
           AND resolved_at IS NULL
           AND ($2 <> 'ready' OR (status = 'awaiting_acceptance' AND party_a_accepted AND party_b_accepted))
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// Set the thread reference if none is set.
pub async fn attach_thread(
    pool: &PgPool,
    id: Uuid,
    thread: &ThreadRef,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests SET thread_ref = $2, updated_at = $3
         WHERE id = $1 AND thread_ref IS NULL
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .bind(thread.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// `ready -> completed`.
pub async fn mark_completed(
    pool: &PgPool,
    id: Uuid,
    middleman: &PartyId,
    now: DateTime<Utc>,
) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "UPDATE middleman_requests SET status = 'completed', middleman_id = $2, updated_at = $3
         WHERE id = $1 AND status = 'ready'
         RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .bind(middleman.as_str())
        .bind(now)
        .fetch_optional(pool)
        .await
}

/// Fetch a session by ID.
pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM middleman_requests WHERE id = $1");
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Most recent session for a trade.
pub async fn latest_for_trade(pool: &PgPool, trade_id: &TradeId) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM middleman_requests WHERE trade_id = $1 ORDER BY created_at DESC LIMIT 1"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(trade_id.as_str())
        .fetch_optional(pool)
        .await
}

/// Session owning a coordination thread.
pub async fn find_by_thread(pool: &PgPool, thread: &ThreadRef) -> Result<Option<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM middleman_requests WHERE thread_ref = $1 ORDER BY created_at DESC LIMIT 1"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql)
        .bind(thread.as_str())
        .fetch_optional(pool)
        .await
}

/// Sessions still inside their acceptance window, oldest first.
pub async fn list_awaiting(pool: &PgPool) -> Result<Vec<MiddlemanRequestRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM middleman_requests
         WHERE status = 'awaiting_acceptance' AND resolved_at IS NULL
         ORDER BY created_at"
    );
    sqlx::query_as::<_, MiddlemanRequestRow>(&sql).fetch_all(pool).await
}

/// Connectivity check for readiness probes.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Row type for SQLx mapping.
#[derive(Debug, sqlx::FromRow)]
pub struct MiddlemanRequestRow {
    id: Uuid,
    trade_id: Option<String>,
    origin: String,
    party_a: String,
    party_b: Option<String>,
    party_a_accepted: bool,
    party_b_accepted: bool,
    status: String,
    thread_ref: Option<String>,
    middleman_id: Option<String>,
    created_at: DateTime<Utc>,
    awaiting_since: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl MiddlemanRequestRow {
    /// Decode into the aggregate. A row that fails to decode is an error,
    /// never defaulted.
    pub fn into_record(self) -> Result<MiddlemanRequest, String> {
        let id = self.id;
        let corrupt = |field: &str, reason: String| format!("request {id}: {field}: {reason}");

        Ok(MiddlemanRequest {
            id: mm_core::RequestId::from_uuid(self.id),
            trade_id: self
                .trade_id
                .map(TradeId::new)
                .transpose()
                .map_err(|e| corrupt("trade_id", e.to_string()))?,
            origin: self.origin.parse().map_err(|e| corrupt("origin", e))?,
            party_a: PartyId::new(&self.party_a).map_err(|e| corrupt("party_a", e.to_string()))?,
            party_b: self
                .party_b
                .map(PartyId::new)
                .transpose()
                .map_err(|e| corrupt("party_b", e.to_string()))?,
            party_a_accepted: self.party_a_accepted,
            party_b_accepted: self.party_b_accepted,
            status: self.status.parse().map_err(|e| corrupt("status", e))?,
            thread_ref: self
                .thread_ref
                .map(ThreadRef::new)
                .transpose()
                .map_err(|e| corrupt("thread_ref", e.to_string()))?,
            middleman_id: self
                .middleman_id
                .map(PartyId::new)
                .transpose()
                .map_err(|e| corrupt("middleman_id", e.to_string()))?,
            created_at: self.created_at,
            awaiting_since: self.awaiting_since,
            resolved_at: self.resolved_at,
            updated_at: self.updated_at,
        })
    }
}
