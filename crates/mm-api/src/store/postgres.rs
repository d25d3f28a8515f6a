//! PostgreSQL session store.
//!
//! Each transition is one conditional statement in
//! [`crate::db::middleman_requests`]. When the statement matches no row the
//! current record is read back and the same transition is replayed on the
//! aggregate to name the reason (`AlreadyResolved`, `NotAwaiting`, ...).
//! The replay never writes.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use mm_core::{PartyId, RequestId, ThreadRef, TradeId};
use mm_state::{MergeOutcome, MiddlemanRequest, RequestStatus, TransitionError};

use super::{lost_update, SessionStore, StoreError};
use crate::db::middleman_requests::{self as sql, MiddlemanRequestRow};

/// Attempts of the merge / insert / read sequence before giving up.
const MAX_MERGE_ATTEMPTS: usize = 3;

/// Session store backed by the `middleman_requests` table.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(row: MiddlemanRequestRow) -> Result<MiddlemanRequest, StoreError> {
        row.into_record().map_err(|reason| {
            tracing::error!(%reason, "undecodable middleman_requests row");
            StoreError::Corrupt(reason)
        })
    }

    fn decode_opt(row: Option<MiddlemanRequestRow>) -> Result<Option<MiddlemanRequest>, StoreError> {
        row.map(Self::decode).transpose()
    }

    async fn require(&self, id: RequestId) -> Result<MiddlemanRequest, StoreError> {
        Self::decode_opt(sql::get_by_id(&self.pool, *id.as_uuid()).await?)?.ok_or(StoreError::NotFound(id))
    }

    /// Name the reason a conditional update matched nothing by replaying
    /// `transition` on the current record.
    async fn explain_rejection(
        &self,
        id: RequestId,
        transition: impl FnOnce(&mut MiddlemanRequest) -> Result<(), TransitionError>,
    ) -> StoreError {
        match self.require(id).await {
            Ok(mut current) => match transition(&mut current) {
                Err(e) => e.into(),
                Ok(()) => lost_update(id),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_or_merge(
        &self,
        trade_id: &TradeId,
        requester: &PartyId,
        counterparty: Option<&PartyId>,
    ) -> Result<(MiddlemanRequest, MergeOutcome), StoreError> {
        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let now = Utc::now();
            let candidate = MiddlemanRequest::new_trade_request(
                trade_id.clone(),
                requester.clone(),
                counterparty.cloned(),
                now,
            )?;

            if let Some(row) = sql::merge_open_trade(&self.pool, trade_id, requester, counterparty, now).await? {
                return Ok((Self::decode(row)?, MergeOutcome::Merged));
            }

            if let Some(row) = sql::insert_open_trade(&self.pool, &candidate).await? {
                return Ok((Self::decode(row)?, MergeOutcome::Created));
            }

            // The trade has an open session that would not merge. Decide
            // whether the request is a repeat or a conflict.
            match Self::decode_opt(sql::get_open_for_trade(&self.pool, trade_id).await?)? {
                Some(open) => {
                    let mut replay = open.clone();
                    match replay.merge_request(requester, counterparty, now)? {
                        MergeOutcome::Unchanged => return Ok((open, MergeOutcome::Unchanged)),
                        // The session changed between the statements.
                        MergeOutcome::Merged | MergeOutcome::Created => {}
                    }
                }
                // Resolved between the insert and the read.
                None => {}
            }
            tracing::debug!(%trade_id, attempt, "create_or_merge raced a concurrent writer, retrying");
        }

        Err(StoreError::Transition(TransitionError::Conflict {
            reason: format!("trade {trade_id} is being updated concurrently; retry"),
        }))
    }

    async fn create_direct(&self, requester: &PartyId, counterparty: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let record = MiddlemanRequest::new_direct(requester.clone(), counterparty.clone(), Utc::now())?;
        sql::insert(&self.pool, &record).await?;
        Ok(record)
    }

    async fn confirm_direct(&self, id: RequestId, party: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        match sql::confirm_direct(&self.pool, *id.as_uuid(), party, now).await? {
            Some(row) => Self::decode(row),
            None => Err(self.explain_rejection(id, |r| r.confirm_direct(party, now)).await),
        }
    }

    async fn set_party_accepted(&self, id: RequestId, party: &PartyId) -> Result<(MiddlemanRequest, bool), StoreError> {
        let now = Utc::now();
        if let Some(row) = sql::set_party_accepted(&self.pool, *id.as_uuid(), party, now).await? {
            return Ok((Self::decode(row)?, true));
        }
        let current = self.require(id).await?;
        let mut replay = current.clone();
        match replay.accept(party, now)? {
            // Flag already set: a duplicate, not a failure.
            false => Ok((current, false)),
            true => Err(lost_update(id)),
        }
    }

    async fn mark_resolved(&self, id: RequestId, status: RequestStatus) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        if !matches!(status, RequestStatus::Ready | RequestStatus::Declined) {
            let current = self.require(id).await?;
            return Err(TransitionError::InvalidTransition {
                from: current.status,
                to: status,
            }
            .into());
        }
        match sql::mark_resolved(&self.pool, *id.as_uuid(), status, now).await? {
            Some(row) => Self::decode(row),
            None => Err(self.explain_rejection(id, |r| r.resolve(status, now)).await),
        }
    }

    async fn attach_thread(&self, id: RequestId, thread: &ThreadRef) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        match sql::attach_thread(&self.pool, *id.as_uuid(), thread, now).await? {
            Some(row) => Self::decode(row),
            None => Err(self.explain_rejection(id, |r| r.attach_thread(thread.clone(), now)).await),
        }
    }

    async fn mark_completed(&self, id: RequestId, middleman: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        match sql::mark_completed(&self.pool, *id.as_uuid(), middleman, now).await? {
            Some(row) => Self::decode(row),
            None => Err(self.explain_rejection(id, |r| r.complete(middleman.clone(), now)).await),
        }
    }

    async fn get(&self, id: RequestId) -> Result<Option<MiddlemanRequest>, StoreError> {
        Self::decode_opt(sql::get_by_id(&self.pool, *id.as_uuid()).await?)
    }

    async fn latest_for_trade(&self, trade_id: &TradeId) -> Result<Option<MiddlemanRequest>, StoreError> {
        Self::decode_opt(sql::latest_for_trade(&self.pool, trade_id).await?)
    }

    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<MiddlemanRequest>, StoreError> {
        Self::decode_opt(sql::find_by_thread(&self.pool, thread).await?)
    }

    async fn list_awaiting(&self) -> Result<Vec<MiddlemanRequest>, StoreError> {
        sql::list_awaiting(&self.pool)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sql::ping(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
