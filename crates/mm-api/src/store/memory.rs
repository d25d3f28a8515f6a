//! In-memory session store.
//!
//! Each operation takes the write guard once, applies the aggregate's
//! transition to a copy, and commits the copy only if the transition
//! succeeded and changed something. The guard is never held across an
//! `.await`, so the async trait methods are synchronous underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use mm_core::{PartyId, RequestId, ThreadRef, TradeId};
use mm_state::{MergeOutcome, MiddlemanRequest, RequestStatus};

use super::{SessionStore, StoreError};

/// Session store held entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<RwLock<HashMap<RequestId, MiddlemanRequest>>>,
    mutations: Arc<AtomicU64>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as is. Used to seed state, e.g. sessions that
    /// survived a restart.
    pub fn insert(&self, record: MiddlemanRequest) {
        self.records.write().insert(record.id, record);
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of committed changes since construction.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Apply `f` to a copy of the record and commit it when `f` reports a
    /// change.
    fn update<T>(
        &self,
        id: RequestId,
        f: impl FnOnce(&mut MiddlemanRequest) -> Result<(T, bool), mm_state::TransitionError>,
    ) -> Result<(MiddlemanRequest, T), StoreError> {
        let mut records = self.records.write();
        let current = records.get(&id).ok_or(StoreError::NotFound(id))?;
        let mut next = current.clone();
        let (value, changed) = f(&mut next)?;
        if changed {
            records.insert(id, next.clone());
            self.mutations.fetch_add(1, Ordering::Relaxed);
        }
        Ok((next, value))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_or_merge(
        &self,
        trade_id: &TradeId,
        requester: &PartyId,
        counterparty: Option<&PartyId>,
    ) -> Result<(MiddlemanRequest, MergeOutcome), StoreError> {
        let now = Utc::now();
        let candidate = MiddlemanRequest::new_trade_request(
            trade_id.clone(),
            requester.clone(),
            counterparty.cloned(),
            now,
        )?;

        let mut records = self.records.write();
        let open = records
            .values()
            .find(|r| !r.is_resolved() && r.trade_id.as_ref() == Some(trade_id))
            .cloned();

        match open {
            Some(mut existing) => {
                let outcome = existing.merge_request(requester, counterparty, now)?;
                if outcome == MergeOutcome::Merged {
                    records.insert(existing.id, existing.clone());
                    self.mutations.fetch_add(1, Ordering::Relaxed);
                }
                Ok((existing, outcome))
            }
            None => {
                records.insert(candidate.id, candidate.clone());
                self.mutations.fetch_add(1, Ordering::Relaxed);
                Ok((candidate, MergeOutcome::Created))
            }
        }
    }

    async fn create_direct(&self, requester: &PartyId, counterparty: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let record = MiddlemanRequest::new_direct(requester.clone(), counterparty.clone(), Utc::now())?;
        self.insert(record.clone());
        Ok(record)
    }

    async fn confirm_direct(&self, id: RequestId, party: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        self.update(id, |r| r.confirm_direct(party, now).map(|()| ((), true)))
            .map(|(r, ())| r)
    }

    async fn set_party_accepted(&self, id: RequestId, party: &PartyId) -> Result<(MiddlemanRequest, bool), StoreError> {
        let now = Utc::now();
        self.update(id, |r| r.accept(party, now).map(|changed| (changed, changed)))
    }

    async fn mark_resolved(&self, id: RequestId, status: RequestStatus) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        self.update(id, |r| r.resolve(status, now).map(|()| ((), true)))
            .map(|(r, ())| r)
    }

    async fn attach_thread(&self, id: RequestId, thread: &ThreadRef) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        self.update(id, |r| r.attach_thread(thread.clone(), now).map(|()| ((), true)))
            .map(|(r, ())| r)
    }

    async fn mark_completed(&self, id: RequestId, middleman: &PartyId) -> Result<MiddlemanRequest, StoreError> {
        let now = Utc::now();
        self.update(id, |r| r.complete(middleman.clone(), now).map(|()| ((), true)))
            .map(|(r, ())| r)
    }

    async fn get(&self, id: RequestId) -> Result<Option<MiddlemanRequest>, StoreError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn latest_for_trade(&self, trade_id: &TradeId) -> Result<Option<MiddlemanRequest>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.trade_id.as_ref() == Some(trade_id))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<MiddlemanRequest>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.thread_ref.as_ref() == Some(thread))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_awaiting(&self) -> Result<Vec<MiddlemanRequest>, StoreError> {
        let mut awaiting: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.status == RequestStatus::AwaitingAcceptance && !r.is_resolved())
            .cloned()
            .collect();
        awaiting.sort_by_key(|r| r.created_at);
        Ok(awaiting)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
