//! Decide what an observed remote message means for the local store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connector::MessageSink;
use crate::error::Result;
use crate::models::{NormalizedMessage, StoredMessage, UpsertOutcome, Upserted};
use crate::store::StoreHandle;
use crate::sync::{FolderReport, SyncSession};

/// Create when unknown, leave alone when flags and labels match as sets,
/// otherwise overwrite. Remote always wins.
pub fn decide(existing: Option<&StoredMessage>, incoming: &NormalizedMessage) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Created,
        Some(stored)
            if stored.message.flags == incoming.flags
                && stored.message.labels == incoming.labels =>
        {
            UpsertOutcome::Unchanged
        }
        Some(_) => UpsertOutcome::Updated,
    }
}

/// Persistence side of a sync for one user.
///
/// Every observation made through one reconciler belongs to the same
/// session, so a message met in several folders ends up carrying all of
/// them as labels instead of bouncing between them.
#[derive(Debug, Clone)]
pub struct Reconciler {
    user_id: String,
    store: StoreHandle,
    session_start: DateTime<Utc>,
}

impl Reconciler {
    pub fn new(user_id: impl Into<String>, store: StoreHandle) -> Self {
        Reconciler {
            user_id: user_id.into(),
            store,
            session_start: Utc::now(),
        }
    }

    pub fn for_session(
        user_id: impl Into<String>,
        store: StoreHandle,
        session: &SyncSession,
    ) -> Self {
        Reconciler {
            session_start: session.started_at(),
            ..Self::new(user_id, store)
        }
    }

    pub async fn observe(&self, message: NormalizedMessage) -> Result<Upserted> {
        self.store
            .upsert_message(&self.user_id, message, self.session_start, Utc::now())
            .await
    }

    /// Reconcile the session's folders with what the session observed:
    /// memberships it did not confirm are dropped, and messages left in
    /// none of them are removed. Only call after every folder synced.
    pub async fn remove_unobserved(&self, session: &SyncSession) -> Result<usize> {
        let refiled = self
            .store
            .settle_labels(
                &self.user_id,
                session.folders().to_vec(),
                session.started_at(),
                Utc::now(),
            )
            .await?;
        if refiled > 0 {
            log::debug!("Dropped stale folder labels from {refiled} messages");
        }

        let removed = self
            .store
            .remove_stale(&self.user_id, session.folders().to_vec(), session.started_at())
            .await?;
        if removed > 0 {
            log::info!(
                "Removed {removed} messages deleted remotely from {} folders",
                session.folders().len()
            );
        }
        Ok(removed)
    }

    /// Sink for one folder fetch that tallies outcomes.
    pub fn folder_sink(&self, folder: &str) -> FolderSink<'_> {
        FolderSink {
            reconciler: self,
            folder: folder.to_string(),
            created: AtomicUsize::new(0),
            updated: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageSink for Reconciler {
    async fn on_message(&self, message: NormalizedMessage) -> Result<StoredMessage> {
        Ok(self.observe(message).await?.message)
    }
}

pub struct FolderSink<'a> {
    reconciler: &'a Reconciler,
    folder: String,
    created: AtomicUsize,
    updated: AtomicUsize,
    unchanged: AtomicUsize,
}

impl FolderSink<'_> {
    pub fn report(&self) -> FolderReport {
        FolderReport {
            folder: self.folder.clone(),
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageSink for FolderSink<'_> {
    async fn on_message(&self, message: NormalizedMessage) -> Result<StoredMessage> {
        let upserted = self.reconciler.observe(message).await?;
        let counter = match upserted.outcome {
            UpsertOutcome::Created => &self.created,
            UpsertOutcome::Updated => &self.updated,
            UpsertOutcome::Unchanged => &self.unchanged,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(upserted.message)
    }
}
