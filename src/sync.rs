//! Bounded, group-by-group folder fetching.
//!
//! A [`SyncSession`] fixes the folder list and the start time of one run.
//! The [`Orchestrator`] fetches the session's folders in groups: every fetch
//! in a group runs concurrently, and the next group only starts once all of
//! them have settled. A failed fetch never cancels its siblings.

use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::connector::ProviderDialect;
use crate::error::Error;
use crate::models::Folder;

/// Upper bound on concurrent folder fetches per user.
pub const MAX_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct SyncSession {
    folders: Vec<String>,
    started_at: DateTime<Utc>,
    group_size: usize,
}

impl SyncSession {
    pub fn new(folders: Vec<String>, group_size: usize) -> Self {
        SyncSession {
            folders,
            started_at: Utc::now(),
            group_size: group_size.clamp(1, MAX_GROUP_SIZE),
        }
    }

    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Folders in input order, chunked into groups of at most `group_size`.
    pub fn groups(&self) -> std::slice::Chunks<'_, String> {
        self.folders.chunks(self.group_size)
    }
}

/// Outcome tally for one synced folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderReport {
    pub folder: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub synced: Vec<FolderReport>,
    pub failures: Vec<(String, Error)>,
    /// Messages removed locally because the run no longer observed them.
    pub removed: usize,
}

impl SyncReport {
    /// True when every folder of the session fetched successfully.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&Error> {
        self.failures.first().map(|(_, e)| e)
    }

    /// Collapse into the first failure, if any.
    pub fn into_result(self) -> crate::Result<Self> {
        match self.failures.first() {
            Some((_, e)) => Err(e.clone()),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator;

impl Orchestrator {
    /// Run `fetch` for every folder of `session`, group after group.
    ///
    /// `on_complete` is called exactly once, after the last group settled.
    pub async fn run<F, Fut>(
        &self,
        session: &SyncSession,
        fetch: F,
        on_complete: impl FnOnce(&SyncReport),
    ) -> SyncReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = crate::Result<FolderReport>>,
    {
        let mut report = SyncReport::default();
        log::info!(
            "Syncing {} folders in groups of {}",
            session.folders.len(),
            session.group_size
        );

        for (index, group) in session.groups().enumerate() {
            log::debug!("Sync group {index}: {group:?}");
            let results = join_all(group.iter().map(|folder| {
                let fut = fetch(folder.clone());
                async move { (folder, fut.await) }
            }))
            .await;

            for (folder, result) in results {
                match result {
                    Ok(folder_report) => report.synced.push(folder_report),
                    Err(e) => {
                        log::warn!("Sync of {folder} failed: {e}");
                        report.failures.push((folder.clone(), e));
                    }
                }
            }
        }

        on_complete(&report);
        report
    }
}

/// Folders synced when the caller names none: everything with messages,
/// minus provider views that only duplicate concrete folders.
pub fn default_targets(folders: &[Folder], dialect: &ProviderDialect) -> Vec<String> {
    folders
        .iter()
        .filter(|f| f.total > 0 && !dialect.is_aggregate(&f.name))
        .map(|f| f.name.clone())
        .collect()
}
