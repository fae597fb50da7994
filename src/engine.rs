//! Per-user entry point tying connector, store and orchestration together.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::{AccountConfig, SyncConfig};
use crate::connector::{self, FolderRole, MailConnector, OutboundConnector};
use crate::directory::FolderDirectory;
use crate::error::{Error, Result};
use crate::models::{NormalizedMessage, OutgoingMessage, StoredMessage, TaskRef};
use crate::reconcile::Reconciler;
use crate::store::StoreHandle;
use crate::sync::{default_targets, Orchestrator, SyncReport, SyncSession};

/// Optional collaborator that suggests tasks for a message on single reads.
#[async_trait]
pub trait TaskLinker: Send + Sync {
    async fn suggest(&self, message: &StoredMessage) -> Result<Vec<TaskRef>>;
}

#[derive(Clone)]
pub struct MailEngine {
    user_id: String,
    connector: Arc<dyn MailConnector>,
    outbound: Option<Arc<dyn OutboundConnector>>,
    store: StoreHandle,
    sync: SyncConfig,
    linker: Option<Arc<dyn TaskLinker>>,
}

impl MailEngine {
    pub fn new(
        user_id: impl Into<String>,
        connector: Arc<dyn MailConnector>,
        store: StoreHandle,
        sync: SyncConfig,
    ) -> Self {
        MailEngine {
            user_id: user_id.into(),
            connector,
            outbound: None,
            store,
            sync,
            linker: None,
        }
    }

    /// Engine for a configured account, with connectors picked by provider.
    pub fn for_account(account: &AccountConfig, store: StoreHandle) -> Self {
        Self::new(
            account.id.clone(),
            connector::connector_for(account.imap.clone()),
            store,
            account.sync,
        )
        .with_outbound(connector::outbound_for(account.smtp.clone()))
    }

    pub fn with_outbound(mut self, outbound: Arc<dyn OutboundConnector>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn with_task_linker(mut self, linker: Arc<dyn TaskLinker>) -> Self {
        self.linker = Some(linker);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn directory(&self) -> FolderDirectory {
        FolderDirectory::new(self.user_id.clone(), self.connector.clone(), self.store.clone())
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.user_id.clone(), self.store.clone())
    }

    // -- sync ----------------------------------------------------------------

    /// Sync `folders`, or the default selection when none are named.
    ///
    /// Messages no longer present remotely are only removed when every
    /// folder synced. The last-sync timestamp is set to the session start
    /// on full success, and on partial success only if configured to.
    pub async fn sync(&self, folders: Option<Vec<String>>) -> Result<SyncReport> {
        let folders = match folders {
            Some(folders) => folders,
            None => self.default_folders().await?,
        };
        let session = SyncSession::new(folders, self.sync.effective_group_size());
        let reconciler =
            Reconciler::for_session(self.user_id.clone(), self.store.clone(), &session);

        let mut report = Orchestrator
            .run(
                &session,
                |folder| {
                    let reconciler = &reconciler;
                    async move {
                        let sink = reconciler.folder_sink(&folder);
                        self.connector.fetch_messages(&sink, &folder).await?;
                        Ok(sink.report())
                    }
                },
                |report| {
                    log::info!(
                        "Sync for {} settled: {} folders ok, {} failed",
                        self.user_id,
                        report.synced.len(),
                        report.failures.len()
                    );
                },
            )
            .await;

        if report.is_complete() {
            report.removed = reconciler.remove_unobserved(&session).await?;
            self.store
                .set_last_sync(&self.user_id, session.started_at())
                .await?;
        } else if self.sync.advance_on_partial_failure {
            self.store
                .set_last_sync(&self.user_id, session.started_at())
                .await?;
        } else {
            log::debug!("Partial sync; last-sync timestamp left as is");
        }
        Ok(report)
    }

    async fn default_folders(&self) -> Result<Vec<String>> {
        let mut known = self.store.load_folders(&self.user_id).await?;
        if known.is_empty() {
            known = self.directory().list_folders(true).await?;
        }
        Ok(default_targets(&known, self.connector.dialect()))
    }

    /// Fetch and persist one folder outside of a session.
    pub async fn fetch_folder(&self, folder: &str) -> Result<Vec<StoredMessage>> {
        self.connector
            .fetch_messages(&self.reconciler(), folder)
            .await
    }

    /// Fetch a well-known folder under the provider's own name for it.
    pub async fn fetch_role(&self, role: FolderRole) -> Result<Vec<StoredMessage>> {
        let folder = self
            .connector
            .dialect()
            .folder_for(role)
            .ok_or_else(|| Error::FolderNotFound(format!("{role:?}")))?;
        self.fetch_folder(folder).await
    }

    pub async fn last_sync(&self) -> Result<Option<chrono::DateTime<Utc>>> {
        self.store.last_sync(&self.user_id).await
    }

    // -- stored messages -----------------------------------------------------

    /// A stored message, enriched with suggested tasks when a linker is set.
    pub async fn get_message(&self, provider_id: &str) -> Result<StoredMessage> {
        let mut message = self
            .store
            .load_message(&self.user_id, provider_id)
            .await?
            .ok_or_else(|| Error::MessageNotFound(provider_id.to_string()))?;

        if let Some(linker) = &self.linker {
            for task in linker.suggest(&message).await? {
                if !message.tasks.iter().any(|t| t.id == task.id) {
                    message.tasks.push(task);
                }
            }
        }
        Ok(message)
    }

    pub async fn load_folder_messages(
        &self,
        folder: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        self.store
            .load_folder_messages(&self.user_id, folder, limit, offset)
            .await
    }

    pub async fn link_task(&self, provider_id: &str, task_id: &str) -> Result<StoredMessage> {
        let task = TaskRef {
            id: task_id.to_string(),
            date: Utc::now(),
        };
        self.store.link_task(&self.user_id, provider_id, task).await
    }

    // -- outbound ------------------------------------------------------------

    /// Send, then pull the sent folder so the copy lands in the store.
    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<Vec<StoredMessage>> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| Error::Config("no outbound connector configured".into()))?;
        outbound.send_message(message).await?;
        log::info!("Message sent for {}", self.user_id);
        self.fetch_role(FolderRole::Sent).await
    }

    // -- remote mutations ----------------------------------------------------

    pub async fn append_message(
        &self,
        folder: &str,
        flags: &BTreeSet<String>,
        message: &OutgoingMessage,
    ) -> Result<NormalizedMessage> {
        self.connector.append_message(folder, flags, message).await
    }

    pub async fn move_message(&self, message_id: &str, source: &str, destination: &str) -> Result<String> {
        self.connector
            .move_message(message_id, source, destination)
            .await
    }

    #[deprecated(note = "copying duplicates remote state; use move_message")]
    #[allow(deprecated)]
    pub async fn copy_message(&self, message_id: &str, source: &str, destination: &str) -> Result<String> {
        self.connector
            .copy_message(message_id, source, destination)
            .await
    }

    pub async fn add_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.connector.add_flags(message_id, flags, folder).await
    }

    pub async fn remove_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.connector.remove_flags(message_id, flags, folder).await
    }

    pub async fn set_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.connector.set_flags(message_id, flags, folder).await
    }
}
