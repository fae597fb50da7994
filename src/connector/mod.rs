//! Remote mail capabilities.
//!
//! [`MailConnector`] is the contract the sync path is written against; the
//! concrete variant is picked by [`connector_for`] from the provider tag in
//! the account's [`ConnectorConfig`]. Every call opens its own remote session
//! and drops it before returning, so a connector value only ever holds
//! configuration.

mod dialect;
pub mod imap;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

pub use dialect::{FolderRole, ProviderDialect, ProviderKind};

use crate::config::{ConnectorConfig, SmtpConfig};
use crate::error::Result;
use crate::models::{Folder, NormalizedMessage, OutgoingMessage, StoredMessage};

/// Receives each remote message as soon as it has been normalized.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn on_message(&self, message: NormalizedMessage) -> Result<StoredMessage>;
}

#[async_trait]
pub trait MailConnector: Send + Sync {
    fn dialect(&self) -> &ProviderDialect;

    /// List remote folders. Counts are only requested with `include_details`.
    async fn list_folders(&self, include_details: bool) -> Result<Vec<Folder>>;

    /// Stream every message of `folder` through `sink`, one at a time.
    async fn fetch_messages(
        &self,
        sink: &dyn MessageSink,
        folder: &str,
    ) -> Result<Vec<StoredMessage>>;

    async fn create_folder(&self, name: &str) -> Result<String>;

    async fn delete_folder(&self, name: &str) -> Result<String>;

    async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<String>;

    /// Store a new message in `folder` and return its normalized form.
    async fn append_message(
        &self,
        folder: &str,
        flags: &BTreeSet<String>,
        message: &OutgoingMessage,
    ) -> Result<NormalizedMessage>;

    async fn move_message(&self, message_id: &str, source: &str, destination: &str)
        -> Result<String>;

    /// Legacy capability kept for older callers.
    #[deprecated(note = "copying duplicates remote state; use move_message")]
    async fn copy_message(&self, message_id: &str, source: &str, destination: &str)
        -> Result<String>;

    async fn add_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str)
        -> Result<String>;

    async fn remove_flags(
        &self,
        message_id: &str,
        flags: &BTreeSet<String>,
        folder: &str,
    ) -> Result<String>;

    /// Replace the message's flags with exactly `flags`.
    async fn set_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str)
        -> Result<String>;
}

/// Outbound submission; not part of the sync path.
#[async_trait]
pub trait OutboundConnector: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()>;
}

/// Pick the connector variant for the configured provider.
pub fn connector_for(config: ConnectorConfig) -> Arc<dyn MailConnector> {
    let dialect = ProviderDialect::for_kind(config.provider);
    log::debug!("Building {:?} connector for {}", dialect.kind, config.host);
    Arc::new(imap::ImapConnector::new(config, dialect))
}

pub fn outbound_for(config: SmtpConfig) -> Arc<dyn OutboundConnector> {
    Arc::new(crate::smtp::SmtpConnector::new(config))
}
