use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;

use melib::backends::{
    BackendEventConsumer, EnvelopeHashBatch, FlagOp, IsSubscribedFn, MailBackend,
};
use melib::conf::AccountSettings;
use melib::email::{Envelope, Flag};
use melib::imap::ImapType;
use melib::{AccountHash, EnvelopeHash, MailboxHash};

use super::{MailConnector, MessageSink, ProviderDialect};
use crate::config::{ConnectorConfig, SecurityMode};
use crate::error::{Error, Result};
use crate::models::{Folder, NormalizedMessage, OutgoingMessage, StoredMessage};
use crate::normalize::{
    canonical_message_id, flag_names, flags_from_names, keyword_names, normalize_envelope,
    TagNames,
};

/// IMAP connector; the dialect decides provider-specific folder naming.
pub struct ImapConnector {
    config: ConnectorConfig,
    dialect: ProviderDialect,
}

impl std::fmt::Debug for ImapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnector")
            .field("host", &self.config.host)
            .field("provider", &self.dialect.kind)
            .finish_non_exhaustive()
    }
}

/// Mailbox as listed by the server, detached from melib's types.
struct RemoteMailbox {
    hash: MailboxHash,
    path: String,
    parent: Option<String>,
    total: u32,
    unseen: u32,
}

/// A live IMAP session. Dropping it closes the connection.
struct ImapSession {
    backend: Box<ImapType>,
}

impl ImapSession {
    async fn connect(config: &ConnectorConfig) -> Result<Self> {
        let mut extra = IndexMap::new();
        extra.insert("server_hostname".into(), config.host.clone());
        extra.insert("server_username".into(), config.username.clone());
        extra.insert("server_password".into(), config.password.clone());
        extra.insert("server_port".into(), config.port.to_string());
        extra.insert(
            "use_tls".into(),
            (config.security != SecurityMode::Plain).to_string(),
        );
        extra.insert(
            "use_starttls".into(),
            (config.security == SecurityMode::Starttls).to_string(),
        );
        extra.insert("danger_accept_invalid_certs".into(), "false".into());

        let account_settings = AccountSettings {
            name: config.username.clone(),
            root_mailbox: config.mailbox_root.clone(),
            format: "imap".into(),
            identity: config.username.clone(),
            extra,
            ..Default::default()
        };

        let is_subscribed: IsSubscribedFn =
            (Arc::new(|_: &str| true) as Arc<dyn Fn(&str) -> bool + Send + Sync>).into();

        let event_consumer = BackendEventConsumer::new(Arc::new(
            |_account_hash: AccountHash, event: melib::backends::BackendEvent| {
                log::debug!("IMAP backend event: {:?}", event);
            },
        ));

        let backend = ImapType::new(&account_settings, is_subscribed, event_consumer)
            .map_err(|e| Error::Connection(format!("Failed to create IMAP backend: {e}")))?;

        backend
            .is_online()
            .map_err(|e| Error::Connection(format!("IMAP is_online failed: {e}")))?
            .await
            .map_err(|e| Error::Connection(format!("IMAP connection failed: {e}")))?;

        Ok(ImapSession { backend })
    }

    async fn mailboxes(&self, include_details: bool) -> Result<Vec<RemoteMailbox>> {
        let mailboxes = self
            .backend
            .mailboxes()
            .map_err(|e| Error::Protocol(format!("Failed to request mailboxes: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to fetch mailboxes: {e}")))?;

        let paths: HashMap<MailboxHash, String> = mailboxes
            .iter()
            .map(|(hash, mailbox)| (*hash, mailbox.path().to_string()))
            .collect();

        let mut out = Vec::with_capacity(mailboxes.len());
        for (hash, mailbox) in &mailboxes {
            let (total, unseen) = if include_details {
                mailbox
                    .count()
                    .map_err(|e| Error::Protocol(format!("Failed to get mailbox count: {e}")))?
            } else {
                (0, 0)
            };
            out.push(RemoteMailbox {
                hash: *hash,
                path: mailbox.path().to_string(),
                parent: mailbox.parent().and_then(|p| paths.get(&p).cloned()),
                total: total as u32,
                unseen: unseen as u32,
            });
        }
        Ok(out)
    }

    async fn lookup(&self, folder: &str) -> Result<Option<MailboxHash>> {
        Ok(self
            .mailboxes(false)
            .await?
            .into_iter()
            .find(|m| m.path == folder)
            .map(|m| m.hash))
    }

    async fn resolve(&self, folder: &str) -> Result<MailboxHash> {
        self.lookup(folder)
            .await?
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))
    }

    async fn envelopes(&mut self, mailbox_hash: MailboxHash) -> Result<Vec<Envelope>> {
        let stream = self
            .backend
            .fetch(mailbox_hash)
            .map_err(|e| Error::Protocol(format!("Failed to start fetch: {e}")))?;
        let mut stream = std::pin::pin!(stream);

        let mut envelopes = Vec::new();
        while let Some(batch) = stream.next().await {
            envelopes.extend(
                batch.map_err(|e| Error::Protocol(format!("Error fetching envelopes: {e}")))?,
            );
        }
        Ok(envelopes)
    }

    async fn body(&self, envelope_hash: EnvelopeHash) -> Result<Vec<u8>> {
        self.backend
            .envelope_bytes_by_hash(envelope_hash)
            .map_err(|e| Error::Protocol(format!("Failed to request message bytes: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to fetch message bytes: {e}")))
    }

    /// Keyword names the backend has learned so far. Complete for every
    /// envelope fetched through this session.
    fn tag_names(&self) -> TagNames {
        let collection = self.backend.collection();
        let index = match collection.tag_index.read() {
            Ok(index) => index,
            Err(poisoned) => poisoned.into_inner(),
        };
        index.clone()
    }

    /// Find the envelope carrying `message_id` in `mailbox_hash`, with its
    /// system flags and keywords.
    async fn locate(
        &mut self,
        mailbox_hash: MailboxHash,
        message_id: &str,
    ) -> Result<(EnvelopeHash, Flag, BTreeSet<String>)> {
        let wanted = canonical_message_id(message_id);
        let envelopes = self.envelopes(mailbox_hash).await?;
        let tags = self.tag_names();
        envelopes
            .into_iter()
            .find(|e| canonical_message_id(&e.message_id().to_string()) == wanted)
            .map(|e| (e.hash(), e.flags(), keyword_names(&e, &tags)))
            .ok_or_else(|| Error::MessageNotFound(wanted))
    }

    async fn apply_flags(
        &mut self,
        envelope_hash: EnvelopeHash,
        mailbox_hash: MailboxHash,
        ops: Vec<FlagOp>,
    ) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.backend
            .set_flags(EnvelopeHashBatch::from(envelope_hash), mailbox_hash, ops)
            .map_err(|e| Error::Protocol(format!("Failed to request set_flags: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to set flags: {e}")))
    }

    async fn transfer(
        &mut self,
        message_id: &str,
        source: &str,
        destination: &str,
        move_: bool,
    ) -> Result<()> {
        let source_hash = self.resolve(source).await?;
        let destination_hash = self.resolve(destination).await?;
        let (envelope_hash, ..) = self.locate(source_hash, message_id).await?;
        self.backend
            .copy_messages(
                EnvelopeHashBatch::from(envelope_hash),
                source_hash,
                destination_hash,
                move_,
            )
            .map_err(|e| Error::Protocol(format!("Failed to request transfer: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to transfer message: {e}")))
    }
}

fn set_ops(flag: Flag, keywords: Vec<String>) -> Vec<FlagOp> {
    split_flag(flag)
        .into_iter()
        .map(FlagOp::Set)
        .chain(keywords.into_iter().map(FlagOp::SetTag))
        .collect()
}

fn unset_ops(flag: Flag, keywords: Vec<String>) -> Vec<FlagOp> {
    split_flag(flag)
        .into_iter()
        .map(FlagOp::UnSet)
        .chain(keywords.into_iter().map(FlagOp::UnSetTag))
        .collect()
}

/// Operations turning `current` flags and keywords into exactly the wanted ones.
fn replace_ops(
    current: Flag,
    current_keywords: &BTreeSet<String>,
    wanted: Flag,
    wanted_keywords: Vec<String>,
) -> Vec<FlagOp> {
    let stale: Vec<String> = current_keywords
        .iter()
        .filter(|k| !wanted_keywords.contains(k))
        .cloned()
        .collect();
    let added: Vec<String> = wanted_keywords
        .into_iter()
        .filter(|k| !current_keywords.contains(k))
        .collect();

    let mut ops = set_ops(wanted & !current, added);
    ops.extend(unset_ops(current & !wanted, stale));
    ops
}

/// One single-bit `Flag` per system flag set in `flag`.
fn split_flag(flag: Flag) -> Vec<Flag> {
    flag_names(flag)
        .iter()
        .map(|name| flags_from_names(std::iter::once(name)).0)
        .collect()
}

impl ImapConnector {
    pub fn new(config: ConnectorConfig, dialect: ProviderDialect) -> Self {
        ImapConnector { config, dialect }
    }

    async fn open(&self) -> Result<ImapSession> {
        log::debug!("Opening IMAP session to {}:{}", self.config.host, self.config.port);
        ImapSession::connect(&self.config).await
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    fn dialect(&self) -> &ProviderDialect {
        &self.dialect
    }

    async fn list_folders(&self, include_details: bool) -> Result<Vec<Folder>> {
        let session = self.open().await?;
        let mut mailboxes = session.mailboxes(include_details).await?;

        // INBOX first, then alphabetical
        mailboxes.sort_by(|a, b| {
            if a.path == "INBOX" {
                std::cmp::Ordering::Less
            } else if b.path == "INBOX" {
                std::cmp::Ordering::Greater
            } else {
                a.path.cmp(&b.path)
            }
        });

        Ok(mailboxes
            .into_iter()
            .enumerate()
            .map(|(i, m)| {
                let mut folder = Folder::new(i as u32, m.path, self.dialect.delimiter);
                folder.parent = m.parent.or(folder.parent);
                folder.total = m.total;
                folder.unseen = m.unseen;
                // melib does not surface RECENT; unseen is the closest count.
                folder.new = m.unseen;
                folder
            })
            .collect())
    }

    async fn fetch_messages(
        &self,
        sink: &dyn MessageSink,
        folder: &str,
    ) -> Result<Vec<StoredMessage>> {
        let mut session = self.open().await?;
        let mailbox_hash = session.resolve(folder).await?;
        let envelopes = session.envelopes(mailbox_hash).await?;
        let tags = session.tag_names();
        log::debug!("{folder}: {} envelopes", envelopes.len());

        let mut stored = Vec::with_capacity(envelopes.len());
        for envelope in &envelopes {
            let bytes = session.body(envelope.hash()).await?;
            let message = normalize_envelope(envelope, Some(&bytes), folder, &self.dialect, &tags);
            stored.push(sink.on_message(message).await?);
        }
        Ok(stored)
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        let mut session = self.open().await?;
        if session.lookup(name).await?.is_some() {
            return Err(Error::folder_exists(name));
        }
        log::info!("Creating folder {name}");
        session
            .backend
            .create_mailbox(name.to_string())
            .map_err(|e| Error::Protocol(format!("Failed to request create: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to create folder {name}: {e}")))?;
        Ok(name.to_string())
    }

    async fn delete_folder(&self, name: &str) -> Result<String> {
        let mut session = self.open().await?;
        let hash = session
            .lookup(name)
            .await?
            .ok_or_else(|| Error::folder_missing(name))?;
        log::info!("Deleting folder {name}");
        session
            .backend
            .delete_mailbox(hash)
            .map_err(|e| Error::Protocol(format!("Failed to request delete: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to delete folder {name}: {e}")))?;
        Ok(name.to_string())
    }

    async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<String> {
        let mut session = self.open().await?;
        let hash = session
            .lookup(old_name)
            .await?
            .ok_or_else(|| Error::folder_missing(old_name))?;
        if session.lookup(new_name).await?.is_some() {
            return Err(Error::folder_exists(new_name));
        }
        log::info!("Renaming folder {old_name} -> {new_name}");
        session
            .backend
            .rename_mailbox(hash, new_name.to_string())
            .map_err(|e| Error::Protocol(format!("Failed to request rename: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to rename folder {old_name}: {e}")))?;
        Ok(new_name.to_string())
    }

    async fn append_message(
        &self,
        folder: &str,
        flags: &BTreeSet<String>,
        message: &OutgoingMessage,
    ) -> Result<NormalizedMessage> {
        let message_id = crate::smtp::new_message_id(&message.from);
        let bytes = crate::smtp::build_message(message, &message_id)?.formatted();
        let (flag, _) = flags_from_names(flags);

        let session = self.open().await?;
        let mailbox_hash = session.resolve(folder).await?;
        session
            .backend
            .save(bytes.clone(), mailbox_hash, Some(flag))
            .map_err(|e| Error::Protocol(format!("Failed to request append: {e}")))?
            .await
            .map_err(|e| Error::Protocol(format!("Failed to append to {folder}: {e}")))?;

        let envelope = Envelope::from_bytes(&bytes, Some(flag))
            .map_err(|e| Error::Protocol(format!("Failed to parse appended message: {e}")))?;
        // Keywords are not part of an APPEND; only system flags were stored.
        Ok(normalize_envelope(
            &envelope,
            Some(&bytes),
            folder,
            &self.dialect,
            &TagNames::new(),
        ))
    }

    async fn move_message(
        &self,
        message_id: &str,
        source: &str,
        destination: &str,
    ) -> Result<String> {
        let mut session = self.open().await?;
        session.transfer(message_id, source, destination, true).await?;
        Ok(message_id.to_string())
    }

    async fn copy_message(
        &self,
        message_id: &str,
        source: &str,
        destination: &str,
    ) -> Result<String> {
        let mut session = self.open().await?;
        session.transfer(message_id, source, destination, false).await?;
        Ok(message_id.to_string())
    }

    async fn add_flags(
        &self,
        message_id: &str,
        flags: &BTreeSet<String>,
        folder: &str,
    ) -> Result<String> {
        let mut session = self.open().await?;
        let mailbox_hash = session.resolve(folder).await?;
        let (envelope_hash, ..) = session.locate(mailbox_hash, message_id).await?;
        let (flag, keywords) = flags_from_names(flags);
        session
            .apply_flags(envelope_hash, mailbox_hash, set_ops(flag, keywords))
            .await?;
        Ok(message_id.to_string())
    }

    async fn remove_flags(
        &self,
        message_id: &str,
        flags: &BTreeSet<String>,
        folder: &str,
    ) -> Result<String> {
        let mut session = self.open().await?;
        let mailbox_hash = session.resolve(folder).await?;
        let (envelope_hash, ..) = session.locate(mailbox_hash, message_id).await?;
        let (flag, keywords) = flags_from_names(flags);
        session
            .apply_flags(envelope_hash, mailbox_hash, unset_ops(flag, keywords))
            .await?;
        Ok(message_id.to_string())
    }

    async fn set_flags(
        &self,
        message_id: &str,
        flags: &BTreeSet<String>,
        folder: &str,
    ) -> Result<String> {
        let mut session = self.open().await?;
        let mailbox_hash = session.resolve(folder).await?;
        let (envelope_hash, current, current_keywords) =
            session.locate(mailbox_hash, message_id).await?;
        let (wanted, keywords) = flags_from_names(flags);

        let ops = replace_ops(current, &current_keywords, wanted, keywords);
        session.apply_flags(envelope_hash, mailbox_hash, ops).await?;
        Ok(message_id.to_string())
    }
}
