//! In-memory connectors for unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connector::{
    MailConnector, MessageSink, OutboundConnector, ProviderDialect, ProviderKind,
};
use crate::error::{Error, Result};
use crate::models::{Address, Folder, NormalizedMessage, OutgoingMessage, StoredMessage, FLAG_SEEN};

#[derive(Default)]
struct State {
    folders: BTreeMap<String, Vec<NormalizedMessage>>,
    order: Vec<String>,
    fail_listing: bool,
    failing: HashSet<String>,
    fetched: Vec<String>,
    next_id: usize,
}

pub struct FakeConnector {
    dialect: ProviderDialect,
    state: Mutex<State>,
}

pub fn message(provider_id: &str, folder: &str) -> NormalizedMessage {
    NormalizedMessage {
        provider_id: provider_id.into(),
        from: vec![Address::new("sender@example.com")],
        to: vec![Address::new("me@example.com")],
        subject: format!("subject of {provider_id}"),
        html: None,
        text: Some("body".into()),
        date: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        flags: BTreeSet::new(),
        folder: folder.into(),
        labels: BTreeSet::from([folder.to_string()]),
    }
}

impl FakeConnector {
    /// Folders with the given number of generated messages each.
    pub fn new(folders: &[(&str, usize)]) -> Self {
        Self::with_kind(ProviderKind::Imap, folders)
    }

    pub fn with_kind(kind: ProviderKind, folders: &[(&str, usize)]) -> Self {
        let mut state = State::default();
        for (name, count) in folders {
            let messages = (0..*count)
                .map(|i| message(&format!("{name}-{i}"), name))
                .collect();
            state.folders.insert(name.to_string(), messages);
            state.order.push(name.to_string());
        }
        FakeConnector {
            dialect: ProviderDialect::for_kind(kind),
            state: Mutex::new(state),
        }
    }

    pub fn add_folder(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.insert(name.to_string(), Vec::new());
        state.order.push(name.to_string());
    }

    pub fn remove_folder(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.folders.remove(name);
        state.order.retain(|n| n != name);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state.lock().unwrap().fail_listing = fail;
    }

    pub fn fail_fetch(&self, folder: &str) {
        self.state.lock().unwrap().failing.insert(folder.to_string());
    }

    pub fn push_message(&self, message: NormalizedMessage) {
        let mut state = self.state.lock().unwrap();
        state
            .folders
            .entry(message.folder.clone())
            .or_default()
            .push(message);
    }

    pub fn drop_message(&self, folder: &str, provider_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(messages) = state.folders.get_mut(folder) {
            messages.retain(|m| m.provider_id != provider_id);
        }
    }

    pub fn flags_of(&self, folder: &str, provider_id: &str) -> Option<BTreeSet<String>> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)?
            .iter()
            .find(|m| m.provider_id == provider_id)
            .map(|m| m.flags.clone())
    }

    /// Folders passed to `fetch_messages`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    fn with_message<T>(
        &self,
        folder: &str,
        message_id: &str,
        f: impl FnOnce(&mut NormalizedMessage) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let messages = state
            .folders
            .get_mut(folder)
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?;
        let message = messages
            .iter_mut()
            .find(|m| m.provider_id == message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;
        Ok(f(message))
    }

    fn transfer(&self, message_id: &str, source: &str, destination: &str, keep: bool) -> Result<String> {
        let mut moved = self.with_message(source, message_id, |m| m.clone())?;
        let mut state = self.state.lock().unwrap();
        if !state.folders.contains_key(destination) {
            return Err(Error::FolderNotFound(destination.to_string()));
        }
        if !keep {
            if let Some(messages) = state.folders.get_mut(source) {
                messages.retain(|m| m.provider_id != message_id);
            }
        }
        moved.folder = destination.to_string();
        moved.labels = BTreeSet::from([destination.to_string()]);
        if let Some(messages) = state.folders.get_mut(destination) {
            messages.push(moved);
        }
        Ok(message_id.to_string())
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    fn dialect(&self) -> &ProviderDialect {
        &self.dialect
    }

    async fn list_folders(&self, include_details: bool) -> Result<Vec<Folder>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(Error::Connection("listing refused".into()));
        }
        let folders = state
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut folder = Folder::new(i as u32, name.as_str(), self.dialect.delimiter);
                if include_details {
                    let messages = &state.folders[name];
                    folder.total = messages.len() as u32;
                    folder.unseen = messages.iter().filter(|m| !m.has_flag(FLAG_SEEN)).count() as u32;
                    folder.new = folder.unseen;
                }
                folder
            })
            .collect();
        Ok(folders)
    }

    async fn fetch_messages(&self, sink: &dyn MessageSink, folder: &str) -> Result<Vec<StoredMessage>> {
        let messages = {
            let mut state = self.state.lock().unwrap();
            state.fetched.push(folder.to_string());
            if state.failing.contains(folder) {
                return Err(Error::Connection(format!("fetch of {folder} dropped")));
            }
            state
                .folders
                .get(folder)
                .cloned()
                .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?
        };
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            stored.push(sink.on_message(message).await?);
        }
        Ok(stored)
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        if self.state.lock().unwrap().folders.contains_key(name) {
            return Err(Error::folder_exists(name));
        }
        self.add_folder(name);
        Ok(name.to_string())
    }

    async fn delete_folder(&self, name: &str) -> Result<String> {
        if !self.state.lock().unwrap().folders.contains_key(name) {
            return Err(Error::folder_missing(name));
        }
        self.remove_folder(name);
        Ok(name.to_string())
    }

    async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.folders.contains_key(new_name) {
            return Err(Error::folder_exists(new_name));
        }
        let messages = state
            .folders
            .remove(old_name)
            .ok_or_else(|| Error::folder_missing(old_name))?;
        state.folders.insert(new_name.to_string(), messages);
        for name in state.order.iter_mut().filter(|n| *n == old_name) {
            *name = new_name.to_string();
        }
        Ok(new_name.to_string())
    }

    async fn append_message(
        &self,
        folder: &str,
        flags: &BTreeSet<String>,
        outgoing: &OutgoingMessage,
    ) -> Result<NormalizedMessage> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let mut appended = message(&format!("appended-{}", state.next_id), folder);
        appended.from = vec![Address::new(outgoing.from.as_str())];
        appended.to = outgoing.to.iter().map(|a| Address::new(a.as_str())).collect();
        appended.subject = outgoing.subject.clone();
        appended.text = Some(outgoing.body.clone());
        appended.flags = flags.clone();
        state
            .folders
            .get_mut(folder)
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?
            .push(appended.clone());
        Ok(appended)
    }

    async fn move_message(&self, message_id: &str, source: &str, destination: &str) -> Result<String> {
        self.transfer(message_id, source, destination, false)
    }

    async fn copy_message(&self, message_id: &str, source: &str, destination: &str) -> Result<String> {
        self.transfer(message_id, source, destination, true)
    }

    async fn add_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.with_message(folder, message_id, |m| m.flags.extend(flags.iter().cloned()))?;
        Ok(message_id.to_string())
    }

    async fn remove_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.with_message(folder, message_id, |m| m.flags.retain(|f| !flags.contains(f)))?;
        Ok(message_id.to_string())
    }

    async fn set_flags(&self, message_id: &str, flags: &BTreeSet<String>, folder: &str) -> Result<String> {
        self.with_message(folder, message_id, |m| m.flags = flags.clone())?;
        Ok(message_id.to_string())
    }
}

/// Outbound fake that files each sent message into the connector's sent folder.
pub struct FakeOutbound {
    pub connector: Arc<FakeConnector>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
}

impl FakeOutbound {
    pub fn new(connector: Arc<FakeConnector>) -> Self {
        FakeOutbound {
            connector,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OutboundConnector for FakeOutbound {
    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<()> {
        if outgoing.to.is_empty() {
            return Err(Error::Send("no recipients".into()));
        }
        let sent_folder = self
            .connector
            .dialect()
            .folder_for(crate::connector::FolderRole::Sent)
            .unwrap_or("Sent");
        self.connector
            .append_message(sent_folder, &BTreeSet::from([FLAG_SEEN.to_string()]), outgoing)
            .await?;
        self.sent.lock().unwrap().push(outgoing.clone());
        Ok(())
    }
}
