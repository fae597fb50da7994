use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FLAG_SEEN: &str = "seen";
pub const FLAG_FLAGGED: &str = "flagged";
pub const FLAG_ANSWERED: &str = "answered";
pub const FLAG_DRAFT: &str = "draft";
pub const FLAG_DELETED: &str = "deleted";
pub const FLAG_FORWARDED: &str = "forwarded";

/// One entry of a from/to list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Address {
            address: address.into(),
            name: None,
        }
    }

    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Address {
            address: address.into(),
            name: Some(name.into()),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// A task linked to a message by the task-linking collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: String,
    pub date: DateTime<Utc>,
}

/// Provider-independent message shape produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Stable remote identity; the local store keys on it.
    pub provider_id: String,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub date: DateTime<Utc>,
    pub flags: BTreeSet<String>,
    /// Folder the message was observed in.
    pub folder: String,
    /// Folder-label membership as reported by the provider.
    pub labels: BTreeSet<String>,
}

impl NormalizedMessage {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// A message as persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(flatten)]
    pub message: NormalizedMessage,
    pub tasks: Vec<TaskRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn provider_id(&self) -> &str {
        &self.message.provider_id
    }
}

/// What the reconciler did with an observed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub outcome: UpsertOutcome,
    pub message: StoredMessage,
}

/// A mail folder (IMAP mailbox) in the user's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Ordinal position in the directory.
    pub id: u32,
    /// Fully qualified, separator-delimited path.
    pub name: String,
    pub short_name: String,
    pub total: u32,
    pub new: u32,
    pub unseen: u32,
    pub parent: Option<String>,
}

impl Folder {
    pub fn new(id: u32, name: impl Into<String>, delimiter: char) -> Self {
        let name = name.into();
        Folder {
            id,
            short_name: short_name_of(&name, delimiter).to_string(),
            parent: parent_of(&name, delimiter).map(str::to_string),
            name,
            total: 0,
            new: 0,
            unseen: 0,
        }
    }
}

/// Last path segment of a hierarchical folder name.
pub fn short_name_of(name: &str, delimiter: char) -> &str {
    name.rsplit(delimiter).next().unwrap_or(name)
}

pub fn parent_of(name: &str, delimiter: char) -> Option<&str> {
    name.rsplit_once(delimiter)
        .map(|(parent, _)| parent)
        .filter(|p| !p.is_empty())
}

/// A message submitted through the outbound connector or appended to a folder.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}
