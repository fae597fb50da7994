use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::Result;
use crate::models::{Folder, NormalizedMessage, StoredMessage, TaskRef, Upserted};

pub(super) type Reply<T> = oneshot::Sender<Result<T>>;

pub(super) enum StoreCmd {
    UpsertMessage {
        user_id: String,
        message: NormalizedMessage,
        session_start: DateTime<Utc>,
        now: DateTime<Utc>,
        reply: Reply<Upserted>,
    },
    LoadMessage {
        user_id: String,
        provider_id: String,
        reply: Reply<Option<StoredMessage>>,
    },
    LoadFolderMessages {
        user_id: String,
        folder: String,
        limit: u32,
        offset: u32,
        reply: Reply<Vec<StoredMessage>>,
    },
    CountMessages {
        user_id: String,
        reply: Reply<u64>,
    },
    RemoveStale {
        user_id: String,
        folders: Vec<String>,
        before: DateTime<Utc>,
        reply: Reply<usize>,
    },
    SettleLabels {
        user_id: String,
        folders: Vec<String>,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
        reply: Reply<usize>,
    },
    RemoveFolder {
        user_id: String,
        folder: String,
        reply: Reply<usize>,
    },
    LinkTask {
        user_id: String,
        provider_id: String,
        task: TaskRef,
        reply: Reply<StoredMessage>,
    },
    ReplaceFolders {
        user_id: String,
        folders: Vec<Folder>,
        reply: Reply<()>,
    },
    LoadFolders {
        user_id: String,
        reply: Reply<Vec<Folder>>,
    },
    LastSync {
        user_id: String,
        reply: Reply<Option<DateTime<Utc>>>,
    },
    SetLastSync {
        user_id: String,
        at: DateTime<Utc>,
        reply: Reply<()>,
    },
}
