use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use super::commands::{Reply, StoreCmd};
use super::queries;
use super::schema::{run_migrations, SCHEMA};
use crate::error::{Error, Result};
use crate::models::{Folder, NormalizedMessage, StoredMessage, TaskRef, Upserted};

// ---------------------------------------------------------------------------
// StoreHandle: Clone + Send + Sync async facade
// ---------------------------------------------------------------------------

/// All access goes through one background thread owning the connection, so
/// every command (in particular each upsert) runs to completion before the
/// next one starts.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCmd>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

fn unavailable() -> Error {
    Error::Persistence("Store unavailable".into())
}

impl StoreHandle {
    /// Open (or create) the store under the XDG data dir.
    pub fn open() -> Result<Self> {
        let dir = Self::resolve_path();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Persistence(format!("Failed to create store dir: {e}")))?;
        Self::open_at(&dir.join("sync.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Persistence(format!("Failed to open store db: {e}")))?;
        Self::start(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Persistence(format!("Failed to open store db: {e}")))?;
        Self::start(conn)
    }

    fn start(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Persistence(format!("Failed to init store schema: {e}")))?;
        run_migrations(&conn);

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("neverlight-sync-store".into())
            .spawn(move || run_loop(conn, rx))
            .map_err(|e| Error::Persistence(format!("Failed to spawn store thread: {e}")))?;

        Ok(StoreHandle { tx })
    }

    /// A handle whose store thread is gone; every request fails.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        StoreHandle { tx }
    }

    fn resolve_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("neverlight-mail")
    }

    async fn request<T>(&self, cmd: impl FnOnce(Reply<T>) -> StoreCmd) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(cmd(reply)).map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())?
    }

    // -- messages ------------------------------------------------------------

    /// Create, update or leave alone the record for `message`, atomically.
    ///
    /// Observations sharing `session_start` count as one session when the
    /// message's folder memberships are settled.
    pub async fn upsert_message(
        &self,
        user_id: &str,
        message: NormalizedMessage,
        session_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Upserted> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::UpsertMessage {
            user_id,
            message,
            session_start,
            now,
            reply,
        })
        .await
    }

    pub async fn load_message(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<Option<StoredMessage>> {
        let (user_id, provider_id) = (user_id.to_string(), provider_id.to_string());
        self.request(|reply| StoreCmd::LoadMessage {
            user_id,
            provider_id,
            reply,
        })
        .await
    }

    pub async fn load_folder_messages(
        &self,
        user_id: &str,
        folder: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let (user_id, folder) = (user_id.to_string(), folder.to_string());
        self.request(|reply| StoreCmd::LoadFolderMessages {
            user_id,
            folder,
            limit,
            offset,
            reply,
        })
        .await
    }

    pub async fn count_messages(&self, user_id: &str) -> Result<u64> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::CountMessages { user_id, reply })
            .await
    }

    /// Remove messages in `folders` not observed since `before`.
    pub async fn remove_stale(
        &self,
        user_id: &str,
        folders: Vec<String>,
        before: DateTime<Utc>,
    ) -> Result<usize> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::RemoveStale {
            user_id,
            folders,
            before,
            reply,
        })
        .await
    }

    /// Drop labels of `folders` the session starting at `started` did not confirm.
    pub async fn settle_labels(
        &self,
        user_id: &str,
        folders: Vec<String>,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::SettleLabels {
            user_id,
            folders,
            started,
            now,
            reply,
        })
        .await
    }

    /// Remove every local message filed under `folder`.
    pub async fn remove_folder(&self, user_id: &str, folder: &str) -> Result<usize> {
        let (user_id, folder) = (user_id.to_string(), folder.to_string());
        self.request(|reply| StoreCmd::RemoveFolder {
            user_id,
            folder,
            reply,
        })
        .await
    }

    pub async fn link_task(
        &self,
        user_id: &str,
        provider_id: &str,
        task: TaskRef,
    ) -> Result<StoredMessage> {
        let (user_id, provider_id) = (user_id.to_string(), provider_id.to_string());
        self.request(|reply| StoreCmd::LinkTask {
            user_id,
            provider_id,
            task,
            reply,
        })
        .await
    }

    // -- folders & sync state ------------------------------------------------

    pub async fn replace_folders(&self, user_id: &str, folders: Vec<Folder>) -> Result<()> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::ReplaceFolders {
            user_id,
            folders,
            reply,
        })
        .await
    }

    pub async fn load_folders(&self, user_id: &str) -> Result<Vec<Folder>> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::LoadFolders { user_id, reply })
            .await
    }

    pub async fn last_sync(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::LastSync { user_id, reply })
            .await
    }

    pub async fn set_last_sync(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let user_id = user_id.to_string();
        self.request(|reply| StoreCmd::SetLastSync { user_id, at, reply })
            .await
    }
}

// -- background thread ---------------------------------------------------

fn run_loop(conn: Connection, mut rx: mpsc::UnboundedReceiver<StoreCmd>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StoreCmd::UpsertMessage {
                user_id,
                message,
                session_start,
                now,
                reply,
            } => {
                let _ = reply.send(queries::do_upsert_message(
                    &conn,
                    &user_id,
                    &message,
                    session_start,
                    now,
                ));
            }
            StoreCmd::LoadMessage {
                user_id,
                provider_id,
                reply,
            } => {
                let _ = reply.send(queries::do_load_message(&conn, &user_id, &provider_id));
            }
            StoreCmd::LoadFolderMessages {
                user_id,
                folder,
                limit,
                offset,
                reply,
            } => {
                let _ = reply.send(queries::do_load_folder_messages(
                    &conn, &user_id, &folder, limit, offset,
                ));
            }
            StoreCmd::CountMessages { user_id, reply } => {
                let _ = reply.send(queries::do_count_messages(&conn, &user_id));
            }
            StoreCmd::RemoveStale {
                user_id,
                folders,
                before,
                reply,
            } => {
                let _ = reply.send(queries::do_remove_stale(&conn, &user_id, &folders, before));
            }
            StoreCmd::SettleLabels {
                user_id,
                folders,
                started,
                now,
                reply,
            } => {
                let _ = reply.send(queries::do_settle_labels(
                    &conn, &user_id, &folders, started, now,
                ));
            }
            StoreCmd::RemoveFolder {
                user_id,
                folder,
                reply,
            } => {
                let _ = reply.send(queries::do_remove_folder(&conn, &user_id, &folder));
            }
            StoreCmd::LinkTask {
                user_id,
                provider_id,
                task,
                reply,
            } => {
                let _ = reply.send(queries::do_link_task(&conn, &user_id, &provider_id, task));
            }
            StoreCmd::ReplaceFolders {
                user_id,
                folders,
                reply,
            } => {
                let _ = reply.send(queries::do_replace_folders(&conn, &user_id, &folders));
            }
            StoreCmd::LoadFolders { user_id, reply } => {
                let _ = reply.send(queries::do_load_folders(&conn, &user_id));
            }
            StoreCmd::LastSync { user_id, reply } => {
                let _ = reply.send(queries::do_last_sync(&conn, &user_id));
            }
            StoreCmd::SetLastSync { user_id, at, reply } => {
                let _ = reply.send(queries::do_set_last_sync(&conn, &user_id, at));
            }
        }
    }
    log::debug!("Store thread exiting");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::models::UpsertOutcome;

    fn msg(id: &str, folder: &str) -> NormalizedMessage {
        NormalizedMessage {
            provider_id: id.into(),
            from: Vec::new(),
            to: Vec::new(),
            subject: String::new(),
            html: None,
            text: None,
            date: Utc::now(),
            flags: BTreeSet::new(),
            folder: folder.into(),
            labels: BTreeSet::from([folder.to_string()]),
        }
    }

    #[tokio::test]
    async fn concurrent_upserts_of_one_id_create_one_record() {
        let store = StoreHandle::open_in_memory().expect("open store");
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let folder = if i % 2 == 0 { "INBOX" } else { "[Gmail]/All Mail" };
            tasks.push(tokio::spawn(async move {
                store
                    .upsert_message(
                        "u",
                        msg("shared@example.com", folder),
                        Utc::now(),
                        Utc::now(),
                    )
                    .await
            }));
        }

        let mut created = 0;
        for task in tasks {
            let up = task.await.expect("join").expect("upsert");
            if up.outcome == UpsertOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.count_messages("u").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn handle_round_trips_folders_and_sync_state() {
        let store = StoreHandle::open_in_memory().expect("open store");
        let folders = vec![Folder::new(0, "INBOX", '/')];
        store.replace_folders("u", folders.clone()).await.unwrap();
        assert_eq!(store.load_folders("u").await.unwrap(), folders);

        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        store.set_last_sync("u", at).await.unwrap();
        assert_eq!(store.last_sync("u").await.unwrap(), Some(at));
    }
}
