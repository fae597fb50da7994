use std::sync::Arc;

use crate::connector::MailConnector;
use crate::error::Result;
use crate::models::Folder;
use crate::store::StoreHandle;

/// Result of a folder lifecycle operation.
///
/// The remote change has happened once this exists; `purge` and `refresh`
/// only say whether the local side caught up with it.
#[derive(Debug)]
pub struct FolderChange {
    pub folder: String,
    /// Local messages dropped with a deleted folder. `Ok(0)` for other changes.
    pub purge: Result<usize>,
    pub refresh: Result<Vec<Folder>>,
}

/// The user's known folder list, kept in the local store.
#[derive(Clone)]
pub struct FolderDirectory {
    user_id: String,
    connector: Arc<dyn MailConnector>,
    store: StoreHandle,
}

impl FolderDirectory {
    pub fn new(user_id: impl Into<String>, connector: Arc<dyn MailConnector>, store: StoreHandle) -> Self {
        FolderDirectory {
            user_id: user_id.into(),
            connector,
            store,
        }
    }

    /// Fetch the remote folder list and replace the stored one with it.
    pub async fn list_folders(&self, include_details: bool) -> Result<Vec<Folder>> {
        let folders = self.connector.list_folders(include_details).await?;
        self.store
            .replace_folders(&self.user_id, folders.clone())
            .await?;
        log::debug!("Folder directory refreshed: {} folders", folders.len());
        Ok(folders)
    }

    /// The stored list, without touching the server.
    pub async fn known_folders(&self) -> Result<Vec<Folder>> {
        self.store.load_folders(&self.user_id).await
    }

    pub async fn create_folder(&self, name: &str) -> Result<FolderChange> {
        let folder = self.connector.create_folder(name).await?;
        Ok(self.after_change(folder, Ok(0)).await)
    }

    /// Delete remotely, then drop every local message filed under it.
    pub async fn delete_folder(&self, name: &str) -> Result<FolderChange> {
        let folder = self.connector.delete_folder(name).await?;
        let purge = self.store.remove_folder(&self.user_id, &folder).await;
        match &purge {
            Ok(n) => log::debug!("Dropped {n} local messages of deleted folder {folder}"),
            Err(e) => log::warn!("Dropping local messages of deleted folder {folder} failed: {e}"),
        }
        Ok(self.after_change(folder, purge).await)
    }

    pub async fn rename_folder(&self, old_name: &str, new_name: &str) -> Result<FolderChange> {
        let folder = self.connector.rename_folder(old_name, new_name).await?;
        Ok(self.after_change(folder, Ok(0)).await)
    }

    async fn after_change(&self, folder: String, purge: Result<usize>) -> FolderChange {
        let refresh = self.list_folders(true).await;
        if let Err(e) = &refresh {
            log::warn!("Folder directory refresh after changing {folder} failed: {e}");
        }
        FolderChange {
            folder,
            purge,
            refresh,
        }
    }
}
