pub mod config;
pub mod connector;
pub mod directory;
pub mod engine;
pub mod error;
pub mod keyring;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod render;
pub mod smtp;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use connector::{connector_for, outbound_for, FolderRole, MailConnector, OutboundConnector, ProviderKind};
pub use directory::{FolderChange, FolderDirectory};
pub use engine::{MailEngine, TaskLinker};
pub use error::{Error, Result, StatusClass};
pub use models::{Folder, NormalizedMessage, OutgoingMessage, StoredMessage, UpsertOutcome};
pub use store::StoreHandle;
pub use sync::{SyncReport, SyncSession, MAX_GROUP_SIZE};
