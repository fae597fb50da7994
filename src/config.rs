use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::connector::ProviderKind;
use crate::error::{Error, Result};
use crate::keyring;
use crate::sync::MAX_GROUP_SIZE;

// ---------------------------------------------------------------------------
// AccountId: stable UUIDv4 per account
// ---------------------------------------------------------------------------

pub type AccountId = String;

pub fn new_account_id() -> AccountId {
    uuid::Uuid::new_v4().to_string()
}

/// Synthetic ID for env-var-based accounts (stable across restarts).
pub const ENV_ACCOUNT_ID: &str = "env-account";

// ---------------------------------------------------------------------------
// Connector configuration (read-only for the connector's lifetime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    #[default]
    Tls,
    Starttls,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub security: SecurityMode,
    #[serde(default = "default_mailbox_root")]
    pub mailbox_root: String,
}

fn default_mailbox_root() -> String {
    "INBOX".into()
}

// ---------------------------------------------------------------------------
// Sync tuning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Folders fetched concurrently per group. Capped at [`MAX_GROUP_SIZE`].
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Whether a run with failed folders still advances the last-sync timestamp.
    #[serde(default)]
    pub advance_on_partial_failure: bool,
}

fn default_group_size() -> usize {
    MAX_GROUP_SIZE
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            group_size: MAX_GROUP_SIZE,
            advance_on_partial_failure: false,
        }
    }
}

impl SyncConfig {
    pub fn effective_group_size(&self) -> usize {
        self.group_size.clamp(1, MAX_GROUP_SIZE)
    }
}

// ---------------------------------------------------------------------------
// SMTP overrides: per-field optional, merged onto IMAP defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_starttls: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum PasswordBackend {
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "plaintext")]
    Plaintext { value: String },
}

// ---------------------------------------------------------------------------
// On-disk account file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccountConfig {
    pub id: AccountId,
    pub label: String,
    #[serde(default)]
    pub provider: ProviderKind,
    pub server: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub security: SecurityMode,
    #[serde(default = "default_mailbox_root")]
    pub mailbox_root: String,
    pub password: PasswordBackend,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default)]
    pub smtp: SmtpOverrides,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    pub accounts: Vec<FileAccountConfig>,
}

// ---------------------------------------------------------------------------
// Runtime SMTP config (fully resolved)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_starttls: bool,
}

impl SmtpConfig {
    /// Resolve SMTP config: start from IMAP defaults, overlay SmtpOverrides.
    pub fn resolve(imap: &ConnectorConfig, overrides: &SmtpOverrides, account_id: &str) -> Self {
        let password = match &overrides.password {
            Some(PasswordBackend::Plaintext { value }) => value.clone(),
            Some(PasswordBackend::Keyring) => keyring::get_smtp_password(account_id)
                .unwrap_or_else(|_| imap.password.clone()),
            None => imap.password.clone(),
        };

        SmtpConfig {
            server: overrides.server.clone().unwrap_or_else(|| imap.host.clone()),
            port: overrides.port.unwrap_or(587),
            username: overrides
                .username
                .clone()
                .unwrap_or_else(|| imap.username.clone()),
            password,
            use_starttls: overrides.use_starttls.unwrap_or(true),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime account config (resolved passwords, ready to use)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub id: AccountId,
    pub label: String,
    pub imap: ConnectorConfig,
    pub smtp: SmtpConfig,
    pub email_addresses: Vec<String>,
    pub sync: SyncConfig,
}

impl AccountConfig {
    pub fn from_file_account(fac: &FileAccountConfig, password: String) -> Self {
        let imap = ConnectorConfig {
            provider: fac.provider,
            host: fac.server.clone(),
            port: fac.port,
            username: fac.username.clone(),
            password,
            security: fac.security,
            mailbox_root: fac.mailbox_root.clone(),
        };
        let smtp = SmtpConfig::resolve(&imap, &fac.smtp, &fac.id);
        AccountConfig {
            id: fac.id.clone(),
            label: fac.label.clone(),
            imap,
            smtp,
            email_addresses: fac.email_addresses.clone(),
            sync: fac.sync,
        }
    }

    /// Address used as `From` for outbound mail.
    pub fn sender_address(&self) -> &str {
        self.email_addresses
            .first()
            .map(String::as_str)
            .unwrap_or(&self.imap.username)
    }

    /// Try env vars. Returns None if any required var is missing.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("NEVERLIGHT_SYNC_SERVER").ok()?;
        let username = std::env::var("NEVERLIGHT_SYNC_USER").ok()?;
        let password = std::env::var("NEVERLIGHT_SYNC_PASSWORD").ok()?;
        let port = std::env::var("NEVERLIGHT_SYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(993);
        let security = match std::env::var("NEVERLIGHT_SYNC_SECURITY").as_deref() {
            Ok("starttls") => SecurityMode::Starttls,
            Ok("plain") => SecurityMode::Plain,
            _ => SecurityMode::Tls,
        };
        let provider = std::env::var("NEVERLIGHT_SYNC_PROVIDER")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default();
        let email_addresses = std::env::var("NEVERLIGHT_SYNC_FROM")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let imap = ConnectorConfig {
            provider,
            host,
            port,
            username: username.clone(),
            password,
            security,
            mailbox_root: default_mailbox_root(),
        };
        let smtp_overrides = SmtpOverrides {
            server: std::env::var("NEVERLIGHT_SYNC_SMTP_SERVER").ok(),
            port: std::env::var("NEVERLIGHT_SYNC_SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok()),
            ..Default::default()
        };
        let smtp = SmtpConfig::resolve(&imap, &smtp_overrides, ENV_ACCOUNT_ID);

        Some(AccountConfig {
            id: ENV_ACCOUNT_ID.to_string(),
            label: username,
            imap,
            smtp,
            email_addresses,
            sync: SyncConfig::default(),
        })
    }

    /// Resolve all accounts: env vars first, then the accounts file.
    pub fn resolve_all() -> Result<Vec<Self>> {
        if let Some(account) = Self::from_env() {
            log::info!("Config loaded from environment variables");
            return Ok(vec![account]);
        }

        let Some(file) = AccountsFile::load()? else {
            return Err(Error::Config("no accounts configured".into()));
        };

        let mut accounts = Vec::new();
        for fac in &file.accounts {
            match resolve_password(&fac.password, &fac.username, &fac.server) {
                Ok(password) => accounts.push(AccountConfig::from_file_account(fac, password)),
                Err(e) => {
                    log::warn!(
                        "Failed to resolve password for account '{}': {}",
                        fac.label,
                        e
                    );
                }
            }
        }
        if accounts.is_empty() {
            return Err(Error::Config(
                "no account has a resolvable password".into(),
            ));
        }
        Ok(accounts)
    }
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("neverlight-mail")
}

fn config_path() -> PathBuf {
    config_dir().join("sync-accounts.json")
}

impl AccountsFile {
    pub fn load() -> Result<Option<Self>> {
        let path = config_path();
        if !path.exists() {
            return Ok(None);
        }
        let data =
            fs::read_to_string(&path).map_err(|e| Error::Config(format!("read config: {e}")))?;
        Self::parse(&data).map(Some)
    }

    pub fn parse(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| Error::Config(format!("parse config: {e}")))
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("create config dir: {e}")))?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
        fs::write(&path, data).map_err(|e| Error::Config(format!("write config: {e}")))
    }
}

fn resolve_password(
    backend: &PasswordBackend,
    username: &str,
    server: &str,
) -> std::result::Result<String, String> {
    match backend {
        PasswordBackend::Plaintext { value } => Ok(value.clone()),
        PasswordBackend::Keyring => keyring::get_password(username, server),
    }
}
