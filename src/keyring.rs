const SERVICE: &str = "neverlight-mail-sync";

fn account_key(username: &str, server: &str) -> String {
    format!("{username}@{server}")
}

fn smtp_key(account_id: &str) -> String {
    format!("smtp-{account_id}")
}

fn entry(key: &str) -> Result<keyring::Entry, String> {
    keyring::Entry::new(SERVICE, key).map_err(|e| {
        log::error!("keyring Entry::new failed for key={key:?}: {e}");
        format!("keyring error: {e}")
    })
}

fn get(key: &str) -> Result<String, String> {
    log::debug!("keyring GET: service={SERVICE:?} key={key:?}");
    entry(key)?.get_password().map_err(|e| {
        log::warn!("keyring get_password failed for key={key:?}: {e}");
        format!("keyring get: {e}")
    })
}

fn set(key: &str, password: &str) -> Result<(), String> {
    log::debug!("keyring SET: service={SERVICE:?} key={key:?}");
    entry(key)?
        .set_password(password)
        .map_err(|e| format!("keyring set: {e}"))
}

/// IMAP password for `username` on `server`.
pub fn get_password(username: &str, server: &str) -> Result<String, String> {
    get(&account_key(username, server))
}

pub fn set_password(username: &str, server: &str, password: &str) -> Result<(), String> {
    set(&account_key(username, server), password)
}

/// SMTP override password keyed by account ID.
pub fn get_smtp_password(account_id: &str) -> Result<String, String> {
    get(&smtp_key(account_id))
}

pub fn set_smtp_password(account_id: &str, password: &str) -> Result<(), String> {
    set(&smtp_key(account_id), password)
}
