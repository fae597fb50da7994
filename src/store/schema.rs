use rusqlite::Connection;

/// Schema DDL run on open.
pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    folder TEXT NOT NULL,
    sender TEXT NOT NULL DEFAULT '[]',
    recipient TEXT NOT NULL DEFAULT '[]',
    subject TEXT NOT NULL DEFAULT '',
    body_html TEXT,
    body_text TEXT,
    date INTEGER NOT NULL DEFAULT 0,
    flags TEXT NOT NULL DEFAULT '',
    labels TEXT NOT NULL DEFAULT '[]',
    tasks TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (user_id, provider_id)
);

CREATE TABLE IF NOT EXISTS folders (
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    short_name TEXT NOT NULL,
    total_count INTEGER DEFAULT 0,
    new_count INTEGER DEFAULT 0,
    unseen_count INTEGER DEFAULT 0,
    parent TEXT,
    PRIMARY KEY (user_id, name)
);

CREATE TABLE IF NOT EXISTS sync_state (
    user_id TEXT PRIMARY KEY,
    last_sync INTEGER NOT NULL
);
";

/// Run forward-only migrations. Each ALTER is idempotent (ignores "duplicate column" errors).
pub(super) fn run_migrations(conn: &Connection) {
    let alters = [
        // Observation time, bumped even when nothing about the message changed.
        "ALTER TABLE messages ADD COLUMN seen_at INTEGER NOT NULL DEFAULT 0",
        // Folders the message was observed in during `observed_session`.
        "ALTER TABLE messages ADD COLUMN observed_in TEXT NOT NULL DEFAULT '[]'",
        // Start of the session that last observed the message, in microseconds.
        "ALTER TABLE messages ADD COLUMN observed_session INTEGER NOT NULL DEFAULT 0",
    ];
    for sql in &alters {
        // "duplicate column name" is the expected error when already migrated
        if let Err(e) = conn.execute(sql, []) {
            let msg = e.to_string();
            if !msg.contains("duplicate column") {
                log::warn!("Migration failed ({}): {}", sql, msg);
            }
        }
    }

    // Backfill rows written before seen_at existed.
    if let Err(e) = conn.execute("UPDATE messages SET seen_at = updated_at WHERE seen_at = 0", []) {
        log::warn!("seen_at backfill failed: {}", e);
    }

    // Indexes (idempotent via IF NOT EXISTS)
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_messages_folder_date ON messages(user_id, folder, date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_messages_folder_seen ON messages(user_id, folder, seen_at)",
        "CREATE INDEX IF NOT EXISTS idx_folders_user ON folders(user_id, position)",
    ];
    for sql in &indexes {
        if let Err(e) = conn.execute(sql, []) {
            log::warn!("Index creation failed: {}", e);
        }
    }
}
