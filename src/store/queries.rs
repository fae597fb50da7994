use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use serde::de::DeserializeOwned;

use super::flags::{decode_flags, encode_flags};
use crate::error::{Error, Result};
use crate::models::{
    Folder, NormalizedMessage, StoredMessage, TaskRef, UpsertOutcome, Upserted,
};
use crate::reconcile::decide;

const MESSAGE_COLUMNS: &str = "id, provider_id, folder, sender, recipient, subject,
    body_html, body_text, date, flags, labels, tasks, created_at, updated_at";

/// Insert-or-update keyed on (user_id, provider_id). Linked tasks and
/// created_at survive updates.
const UPSERT_SQL: &str = "
INSERT INTO messages
    (user_id, provider_id, folder, sender, recipient, subject, body_html, body_text,
     date, flags, labels, created_at, updated_at, seen_at, observed_in, observed_session)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?12, ?13, ?14)
ON CONFLICT(user_id, provider_id) DO UPDATE SET
    folder = excluded.folder,
    sender = excluded.sender,
    recipient = excluded.recipient,
    subject = excluded.subject,
    body_html = excluded.body_html,
    body_text = excluded.body_text,
    date = excluded.date,
    flags = excluded.flags,
    labels = excluded.labels,
    updated_at = excluded.updated_at,
    seen_at = excluded.seen_at,
    observed_in = excluded.observed_in,
    observed_session = excluded.observed_session";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |e| Error::Persistence(format!("{context}: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Persistence(format!("Store encode error: {e}")))
}

fn json_col<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Expects columns in [`MESSAGE_COLUMNS`] order.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        message: NormalizedMessage {
            provider_id: row.get(1)?,
            folder: row.get(2)?,
            from: json_col(row, 3)?,
            to: json_col(row, 4)?,
            subject: row.get(5)?,
            html: row.get(6)?,
            text: row.get(7)?,
            date: from_millis(row.get(8)?),
            flags: decode_flags(&row.get::<_, String>(9)?),
            labels: json_col(row, 10)?,
        },
        tasks: json_col(row, 11)?,
        created_at: from_millis(row.get(12)?),
        updated_at: from_millis(row.get(13)?),
    })
}

pub(super) fn do_load_message(
    conn: &Connection,
    user_id: &str,
    provider_id: &str,
) -> Result<Option<StoredMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE user_id = ?1 AND provider_id = ?2"
    );
    match conn.query_row(&sql, [user_id, provider_id], row_to_message) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::Persistence(format!("Store load error: {e}"))),
    }
}

/// Folders a message was observed in during the session that last saw it.
/// Sessions are told apart by their exact start, not by comparing
/// millisecond `seen_at` values against it.
fn session_key(started: DateTime<Utc>) -> i64 {
    started.timestamp_micros()
}

/// Folders the message was observed in during `session`, if any.
fn load_observation(
    conn: &Connection,
    user_id: &str,
    provider_id: &str,
    session: i64,
) -> Result<BTreeSet<String>> {
    match conn.query_row(
        "SELECT observed_session, observed_in FROM messages
         WHERE user_id = ?1 AND provider_id = ?2",
        [user_id, provider_id],
        |row| Ok((row.get::<_, i64>(0)?, json_col::<BTreeSet<String>>(row, 1)?)),
    ) {
        Ok((observed, folders)) if observed == session => Ok(folders),
        Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => Ok(BTreeSet::new()),
        Err(e) => Err(Error::Persistence(format!("Store load error: {e}"))),
    }
}

/// Decide and write in one transaction; the store thread is the only writer,
/// so two observations of the same id can never both insert.
///
/// Labels accumulate: a message seen in several folders carries all of
/// them, and only [`do_settle_labels`] drops a label again. The stored
/// folder is kept while its label is.
pub(super) fn do_upsert_message(
    conn: &Connection,
    user_id: &str,
    m: &NormalizedMessage,
    session_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Upserted> {
    let tx = conn.unchecked_transaction().map_err(db_err("Store tx error"))?;
    let now_ms = now.timestamp_millis();

    let existing = do_load_message(&tx, user_id, &m.provider_id)?;
    let session = session_key(session_start);
    let mut observed_in = load_observation(&tx, user_id, &m.provider_id, session)?;
    observed_in.insert(m.folder.clone());

    let mut effective = m.clone();
    if let Some(stored) = &existing {
        effective.labels.extend(stored.message.labels.iter().cloned());
        if effective.labels.contains(&stored.message.folder) {
            effective.folder = stored.message.folder.clone();
        }
    }
    let outcome = decide(existing.as_ref(), &effective);

    match outcome {
        UpsertOutcome::Unchanged => {
            tx.execute(
                "UPDATE messages SET seen_at = ?1, observed_in = ?2, observed_session = ?3
                 WHERE user_id = ?4 AND provider_id = ?5",
                rusqlite::params![
                    now_ms,
                    to_json(&observed_in)?,
                    session,
                    user_id,
                    m.provider_id
                ],
            )
            .map_err(db_err("Store touch error"))?;
        }
        UpsertOutcome::Created | UpsertOutcome::Updated => {
            tx.execute(
                UPSERT_SQL,
                rusqlite::params![
                    user_id,
                    effective.provider_id,
                    effective.folder,
                    to_json(&effective.from)?,
                    to_json(&effective.to)?,
                    effective.subject,
                    effective.html,
                    effective.text,
                    effective.date.timestamp_millis(),
                    encode_flags(&effective.flags),
                    to_json(&effective.labels)?,
                    now_ms,
                    to_json(&observed_in)?,
                    session,
                ],
            )
            .map_err(db_err("Store upsert error"))?;
        }
    }

    let message = do_load_message(&tx, user_id, &m.provider_id)?.ok_or_else(|| {
        Error::Persistence(format!("message {} missing after upsert", m.provider_id))
    })?;
    tx.commit().map_err(db_err("Store commit error"))?;

    log::debug!("{} {}: {:?}", m.folder, m.provider_id, outcome);
    Ok(Upserted { outcome, message })
}

pub(super) fn do_load_folder_messages(
    conn: &Connection,
    user_id: &str,
    folder: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<StoredMessage>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE user_id = ?1 AND folder = ?2
         ORDER BY date DESC, id DESC
         LIMIT ?3 OFFSET ?4"
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("Store prepare error"))?;
    let rows = stmt
        .query_map(
            rusqlite::params![user_id, folder, limit, offset],
            row_to_message,
        )
        .map_err(db_err("Store query error"))?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row.map_err(db_err("Store row error"))?);
    }
    Ok(messages)
}

pub(super) fn do_count_messages(conn: &Connection, user_id: &str) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
        [user_id],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as u64)
    .map_err(db_err("Store count error"))
}

/// Delete messages in `folders` not observed since `before`.
pub(super) fn do_remove_stale(
    conn: &Connection,
    user_id: &str,
    folders: &[String],
    before: DateTime<Utc>,
) -> Result<usize> {
    if folders.is_empty() {
        return Ok(0);
    }

    // Placeholders for the IN clause, offset by 2 for user_id and cutoff
    let placeholders: String = (0..folders.len())
        .map(|i| format!("?{}", i + 3))
        .collect::<Vec<_>>()
        .join(",");

    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    params.push(Box::new(user_id.to_string()));
    params.push(Box::new(before.timestamp_millis()));
    for f in folders {
        params.push(Box::new(f.clone()));
    }
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let sql = format!(
        "DELETE FROM messages WHERE user_id = ?1 AND seen_at < ?2 AND folder IN ({placeholders})"
    );
    conn.execute(&sql, param_refs.as_slice())
        .map_err(db_err("Store delete error"))
}

/// Drop labels of `folders` that a complete session starting at `started`
/// did not confirm. Messages left without any label are not touched here;
/// they are stale and go through [`do_remove_stale`].
pub(super) fn do_settle_labels(
    conn: &Connection,
    user_id: &str,
    folders: &[String],
    started: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize> {
    if folders.is_empty() {
        return Ok(0);
    }
    let synced: BTreeSet<&str> = folders.iter().map(String::as_str).collect();
    let session = session_key(started);
    let tx = conn.unchecked_transaction().map_err(db_err("Store tx error"))?;

    let mut changes = Vec::new();
    {
        let mut stmt = tx
            .prepare(
                "SELECT id, folder, labels, observed_in, observed_session
                 FROM messages WHERE user_id = ?1",
            )
            .map_err(db_err("Store prepare error"))?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    json_col::<BTreeSet<String>>(row, 2)?,
                    json_col::<BTreeSet<String>>(row, 3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(db_err("Store query error"))?;

        for row in rows {
            let (id, folder, labels, observed_in, observed_session) =
                row.map_err(db_err("Store row error"))?;
            let confirmed = if observed_session == session {
                observed_in
            } else {
                BTreeSet::new()
            };
            let remaining: BTreeSet<String> = labels
                .iter()
                .filter(|l| !synced.contains(l.as_str()) || confirmed.contains(*l))
                .cloned()
                .collect();
            if remaining.len() == labels.len() || remaining.is_empty() {
                continue;
            }
            let folder = if remaining.contains(&folder) {
                folder
            } else {
                confirmed
                    .intersection(&remaining)
                    .chain(remaining.iter())
                    .next()
                    .cloned()
                    .unwrap_or(folder)
            };
            changes.push((id, folder, remaining));
        }
    }

    for (id, folder, labels) in &changes {
        tx.execute(
            "UPDATE messages SET folder = ?1, labels = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![folder, to_json(labels)?, now.timestamp_millis(), id],
        )
        .map_err(db_err("Store label settle error"))?;
    }
    tx.commit().map_err(db_err("Store commit error"))?;
    Ok(changes.len())
}

/// Delete every local message filed under `folder`.
pub(super) fn do_remove_folder(conn: &Connection, user_id: &str, folder: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM messages WHERE user_id = ?1 AND folder = ?2",
        [user_id, folder],
    )
    .map_err(db_err("Store folder purge error"))
}

pub(super) fn do_link_task(
    conn: &Connection,
    user_id: &str,
    provider_id: &str,
    task: TaskRef,
) -> Result<StoredMessage> {
    let tx = conn.unchecked_transaction().map_err(db_err("Store tx error"))?;
    let mut message = do_load_message(&tx, user_id, provider_id)?
        .ok_or_else(|| Error::MessageNotFound(provider_id.to_string()))?;

    if !message.tasks.iter().any(|t| t.id == task.id) {
        message.tasks.push(task);
        tx.execute(
            "UPDATE messages SET tasks = ?1 WHERE id = ?2",
            rusqlite::params![to_json(&message.tasks)?, message.id],
        )
        .map_err(db_err("Store task link error"))?;
    }
    tx.commit().map_err(db_err("Store commit error"))?;
    Ok(message)
}

/// Replace the user's folder directory wholesale.
pub(super) fn do_replace_folders(conn: &Connection, user_id: &str, folders: &[Folder]) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(db_err("Store tx error"))?;

    tx.execute("DELETE FROM folders WHERE user_id = ?1", [user_id])
        .map_err(db_err("Store folder delete error"))?;

    let mut stmt = tx
        .prepare(
            "INSERT INTO folders
             (user_id, name, position, short_name, total_count, new_count, unseen_count, parent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .map_err(db_err("Store prepare error"))?;
    for f in folders {
        stmt.execute(rusqlite::params![
            user_id,
            f.name,
            f.id,
            f.short_name,
            f.total,
            f.new,
            f.unseen,
            f.parent,
        ])
        .map_err(|e| Error::Persistence(format!("Store folder insert error ({}): {e}", f.name)))?;
    }
    drop(stmt);

    tx.commit().map_err(db_err("Store commit error"))
}

pub(super) fn do_load_folders(conn: &Connection, user_id: &str) -> Result<Vec<Folder>> {
    let mut stmt = conn
        .prepare(
            "SELECT position, name, short_name, total_count, new_count, unseen_count, parent
             FROM folders WHERE user_id = ?1 ORDER BY position",
        )
        .map_err(db_err("Store prepare error"))?;

    let rows = stmt
        .query_map([user_id], |row| {
            Ok(Folder {
                id: row.get(0)?,
                name: row.get(1)?,
                short_name: row.get(2)?,
                total: row.get(3)?,
                new: row.get(4)?,
                unseen: row.get(5)?,
                parent: row.get(6)?,
            })
        })
        .map_err(db_err("Store query error"))?;

    let mut folders = Vec::new();
    for row in rows {
        folders.push(row.map_err(db_err("Store row error"))?);
    }
    Ok(folders)
}

pub(super) fn do_last_sync(conn: &Connection, user_id: &str) -> Result<Option<DateTime<Utc>>> {
    match conn.query_row(
        "SELECT last_sync FROM sync_state WHERE user_id = ?1",
        [user_id],
        |row| row.get::<_, i64>(0),
    ) {
        Ok(ms) => Ok(Some(from_millis(ms))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::Persistence(format!("Store sync state error: {e}"))),
    }
}

pub(super) fn do_set_last_sync(conn: &Connection, user_id: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (user_id, last_sync) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET last_sync = excluded.last_sync",
        rusqlite::params![user_id, at.timestamp_millis()],
    )
    .map_err(db_err("Store sync state error"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone};
    use rusqlite::Connection;

    use super::*;
    use crate::models::Address;
    use crate::store::schema::{run_migrations, SCHEMA};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(SCHEMA).expect("schema");
        run_migrations(&conn);
        conn
    }

    /// One observation in a session of its own.
    fn upsert(
        conn: &Connection,
        user_id: &str,
        m: &NormalizedMessage,
        at: DateTime<Utc>,
    ) -> Result<Upserted> {
        do_upsert_message(conn, user_id, m, at, at)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, folder: &str, flags: &[&str]) -> NormalizedMessage {
        NormalizedMessage {
            provider_id: id.into(),
            from: vec![Address::named("ann@example.com", "Ann")],
            to: vec![Address::new("bob@example.com")],
            subject: format!("subject {id}"),
            html: None,
            text: Some("body".into()),
            date: t(0),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            folder: folder.into(),
            labels: BTreeSet::from([folder.to_string()]),
        }
    }

    #[test]
    fn first_observation_creates() {
        let conn = conn();
        let up = upsert(&conn, "u", &msg("m1", "INBOX", &["seen"]), t(10)).unwrap();
        assert_eq!(up.outcome, UpsertOutcome::Created);
        assert_eq!(up.message.message, msg("m1", "INBOX", &["seen"]));
        assert_eq!(up.message.created_at, t(10));
        assert_eq!(do_count_messages(&conn, "u").unwrap(), 1);
    }

    #[test]
    fn refetch_of_unchanged_message_is_a_no_op() {
        let conn = conn();
        let m = msg("m1", "INBOX", &["seen"]);
        let first = upsert(&conn, "u", &m, t(10)).unwrap();

        for at in [t(20), t(30)] {
            let again = upsert(&conn, "u", &m, at).unwrap();
            assert_eq!(again.outcome, UpsertOutcome::Unchanged);
            assert_eq!(again.message, first.message);
        }
        assert_eq!(do_count_messages(&conn, "u").unwrap(), 1);
    }

    #[test]
    fn flag_change_overwrites_instead_of_merging() {
        let conn = conn();
        upsert(&conn, "u", &msg("m1", "INBOX", &["seen", "draft"]), t(10)).unwrap();
        let up =
            upsert(&conn, "u", &msg("m1", "INBOX", &["seen", "flagged"]), t(20)).unwrap();

        assert_eq!(up.outcome, UpsertOutcome::Updated);
        assert_eq!(
            up.message.message.flags,
            BTreeSet::from(["flagged".to_string(), "seen".to_string()])
        );
        assert_eq!(up.message.created_at, t(10));
        assert_eq!(up.message.updated_at, t(20));
    }

    #[test]
    fn users_do_not_share_identity() {
        let conn = conn();
        upsert(&conn, "alice", &msg("m1", "INBOX", &[]), t(0)).unwrap();
        let up = upsert(&conn, "bob", &msg("m1", "INBOX", &[]), t(0)).unwrap();
        assert_eq!(up.outcome, UpsertOutcome::Created);
    }

    #[test]
    fn stale_messages_are_removed_only_in_synced_folders() {
        let conn = conn();
        upsert(&conn, "u", &msg("old-inbox", "INBOX", &[]), t(0)).unwrap();
        upsert(&conn, "u", &msg("old-sent", "Sent", &[]), t(0)).unwrap();
        upsert(&conn, "u", &msg("fresh", "INBOX", &[]), t(100)).unwrap();
        // Unchanged re-observation still counts as seen.
        upsert(&conn, "u", &msg("kept", "INBOX", &[]), t(0)).unwrap();
        upsert(&conn, "u", &msg("kept", "INBOX", &[]), t(100)).unwrap();

        let removed = do_remove_stale(&conn, "u", &["INBOX".into()], t(100)).unwrap();
        assert_eq!(removed, 1);
        assert!(do_load_message(&conn, "u", "old-inbox").unwrap().is_none());
        assert!(do_load_message(&conn, "u", "old-sent").unwrap().is_some());
        assert!(do_load_message(&conn, "u", "fresh").unwrap().is_some());
        assert!(do_load_message(&conn, "u", "kept").unwrap().is_some());
    }

    #[test]
    fn message_in_two_folders_settles_after_one_session() {
        let conn = conn();
        let session = |start: i64| {
            let observe = |folder: &str, at: i64| {
                do_upsert_message(&conn, "u", &msg("dup", folder, &[]), t(start), t(at)).unwrap()
            };
            let inbox = observe("INBOX", start + 1);
            let work = observe("Work", start + 2);
            (inbox.outcome, work.outcome, work.message)
        };

        let (inbox, work, stored) = session(0);
        assert_eq!((inbox, work), (UpsertOutcome::Created, UpsertOutcome::Updated));
        assert_eq!(
            stored.message.labels,
            BTreeSet::from(["INBOX".to_string(), "Work".to_string()])
        );
        assert_eq!(stored.message.folder, "INBOX");

        for start in [10, 20] {
            let (inbox, work, stored) = session(start);
            assert_eq!((inbox, work), (UpsertOutcome::Unchanged, UpsertOutcome::Unchanged));
            assert_eq!(stored.message.folder, "INBOX");
        }
        let synced = ["INBOX".to_string(), "Work".to_string()];
        assert_eq!(do_settle_labels(&conn, "u", &synced, t(20), t(30)).unwrap(), 0);
    }

    #[test]
    fn settling_drops_unconfirmed_labels_and_refiles() {
        let conn = conn();
        do_upsert_message(&conn, "u", &msg("m1", "INBOX", &[]), t(0), t(1)).unwrap();
        do_upsert_message(&conn, "u", &msg("m1", "Archive", &[]), t(0), t(2)).unwrap();

        // Next session: only seen in Archive.
        let up =
            do_upsert_message(&conn, "u", &msg("m1", "Archive", &[]), t(10), t(11)).unwrap();
        assert_eq!(up.outcome, UpsertOutcome::Unchanged);

        let synced = ["INBOX".to_string(), "Archive".to_string()];
        assert_eq!(do_settle_labels(&conn, "u", &synced, t(10), t(12)).unwrap(), 1);
        let stored = do_load_message(&conn, "u", "m1").unwrap().unwrap();
        assert_eq!(stored.message.labels, BTreeSet::from(["Archive".to_string()]));
        assert_eq!(stored.message.folder, "Archive");
        assert_eq!(stored.updated_at, t(12));
        assert_eq!(do_remove_stale(&conn, "u", &synced, t(10)).unwrap(), 0);
    }

    #[test]
    fn settling_leaves_labels_outside_the_session() {
        let conn = conn();
        do_upsert_message(&conn, "u", &msg("m1", "INBOX", &[]), t(0), t(1)).unwrap();
        do_upsert_message(&conn, "u", &msg("m1", "Work", &[]), t(0), t(2)).unwrap();

        // A session over Work alone that does not see the message.
        let synced = ["Work".to_string()];
        assert_eq!(do_settle_labels(&conn, "u", &synced, t(10), t(11)).unwrap(), 1);
        let stored = do_load_message(&conn, "u", "m1").unwrap().unwrap();
        assert_eq!(stored.message.labels, BTreeSet::from(["INBOX".to_string()]));
        assert_eq!(stored.message.folder, "INBOX");
    }

    #[test]
    fn removing_a_folder_ignores_observation_time() {
        let conn = conn();
        let now = t(0);
        upsert(&conn, "u", &msg("a", "Old", &[]), now).unwrap();
        upsert(&conn, "u", &msg("b", "Old", &[]), now).unwrap();
        upsert(&conn, "u", &msg("c", "INBOX", &[]), now).unwrap();
        upsert(&conn, "other", &msg("a", "Old", &[]), now).unwrap();

        assert_eq!(do_remove_folder(&conn, "u", "Old").unwrap(), 2);
        assert_eq!(do_count_messages(&conn, "u").unwrap(), 1);
        assert_eq!(do_count_messages(&conn, "other").unwrap(), 1);
    }

    #[test]
    fn remove_stale_with_no_folders_is_empty() {
        let conn = conn();
        upsert(&conn, "u", &msg("m1", "INBOX", &[]), t(0)).unwrap();
        assert_eq!(do_remove_stale(&conn, "u", &[], t(100)).unwrap(), 0);
    }

    #[test]
    fn folder_listing_is_newest_first() {
        let conn = conn();
        let mut older = msg("older", "INBOX", &[]);
        older.date = t(0);
        let mut newer = msg("newer", "INBOX", &[]);
        newer.date = t(60);
        upsert(&conn, "u", &older, t(0)).unwrap();
        upsert(&conn, "u", &newer, t(0)).unwrap();

        let listed = do_load_folder_messages(&conn, "u", "INBOX", 10, 0).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.provider_id()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(do_load_folder_messages(&conn, "u", "INBOX", 1, 1).unwrap().len(), 1);
    }

    #[test]
    fn linked_tasks_survive_updates() {
        let conn = conn();
        upsert(&conn, "u", &msg("m1", "INBOX", &[]), t(0)).unwrap();
        let task = TaskRef { id: "card-1".into(), date: t(5) };
        let linked = do_link_task(&conn, "u", "m1", task.clone()).unwrap();
        assert_eq!(linked.tasks, vec![task.clone()]);

        // Linking twice is idempotent.
        let linked = do_link_task(&conn, "u", "m1", task.clone()).unwrap();
        assert_eq!(linked.tasks.len(), 1);

        let up = upsert(&conn, "u", &msg("m1", "INBOX", &["seen"]), t(10)).unwrap();
        assert_eq!(up.outcome, UpsertOutcome::Updated);
        assert_eq!(up.message.tasks, vec![task]);

        assert_eq!(
            do_link_task(&conn, "u", "nope", TaskRef { id: "x".into(), date: t(0) }).unwrap_err(),
            Error::MessageNotFound("nope".into())
        );
    }

    #[test]
    fn folder_directory_is_replaced_wholesale() {
        let conn = conn();
        let first = vec![Folder::new(0, "INBOX", '/'), Folder::new(1, "Old", '/')];
        do_replace_folders(&conn, "u", &first).unwrap();

        let mut inbox = Folder::new(0, "INBOX", '/');
        inbox.total = 12;
        let second = vec![inbox, Folder::new(1, "Work/Acme", '/')];
        do_replace_folders(&conn, "u", &second).unwrap();

        assert_eq!(do_load_folders(&conn, "u").unwrap(), second);
        assert!(do_load_folders(&conn, "other").unwrap().is_empty());
    }

    #[test]
    fn last_sync_round_trips() {
        let conn = conn();
        assert_eq!(do_last_sync(&conn, "u").unwrap(), None);
        do_set_last_sync(&conn, "u", t(0)).unwrap();
        do_set_last_sync(&conn, "u", t(0) + Duration::seconds(30)).unwrap();
        assert_eq!(do_last_sync(&conn, "u").unwrap(), Some(t(30)));
    }
}
