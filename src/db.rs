use std::fs;
use std::path::Path;

use anyhow::Result;
use rusqlite::{Connection, Row};

use crate::classify::{Role, Validation, ValidatedField};
use crate::extract::{FieldObservation, FieldType};

pub const DEFAULT_DB_PATH: &str = "data/formcap.sqlite";

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id         INTEGER PRIMARY KEY,
            timestamp  TEXT NOT NULL,
            url        TEXT NOT NULL,
            synced     BOOLEAN NOT NULL DEFAULT 0,
            duplicate  BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_timestamp ON sessions(timestamp);
        CREATE INDEX IF NOT EXISTS idx_sessions_pending ON sessions(synced, duplicate);
        CREATE INDEX IF NOT EXISTS idx_sessions_url ON sessions(url);

        CREATE TABLE IF NOT EXISTS session_fields (
            id          INTEGER PRIMARY KEY,
            session_id  INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            name        TEXT NOT NULL,
            value       TEXT NOT NULL,
            field_type  TEXT NOT NULL,
            element_id  TEXT NOT NULL DEFAULT '',
            placeholder TEXT NOT NULL DEFAULT '',
            required    BOOLEAN NOT NULL DEFAULT 0,
            role        TEXT NOT NULL,
            is_valid    BOOLEAN NOT NULL,
            message     TEXT NOT NULL,
            UNIQUE(session_id, position)
        );
        CREATE INDEX IF NOT EXISTS idx_fields_session ON session_fields(session_id);
        ",
    )?;
    Ok(())
}

/// One capture event as persisted: its valid fields in page order plus
/// the sync/duplicate flags.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub id: i64,
    pub timestamp: String,
    pub url: String,
    pub synced: bool,
    pub duplicate: bool,
    pub fields: Vec<ValidatedField>,
}

/// Insert a session with its fields. Sessions are born unsynced; only a
/// confirmed remote acceptance flips the flag. The caller owns the
/// surrounding transaction when the insert must be atomic with the
/// duplicate check.
pub fn insert_session(
    conn: &Connection,
    url: &str,
    timestamp: &str,
    duplicate: bool,
    fields: &[ValidatedField],
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sessions (timestamp, url, synced, duplicate) VALUES (?1, ?2, 0, ?3)",
        rusqlite::params![timestamp, url, duplicate],
    )?;
    let session_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT INTO session_fields
         (session_id, position, name, value, field_type, element_id, placeholder, required,
          role, is_valid, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for (position, field) in fields.iter().enumerate() {
        let o = &field.observation;
        let v = &field.validation;
        stmt.execute(rusqlite::params![
            session_id,
            position as i64,
            o.name,
            o.value,
            o.field_type.as_str(),
            o.element_id,
            o.placeholder,
            o.required,
            v.role.as_str(),
            v.is_valid,
            v.message,
        ])?;
    }
    Ok(session_id)
}

/// All sessions, newest first.
pub fn fetch_all(conn: &Connection) -> Result<Vec<StoredSession>> {
    fetch_sessions(conn, "ORDER BY id DESC", &[])
}

/// Sessions eligible for sync (unsynced, non-duplicate), oldest first.
pub fn fetch_pending(conn: &Connection) -> Result<Vec<StoredSession>> {
    fetch_sessions(conn, "WHERE synced = 0 AND duplicate = 0 ORDER BY id", &[])
}

/// Already-synced sessions for a URL; the duplicate-check history.
pub fn fetch_synced_for_url(conn: &Connection, url: &str) -> Result<Vec<StoredSession>> {
    fetch_sessions(conn, "WHERE synced = 1 AND url = ?1 ORDER BY id", &[&url])
}

fn fetch_sessions(
    conn: &Connection,
    tail: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<StoredSession>> {
    let sql = format!(
        "SELECT id, timestamp, url, synced, duplicate FROM sessions {}",
        tail
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut sessions = stmt
        .query_map(params, |row| {
            Ok(StoredSession {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                url: row.get(2)?,
                synced: row.get(3)?,
                duplicate: row.get(4)?,
                fields: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut field_stmt = conn.prepare(
        "SELECT name, value, field_type, element_id, placeholder, required, role, is_valid, message
         FROM session_fields WHERE session_id = ?1 ORDER BY position",
    )?;
    for session in &mut sessions {
        session.fields = field_stmt
            .query_map([session.id], row_to_field)?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(sessions)
}

fn row_to_field(row: &Row) -> rusqlite::Result<ValidatedField> {
    let field_type: String = row.get(2)?;
    let role: String = row.get(6)?;
    Ok(ValidatedField {
        observation: FieldObservation {
            name: row.get(0)?,
            value: row.get(1)?,
            field_type: FieldType::parse(&field_type),
            element_id: row.get(3)?,
            placeholder: row.get(4)?,
            required: row.get(5)?,
        },
        validation: Validation {
            role: Role::parse(&role),
            is_valid: row.get(7)?,
            message: row.get(8)?,
        },
    })
}

pub fn mark_synced(conn: &Connection, session_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET synced = 1 WHERE id = ?1",
        rusqlite::params![session_id],
    )?;
    Ok(())
}

/// Empty the entire store. Returns the number of sessions removed.
pub fn clear_all(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM session_fields", [])?;
    let removed = tx.execute("DELETE FROM sessions", [])?;
    tx.commit()?;
    Ok(removed)
}

pub struct Stats {
    pub total: usize,
    pub synced: usize,
    pub duplicates: usize,
    pub pending: usize,
    pub fields: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
    let synced: usize =
        conn.query_row("SELECT COUNT(*) FROM sessions WHERE synced = 1", [], |r| r.get(0))?;
    let duplicates: usize =
        conn.query_row("SELECT COUNT(*) FROM sessions WHERE duplicate = 1", [], |r| {
            r.get(0)
        })?;
    let pending: usize = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE synced = 0 AND duplicate = 0",
        [],
        |r| r.get(0),
    )?;
    let fields: usize = conn.query_row("SELECT COUNT(*) FROM session_fields", [], |r| r.get(0))?;
    Ok(Stats {
        total,
        synced,
        duplicates,
        pending,
        fields,
    })
}

// ── Tests ──

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classify::validate;

    pub fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    pub fn field(name: &str, value: &str) -> ValidatedField {
        let observation = FieldObservation {
            name: name.to_string(),
            value: value.to_string(),
            field_type: FieldType::Text,
            element_id: String::new(),
            placeholder: String::new(),
            required: false,
        };
        let validation = validate(&observation);
        ValidatedField {
            observation,
            validation,
        }
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let conn = memory_store();
        let fields = vec![field("name", "John Doe"), field("email", "a@b.co")];
        let id = insert_session(&conn, "https://x.test", "2026-01-01T00:00:00Z", false, &fields)
            .unwrap();

        let sessions = fetch_all(&conn).unwrap();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, id);
        assert_eq!(s.url, "https://x.test");
        assert!(!s.synced);
        assert!(!s.duplicate);
        assert_eq!(s.fields, fields);
    }

    #[test]
    fn listing_is_newest_first_pending_is_oldest_first() {
        let conn = memory_store();
        let a = insert_session(&conn, "https://a.test", "t1", false, &[field("email", "a@b.co")])
            .unwrap();
        let b = insert_session(&conn, "https://b.test", "t2", false, &[field("email", "c@d.co")])
            .unwrap();

        let all: Vec<i64> = fetch_all(&conn).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(all, vec![b, a]);
        let pending: Vec<i64> = fetch_pending(&conn).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(pending, vec![a, b]);
    }

    #[test]
    fn pending_excludes_synced_and_duplicates() {
        let conn = memory_store();
        let synced =
            insert_session(&conn, "https://x.test", "t1", false, &[field("e", "v")]).unwrap();
        mark_synced(&conn, synced).unwrap();
        insert_session(&conn, "https://x.test", "t2", true, &[field("e", "v")]).unwrap();
        let open =
            insert_session(&conn, "https://x.test", "t3", false, &[field("e", "v")]).unwrap();

        let pending = fetch_pending(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open);
    }

    #[test]
    fn synced_history_is_per_url() {
        let conn = memory_store();
        let id = insert_session(&conn, "https://x.test", "t1", false, &[field("e", "v")]).unwrap();
        mark_synced(&conn, id).unwrap();
        insert_session(&conn, "https://y.test", "t2", false, &[field("e", "v")]).unwrap();

        assert_eq!(fetch_synced_for_url(&conn, "https://x.test").unwrap().len(), 1);
        assert!(fetch_synced_for_url(&conn, "https://y.test").unwrap().is_empty());
    }

    #[test]
    fn clear_all_empties_the_store() {
        let conn = memory_store();
        insert_session(&conn, "https://x.test", "t1", false, &[field("e", "v")]).unwrap();
        insert_session(&conn, "https://x.test", "t2", false, &[field("e", "v")]).unwrap();
        assert_eq!(clear_all(&conn).unwrap(), 2);
        assert!(fetch_all(&conn).unwrap().is_empty());
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.fields, 0);
    }

    #[test]
    fn stats_count_by_state() {
        let conn = memory_store();
        let a = insert_session(&conn, "u", "t1", false, &[field("e", "v"), field("n", "w")])
            .unwrap();
        mark_synced(&conn, a).unwrap();
        insert_session(&conn, "u", "t2", true, &[field("e", "v")]).unwrap();
        insert_session(&conn, "u", "t3", false, &[field("e", "v")]).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.fields, 4);
    }
}
