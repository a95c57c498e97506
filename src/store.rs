//! Persistence layer (`spec.md` §4.2). One sqlite file, opened once at
//! startup, wrapped in a `Mutex<Connection>` exactly like the teacher's
//! `Db`. No migration versioning — schema changes are additive
//! `CREATE TABLE IF NOT EXISTS` statements, matching the open question in
//! `spec.md` §9 (a single-process hub does not need a migration framework).

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::HubResult;
use crate::protocol::{Room, RoomStatus, Session, SessionStatus};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> HubResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Store { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> HubResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Store { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> HubResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                wire_json TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rooms (
                room_id TEXT PRIMARY KEY,
                wire_json TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sent_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                UNIQUE (session_id, message_id)
            );
            CREATE TABLE IF NOT EXISTS pending_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                room_id TEXT,
                sender TEXT NOT NULL,
                message_id TEXT NOT NULL UNIQUE,
                body_json TEXT NOT NULL,
                received_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(())
    }

    // ---- sessions ----------------------------------------------------

    pub fn save_session(&self, session: &Session) -> HubResult<()> {
        let conn = self.conn.lock().unwrap();
        let wire = session.to_wire().to_string();
        let status = session_status_str(session.status);
        conn.execute(
            "INSERT INTO sessions (session_id, wire_json, status, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(session_id) DO UPDATE SET wire_json = ?2, status = ?3, updated_at = datetime('now')",
            params![session.session_id, wire, status],
        )?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> HubResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let wire: Option<String> = conn
            .query_row("SELECT wire_json FROM sessions WHERE session_id = ?1", params![session_id], |row| row.get(0))
            .optional()?;
        match wire {
            Some(json) => {
                let value: Value = serde_json::from_str(&json).map_err(|e| crate::error::HubError::Parse(e.to_string()))?;
                Ok(Some(Session::from_wire(&value)?))
            }
            None => Ok(None),
        }
    }

    pub fn load_active_sessions(&self) -> HubResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT wire_json FROM sessions WHERE status = ?1")?;
        let rows = stmt.query_map(params![session_status_str(SessionStatus::Negotiating)], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let value: Value = serde_json::from_str(&json).map_err(|e| crate::error::HubError::Parse(e.to_string()))?;
            out.push(Session::from_wire(&value)?);
        }
        Ok(out)
    }

    // ---- rooms ---------------------------------------------------------

    pub fn save_room(&self, room: &Room) -> HubResult<()> {
        let conn = self.conn.lock().unwrap();
        let wire = room.to_wire().to_string();
        let status = room_status_str(room.status);
        conn.execute(
            "INSERT INTO rooms (room_id, wire_json, status, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(room_id) DO UPDATE SET wire_json = ?2, status = ?3, updated_at = datetime('now')",
            params![room.room_id, wire, status],
        )?;
        Ok(())
    }

    pub fn load_room(&self, room_id: &str) -> HubResult<Option<Room>> {
        let conn = self.conn.lock().unwrap();
        let wire: Option<String> = conn
            .query_row("SELECT wire_json FROM rooms WHERE room_id = ?1", params![room_id], |row| row.get(0))
            .optional()?;
        match wire {
            Some(json) => {
                let value: Value = serde_json::from_str(&json).map_err(|e| crate::error::HubError::Parse(e.to_string()))?;
                Ok(Some(Room::from_wire(&value)?))
            }
            None => Ok(None),
        }
    }

    pub fn load_open_rooms(&self) -> HubResult<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT wire_json FROM rooms WHERE status = ?1")?;
        let rows = stmt.query_map(params![room_status_str(RoomStatus::Open)], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let value: Value = serde_json::from_str(&json).map_err(|e| crate::error::HubError::Parse(e.to_string()))?;
            out.push(Room::from_wire(&value)?);
        }
        Ok(out)
    }

    // ---- sent message ids (dedup for threading headers) -----------------

    pub fn save_message_id(&self, session_id: &str, message_id: &str) -> HubResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sent_messages (session_id, message_id) VALUES (?1, ?2)",
            params![session_id, message_id],
        )?;
        Ok(())
    }

    /// Message ids in send order (oldest first); the last element is the
    /// most recently sent message for this thread, used for `In-Reply-To`.
    pub fn load_message_ids(&self, session_id: &str) -> HubResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT message_id FROM sent_messages WHERE session_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- pending inbound mail (store-first, I6) -------------------------

    /// Persists an inbound message before any state mutation happens. Unique
    /// on `message_id`, so a re-fetched duplicate is silently dropped —
    /// at-most-once processing (I6) without needing transport-side dedup.
    pub fn save_pending(
        &self,
        session_id: Option<&str>,
        room_id: Option<&str>,
        sender: &str,
        message_id: &str,
        body: &Value,
    ) -> HubResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO pending_emails
                (session_id, room_id, sender, message_id, body_json, received_at, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'), 0)",
            params![session_id, room_id, sender, message_id, body.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Ordered by `received_at` (ties broken by insertion order via `id`) per
    /// `spec.md` §4.3's FIFO-per-round-gated-entity ordering guarantee.
    pub fn load_pending_for_session(&self, session_id: &str) -> HubResult<Vec<PendingEmail>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sender, message_id, body_json FROM pending_emails
             WHERE session_id = ?1 AND processed = 0
             ORDER BY received_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], pending_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn load_pending_for_room(&self, room_id: &str) -> HubResult<Vec<PendingEmail>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sender, message_id, body_json FROM pending_emails
             WHERE room_id = ?1 AND processed = 0
             ORDER BY received_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![room_id], pending_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn mark_processed(&self, pending_id: i64) -> HubResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE pending_emails SET processed = 1 WHERE id = ?1", params![pending_id])?;
        Ok(())
    }
}

pub struct PendingEmail {
    pub id: i64,
    pub sender: String,
    pub message_id: String,
    pub body: Value,
}

fn pending_from_row(row: &rusqlite::Row) -> rusqlite::Result<PendingEmail> {
    let body_str: String = row.get(3)?;
    let body: Value = serde_json::from_str(&body_str).unwrap_or(Value::Null);
    Ok(PendingEmail {
        id: row.get(0)?,
        sender: row.get(1)?,
        message_id: row.get(2)?,
        body,
    })
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Negotiating => "negotiating",
        SessionStatus::Confirmed => "confirmed",
        SessionStatus::Escalated => "escalated",
    }
}

fn room_status_str(status: RoomStatus) -> &'static str {
    match status {
        RoomStatus::Open => "open",
        RoomStatus::Finalized => "finalized",
    }
}
