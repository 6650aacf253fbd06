//! SQLite-backed session storage.
//!
//! One row per token; the token is the primary key and the row carries the
//! terminal target, so an executable lookup resolves the injection target
//! without a second query.
//!
//! The store exclusively owns persistence and mutation of session records.
//! Other components read through `lookup`/`find_active_for_receiver` and
//! mutate only through `record_usage`/`remove`; nobody holds a stale record
//! to decide authorization later.
//!
//! # Concurrency
//!
//! All access goes through one serialized connection, and `record_usage` is
//! a single conditional `UPDATE` that increments the counter and flips the
//! status in the same statement. Concurrent replies on the same token
//! therefore can never both observe a below-budget counter and both proceed.

use crate::error::{RelayError, RelayResult};
use crate::session::{SessionRecord, SessionStatus};
use crate::token;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Attempts to allocate a unique token before giving up. At 36^8 live
/// tokens per node this never triggers in practice.
const MAX_TOKEN_RETRIES: usize = 8;

/// Outcome of a `record_usage` call.
#[derive(Debug)]
pub enum UsageOutcome {
    /// Counter incremented; the returned record reflects the new state
    /// (status is `Exhausted` when this increment spent the final slot).
    Updated(SessionRecord),
    /// No live record for the token.
    NotFound,
    /// Record exists but its budget is already spent.
    BudgetExceeded,
}

/// SQLite-backed store for relay sessions.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Open (or create) the session database at the given path.
    pub fn new(db_path: &Path) -> RelayResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RelayError::Store(e.to_string()))?;
        }
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests and local dry runs.
    pub fn in_memory() -> RelayResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> RelayResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS relay_sessions (
                token             TEXT PRIMARY KEY,
                channel           TEXT NOT NULL,
                receiver_identity TEXT NOT NULL,
                terminal_target   TEXT NOT NULL,
                created_at        INTEGER NOT NULL,
                expires_at        INTEGER NOT NULL,
                command_count     INTEGER NOT NULL,
                max_commands      INTEGER NOT NULL,
                status            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_relay_sessions_receiver
                ON relay_sessions(channel, receiver_identity);",
        )?;
        Ok(())
    }

    fn lock(&self) -> RelayResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Store(format!("lock poisoned: {e}")))
    }

    /// Create a session bound to a terminal target.
    ///
    /// Allocates a token unique among live records, reclaiming any expired
    /// row whose token value collides. `ttl` is normally 24h; tests pass
    /// negative durations to fabricate already-expired sessions.
    pub fn create(
        &self,
        channel: &str,
        receiver_identity: &str,
        terminal_target: &str,
        max_commands: u32,
        ttl: Duration,
    ) -> RelayResult<SessionRecord> {
        let conn = self.lock()?;
        let now = Utc::now();
        let expires_at = now + ttl;

        for _ in 0..MAX_TOKEN_RETRIES {
            let candidate = token::generate();

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT expires_at FROM relay_sessions WHERE token = ?1",
                    params![candidate],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(expiry) if expiry <= now.timestamp() => {
                    // Expired row: its token value may be reissued.
                    conn.execute(
                        "DELETE FROM relay_sessions WHERE token = ?1",
                        params![candidate],
                    )?;
                }
                Some(_) => continue, // live collision, regenerate
                None => {}
            }

            conn.execute(
                "INSERT INTO relay_sessions (
                    token, channel, receiver_identity, terminal_target,
                    created_at, expires_at, command_count, max_commands, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 'active')",
                params![
                    candidate,
                    channel,
                    receiver_identity,
                    terminal_target,
                    now.timestamp(),
                    expires_at.timestamp(),
                    max_commands,
                ],
            )?;

            return Ok(SessionRecord {
                token: candidate,
                channel: channel.to_string(),
                receiver_identity: receiver_identity.to_string(),
                terminal_target: terminal_target.to_string(),
                created_at: now,
                expires_at,
                command_count: 0,
                max_commands,
                status: SessionStatus::Active,
            });
        }

        Err(RelayError::Store(
            "could not allocate a unique session token".into(),
        ))
    }

    /// Look up a session that has not passed its TTL.
    ///
    /// An expired row is deleted on the way out, so a second lookup on the
    /// same token is not-found; this lazy policy is the store's only
    /// reclamation path besides [`Self::purge_expired`]. Exhausted rows are
    /// returned as-is and stay until they expire, so replies against a
    /// spent budget can be answered with the budget error rather than
    /// not-found.
    pub fn lookup(&self, tok: &str) -> RelayResult<Option<SessionRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT token, channel, receiver_identity, terminal_target,
                        created_at, expires_at, command_count, max_commands, status
                 FROM relay_sessions WHERE token = ?1",
                params![tok],
                map_row,
            )
            .optional()?;

        let Some(record) = record else {
            return Ok(None);
        };

        if record.is_expired_at(Utc::now()) {
            conn.execute("DELETE FROM relay_sessions WHERE token = ?1", params![tok])?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Consume one command budget slot.
    ///
    /// The increment-and-check is a single conditional UPDATE: it only
    /// applies while the record is active, unexpired and below budget, and
    /// it flips the status to `exhausted` in the same statement when this
    /// increment reaches the budget.
    pub fn record_usage(&self, tok: &str) -> RelayResult<UsageOutcome> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();

        let updated = conn.execute(
            "UPDATE relay_sessions
             SET command_count = command_count + 1,
                 status = CASE WHEN command_count + 1 >= max_commands
                               THEN 'exhausted' ELSE status END
             WHERE token = ?1
               AND status = 'active'
               AND expires_at > ?2
               AND command_count < max_commands",
            params![tok, now],
        )?;

        if updated == 1 {
            let record = conn.query_row(
                "SELECT token, channel, receiver_identity, terminal_target,
                        created_at, expires_at, command_count, max_commands, status
                 FROM relay_sessions WHERE token = ?1",
                params![tok],
                map_row,
            )?;
            return Ok(UsageOutcome::Updated(record));
        }

        // The conditional update missed: distinguish dead from over-budget.
        let record = conn
            .query_row(
                "SELECT token, channel, receiver_identity, terminal_target,
                        created_at, expires_at, command_count, max_commands, status
                 FROM relay_sessions WHERE token = ?1",
                params![tok],
                map_row,
            )
            .optional()?;

        match record {
            None => Ok(UsageOutcome::NotFound),
            Some(r) if r.is_expired_at(Utc::now()) => {
                conn.execute("DELETE FROM relay_sessions WHERE token = ?1", params![tok])?;
                Ok(UsageOutcome::NotFound)
            }
            Some(_) => Ok(UsageOutcome::BudgetExceeded),
        }
    }

    /// Explicitly delete a session.
    ///
    /// Used when an exhausted session is retired and as rollback when the
    /// outbound notification carrying the token fails to send.
    pub fn remove(&self, tok: &str) -> RelayResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM relay_sessions WHERE token = ?1", params![tok])?;
        Ok(deleted > 0)
    }

    /// Most recent live session bound to an authenticated sender.
    ///
    /// Reduced-trust fallback for replies that omit the token: only matches
    /// records whose receiver identity equals the sender, on the same channel.
    pub fn find_active_for_receiver(
        &self,
        channel: &str,
        receiver_identity: &str,
    ) -> RelayResult<Option<SessionRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT token, channel, receiver_identity, terminal_target,
                        created_at, expires_at, command_count, max_commands, status
                 FROM relay_sessions
                 WHERE channel = ?1 AND receiver_identity = ?2
                   AND status = 'active' AND expires_at > ?3
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![channel, receiver_identity, Utc::now().timestamp()],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Delete every record past its TTL. Nothing schedules this; it exists
    /// for operators who want a cron-style sweep on top of lazy expiry.
    pub fn purge_expired(&self) -> RelayResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM relay_sessions WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(deleted)
    }

    /// Number of stored records, live or dead. Test and debug helper.
    pub fn len(&self) -> RelayResult<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM relay_sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> RelayResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// Map a database row to a session record.
fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status: String = row.get(8)?;
    Ok(SessionRecord {
        token: row.get(0)?,
        channel: row.get(1)?,
        receiver_identity: row.get(2)?,
        terminal_target: row.get(3)?,
        created_at: timestamp_to_utc(row.get(4)?),
        expires_at: timestamp_to_utc(row.get(5)?),
        command_count: row.get::<_, i64>(6)? as u32,
        max_commands: row.get::<_, i64>(7)? as u32,
        status: SessionStatus::parse(&status),
    })
}
