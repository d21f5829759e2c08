//! SQLite-backed code store.
//!
//! Redemption is one conditional `UPDATE … RETURNING` statement, so it stays
//! atomic even when several processes share the database file. Timestamps are
//! stored as Unix nanoseconds so expiry comparisons match the in-memory store
//! exactly.
use super::{CodeStore, Consume, Error};
use crate::definitions::{FullDate, TestType, VerificationCode};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS verification_codes (
        code TEXT PRIMARY KEY NOT NULL,
        test_type TEXT NOT NULL,
        symptom_date TEXT,
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        consumed INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_verification_codes_expires
        ON verification_codes(expires_at);
";

const COLUMNS: &str = "code, test_type, symptom_date, issued_at, expires_at, consumed";

pub struct SqliteCodeStore {
    conn: Mutex<Connection>,
}

impl SqliteCodeStore {
    /// Open (or create) the database at `path`.
    ///
    /// `busy_timeout` bounds how long a statement waits on a lock held by another
    /// connection before failing.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        Self::init(conn, busy_timeout)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, Error> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }
}

impl std::fmt::Debug for SqliteCodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCodeStore").finish_non_exhaustive()
    }
}

impl CodeStore for SqliteCodeStore {
    fn insert(&self, record: &VerificationCode) -> Result<(), Error> {
        let conn = self.lock()?;
        let result = conn.execute(
            &format!("INSERT INTO verification_codes ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                record.code,
                record.test_type.as_ref(),
                record.symptom_date.map(|d| d.to_string()),
                to_nanos(record.issued_at)?,
                to_nanos(record.expires_at)?,
                record.consumed,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, code: &str) -> Result<Option<VerificationCode>, Error> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM verification_codes WHERE code = ?1"),
                params![code],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn consume(&self, code: &str, now: OffsetDateTime) -> Result<Consume, Error> {
        let conn = self.lock()?;
        let now = to_nanos(now)?;

        let consumed = conn
            .query_row(
                &format!(
                    "UPDATE verification_codes SET consumed = 1 \
                     WHERE code = ?1 AND consumed = 0 AND expires_at >= ?2 \
                     RETURNING {COLUMNS}"
                ),
                params![code, now],
                record_from_row,
            )
            .optional()?;
        if let Some(record) = consumed {
            return Ok(Consume::Consumed(record));
        }

        // Nothing was written; work out why.
        let state: Option<(i64, bool)> = conn
            .query_row(
                "SELECT expires_at, consumed FROM verification_codes WHERE code = ?1",
                params![code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match state {
            None => Consume::NotFound,
            Some((expires_at, _)) if now > expires_at => Consume::Expired,
            Some(_) => Consume::AlreadyUsed,
        })
    }

    fn purge_expired(&self, before: OffsetDateTime) -> Result<usize, Error> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM verification_codes WHERE expires_at < ?1",
            params![to_nanos(before)?],
        )?;
        Ok(removed)
    }
}

fn to_nanos(t: OffsetDateTime) -> Result<i64, Error> {
    i64::try_from(t.unix_timestamp_nanos()).map_err(|_| Error::Timestamp)
}

fn conversion_error(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn from_nanos(column: usize, nanos: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| conversion_error(column, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationCode> {
    let test_type: String = row.get(1)?;
    let symptom_date: Option<String> = row.get(2)?;
    Ok(VerificationCode {
        code: row.get(0)?,
        test_type: TestType::from_str(&test_type).map_err(|e| conversion_error(1, e))?,
        symptom_date: symptom_date
            .as_deref()
            .map(FullDate::from_str)
            .transpose()
            .map_err(|e| conversion_error(2, e))?,
        issued_at: from_nanos(3, row.get(3)?)?,
        expires_at: from_nanos(4, row.get(4)?)?,
        consumed: row.get(5)?,
    })
}
