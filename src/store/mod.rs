//! Persistence for issued verification codes.
//!
//! The only mutation after issuance is [`CodeStore::consume`], which must be a
//! single linearizable check-and-set: among concurrent calls for the same code at
//! most one observes [`Consume::Consumed`].
pub mod memory;
pub mod sqlite;

pub use memory::MemoryCodeStore;
pub use sqlite::SqliteCodeStore;

use crate::definitions::VerificationCode;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record with the same code already exists.
    #[error("verification code already exists")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("timestamp out of range for storage")]
    Timestamp,
    #[error("code store lock poisoned")]
    Poisoned,
}

/// Result of an attempt to redeem a code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Consume {
    /// This call flipped the consumed flag. Carries the record as it now stands.
    Consumed(VerificationCode),
    NotFound,
    /// Past its expiry; the record was left untouched.
    Expired,
    AlreadyUsed,
}

pub trait CodeStore: Send + Sync {
    /// Store a freshly issued code. Fails with [`Error::Duplicate`] if the code is taken.
    fn insert(&self, record: &VerificationCode) -> Result<(), Error>;

    fn get(&self, code: &str) -> Result<Option<VerificationCode>, Error>;

    /// Mark the code consumed if, and only if, it exists, is unexpired at `now` and
    /// has not been consumed. Nothing is written on any other outcome.
    fn consume(&self, code: &str, now: OffsetDateTime) -> Result<Consume, Error>;

    /// Physically delete records that expired before `before`. Returns how many were
    /// removed. Housekeeping only; the lifecycle never depends on it.
    fn purge_expired(&self, before: OffsetDateTime) -> Result<usize, Error>;
}

impl std::fmt::Debug for dyn CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn CodeStore")
    }
}

impl<S: CodeStore + ?Sized> CodeStore for Arc<S> {
    fn insert(&self, record: &VerificationCode) -> Result<(), Error> {
        (**self).insert(record)
    }

    fn get(&self, code: &str) -> Result<Option<VerificationCode>, Error> {
        (**self).get(code)
    }

    fn consume(&self, code: &str, now: OffsetDateTime) -> Result<Consume, Error> {
        (**self).consume(code, now)
    }

    fn purge_expired(&self, before: OffsetDateTime) -> Result<usize, Error> {
        (**self).purge_expired(before)
    }
}
