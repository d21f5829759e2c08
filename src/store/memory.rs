use super::{CodeStore, Consume, Error};
use crate::definitions::VerificationCode;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

/// A process-local code store.
///
/// Records live in a single map behind one mutex, so every check-and-set happens
/// inside one critical section.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    codes: Mutex<HashMap<String, VerificationCode>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VerificationCode>>, Error> {
        self.codes.lock().map_err(|_| Error::Poisoned)
    }
}

impl CodeStore for MemoryCodeStore {
    fn insert(&self, record: &VerificationCode) -> Result<(), Error> {
        let mut codes = self.lock()?;
        if codes.contains_key(&record.code) {
            return Err(Error::Duplicate);
        }
        codes.insert(record.code.clone(), record.clone());
        Ok(())
    }

    fn get(&self, code: &str) -> Result<Option<VerificationCode>, Error> {
        Ok(self.lock()?.get(code).cloned())
    }

    fn consume(&self, code: &str, now: OffsetDateTime) -> Result<Consume, Error> {
        let mut codes = self.lock()?;
        let Some(record) = codes.get_mut(code) else {
            return Ok(Consume::NotFound);
        };
        if record.is_expired(now) {
            return Ok(Consume::Expired);
        }
        if record.consumed {
            return Ok(Consume::AlreadyUsed);
        }
        record.consumed = true;
        Ok(Consume::Consumed(record.clone()))
    }

    fn purge_expired(&self, before: OffsetDateTime) -> Result<usize, Error> {
        let mut codes = self.lock()?;
        let count = codes.len();
        codes.retain(|_, record| record.expires_at >= before);
        Ok(count - codes.len())
    }
}
