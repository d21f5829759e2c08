use super::{FullDate, TestType};
use time::OffsetDateTime;

/// A one-time verification code as persisted by a [`CodeStore`](crate::store::CodeStore).
///
/// A code is issued unconsumed and is consumed at most once. It expires by time
/// passing, never by a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationCode {
    /// The code itself, also the record key.
    pub code: String,
    pub test_type: TestType,
    pub symptom_date: Option<FullDate>,
    pub issued_at: OffsetDateTime,
    /// Fixed at issuance, never extended.
    pub expires_at: OffsetDateTime,
    pub consumed: bool,
}

impl VerificationCode {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}
