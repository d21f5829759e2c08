use crate::{
    clock::Clock,
    definitions::{FullDate, TestType, VerificationCode},
    store::{self, CodeStore},
    Error, Result,
};
use rand::{rngs::OsRng, Rng};
use std::sync::Arc;
use time::{
    format_description::FormatItem, macros::format_description, Duration, OffsetDateTime,
    UtcOffset,
};
use tracing::instrument;

/// Symbols used for codes: digits and upper case letters without `0`, `1`, `I`
/// and `O`, so a code read aloud or typed by hand is unambiguous.
pub const CODE_ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Shortest code length accepted by [`CodePolicy::validate`].
pub const MIN_CODE_LENGTH: usize = 8;

const MAX_INSERT_ATTEMPTS: usize = 5;

const RFC1123: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] UTC"
);

/// How codes are minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodePolicy {
    /// Number of symbols; each carries 5 bits of entropy.
    pub length: usize,
    /// Minimum time a code stays redeemable. The expiry is rounded up to the next
    /// whole second so its RFC 1123 and unix forms are exact.
    pub lifetime: Duration,
    /// Symptom dates older than this are refused. `None` accepts any past date.
    pub max_symptom_age: Option<Duration>,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            length: 16,
            lifetime: Duration::minutes(15),
            max_symptom_age: Some(Duration::days(14)),
        }
    }
}

impl CodePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.length < MIN_CODE_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "code length must be at least {MIN_CODE_LENGTH}, got {}",
                self.length
            )));
        }
        if !self.lifetime.is_positive() {
            return Err(Error::InvalidArgument(
                "code lifetime must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A freshly issued code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    pub code: String,
    pub test_type: TestType,
    pub symptom_date: Option<FullDate>,
    pub expires_at: OffsetDateTime,
}

impl IssuedCode {
    /// The expiry formatted as RFC 1123 in UTC, e.g. `Mon, 15 Jan 2024 10:15:00 UTC`.
    pub fn expires_at_rfc1123(&self) -> Result<String> {
        self.expires_at
            .to_offset(UtcOffset::UTC)
            .format(RFC1123)
            .map_err(|e| Error::Internal(format!("unable to format expiry: {e}")))
    }

    /// The expiry in seconds since the Unix epoch.
    pub fn expires_at_timestamp(&self) -> i64 {
        self.expires_at.unix_timestamp()
    }
}

/// Mints one-time verification codes and records them in a [`CodeStore`].
#[derive(Debug)]
pub struct CodeIssuer<S> {
    store: S,
    clock: Arc<dyn Clock>,
    policy: CodePolicy,
}

impl<S: CodeStore> CodeIssuer<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, policy: CodePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    /// Issue a new code for the given diagnosis.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the symptom date lies in the future (or further in the
    /// past than the policy allows), `Internal` if the store is unavailable or no
    /// unused code could be generated.
    #[instrument(level = "debug", skip(self))]
    pub fn issue(&self, test_type: TestType, symptom_date: Option<FullDate>) -> Result<IssuedCode> {
        let now = self.clock.now();
        if let Some(date) = symptom_date {
            self.check_symptom_date(date, now)?;
        }

        let issued_at = now;
        let expires_at = issued_at
            .checked_add(self.policy.lifetime)
            .and_then(ceil_to_second)
            .ok_or_else(|| Error::Internal("code expiry out of range".into()))?;

        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            let record = VerificationCode {
                code: generate_code(self.policy.length),
                test_type,
                symptom_date,
                issued_at,
                expires_at,
                consumed: false,
            };
            match self.store.insert(&record) {
                Ok(()) => {
                    tracing::info!(%test_type, %expires_at, "issued verification code");
                    return Ok(IssuedCode {
                        code: record.code,
                        test_type,
                        symptom_date,
                        expires_at,
                    });
                }
                Err(store::Error::Duplicate) => {
                    tracing::warn!(attempt, "generated code collided with an existing one");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Internal(format!(
            "unable to generate an unused code in {MAX_INSERT_ATTEMPTS} attempts"
        )))
    }

    fn check_symptom_date(&self, date: FullDate, now: OffsetDateTime) -> Result<()> {
        if date > FullDate::of(now) {
            return Err(Error::InvalidArgument(format!(
                "symptom date {date} is in the future"
            )));
        }
        if let Some(max_age) = self.policy.max_symptom_age {
            let oldest = now
                .checked_sub(max_age)
                .map(FullDate::of)
                .unwrap_or_else(|| FullDate::new(time::Date::MIN));
            if date < oldest {
                return Err(Error::InvalidArgument(format!(
                    "symptom date {date} is older than {} days",
                    max_age.whole_days()
                )));
            }
        }
        Ok(())
    }
}

fn ceil_to_second(at: OffsetDateTime) -> Option<OffsetDateTime> {
    if at.nanosecond() == 0 {
        return Some(at);
    }
    OffsetDateTime::from_unix_timestamp(at.unix_timestamp().checked_add(1)?).ok()
}

fn generate_code(length: usize) -> String {
    (0..length)
        .map(|_| CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::{Consume, MemoryCodeStore};
    use std::collections::HashSet;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-01-20 10:00:00.400 UTC);

    fn issuer() -> CodeIssuer<Arc<MemoryCodeStore>> {
        CodeIssuer::new(
            Arc::new(MemoryCodeStore::new()),
            Arc::new(MockClock::new(NOW)),
            CodePolicy::default(),
        )
    }

    fn date(s: &str) -> FullDate {
        FullDate::from_str(s).unwrap()
    }

    #[test]
    fn issue_stores_unconsumed_code() {
        let issuer = issuer();
        let issued = issuer
            .issue(TestType::Confirmed, Some(date("2024-01-15")))
            .unwrap();

        assert_eq!(issued.code.len(), 16);
        assert!(issued.code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert_eq!(issued.expires_at, datetime!(2024-01-20 10:15:01 UTC));
        assert!(issued.expires_at - NOW >= CodePolicy::default().lifetime);

        let stored = issuer.store.get(&issued.code).unwrap().unwrap();
        assert!(!stored.consumed);
        assert_eq!(stored.test_type, TestType::Confirmed);
        assert_eq!(stored.symptom_date, Some(date("2024-01-15")));
        assert_eq!(stored.expires_at, issued.expires_at);
    }

    #[test]
    fn expiry_forms() {
        let issued = issuer().issue(TestType::Likely, None).unwrap();
        assert_eq!(
            issued.expires_at_rfc1123().unwrap(),
            "Sat, 20 Jan 2024 10:15:01 UTC"
        );
        assert_eq!(issued.expires_at_timestamp(), 1705745701);
    }

    #[test]
    fn whole_second_issuance_keeps_exact_expiry() {
        let issuer = CodeIssuer::new(
            Arc::new(MemoryCodeStore::new()),
            Arc::new(MockClock::new(datetime!(2024-01-20 10:00 UTC))),
            CodePolicy::default(),
        );
        let issued = issuer.issue(TestType::Likely, None).unwrap();
        assert_eq!(issued.expires_at, datetime!(2024-01-20 10:15 UTC));
    }

    #[test]
    fn symptom_date_bounds() {
        let issuer = issuer();
        assert!(issuer
            .issue(TestType::Confirmed, Some(date("2024-01-20")))
            .is_ok());
        assert!(issuer
            .issue(TestType::Confirmed, Some(date("2024-01-06")))
            .is_ok());
        assert!(matches!(
            issuer.issue(TestType::Confirmed, Some(date("2024-01-21"))),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            issuer.issue(TestType::Confirmed, Some(date("2024-01-05"))),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!issuer.store.is_empty().unwrap());
    }

    #[test]
    fn unlimited_symptom_age() {
        let issuer = CodeIssuer::new(
            MemoryCodeStore::new(),
            Arc::new(MockClock::new(NOW)),
            CodePolicy {
                max_symptom_age: None,
                ..CodePolicy::default()
            },
        );
        assert!(issuer
            .issue(TestType::Negative, Some(date("2020-03-01")))
            .is_ok());
    }

    #[test]
    fn codes_are_distinct() {
        let issuer = issuer();
        let codes: HashSet<String> = (0..200)
            .map(|_| issuer.issue(TestType::Likely, None).unwrap().code)
            .collect();
        assert_eq!(codes.len(), 200);
    }

    #[test]
    fn policy_validation() {
        assert!(CodePolicy::default().validate().is_ok());
        let short = CodePolicy {
            length: 6,
            ..CodePolicy::default()
        };
        assert!(matches!(short.validate(), Err(Error::InvalidArgument(_))));
        let instant = CodePolicy {
            lifetime: Duration::ZERO,
            ..CodePolicy::default()
        };
        assert!(instant.validate().is_err());
    }

    /// Rejects the first `collisions` inserts as duplicates.
    #[derive(Debug, Default)]
    struct CollidingStore {
        collisions: usize,
        attempts: AtomicUsize,
        inner: MemoryCodeStore,
    }

    impl CodeStore for CollidingStore {
        fn insert(&self, record: &VerificationCode) -> Result<(), store::Error> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.collisions {
                return Err(store::Error::Duplicate);
            }
            self.inner.insert(record)
        }

        fn get(&self, code: &str) -> Result<Option<VerificationCode>, store::Error> {
            self.inner.get(code)
        }

        fn consume(&self, code: &str, now: OffsetDateTime) -> Result<Consume, store::Error> {
            self.inner.consume(code, now)
        }

        fn purge_expired(&self, before: OffsetDateTime) -> Result<usize, store::Error> {
            self.inner.purge_expired(before)
        }
    }

    #[test]
    fn collisions_are_retried_then_give_up() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(NOW));
        let store = CollidingStore {
            collisions: 2,
            ..Default::default()
        };
        let issuer = CodeIssuer::new(store, clock.clone(), CodePolicy::default());
        assert!(issuer.issue(TestType::Likely, None).is_ok());
        assert_eq!(issuer.store.attempts.load(Ordering::SeqCst), 3);

        let store = CollidingStore {
            collisions: usize::MAX,
            ..Default::default()
        };
        let issuer = CodeIssuer::new(store, clock, CodePolicy::default());
        let err = issuer.issue(TestType::Likely, None).unwrap_err();
        assert!(err.is_internal());
    }
}
