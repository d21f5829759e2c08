use ciborium::Value as CborValue;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Issuance and expiry instants of a token or certificate.
///
/// Encoded as a CBOR map of epoch-based date/times (tag 1), with whole second
/// precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub struct ValidityInfo {
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("When parsing a CBOR map, could not find required field: '{0}'")]
    MissingField(&'static str),
    #[error("Expected to parse a CBOR map, received: '{0:?}'")]
    NotAMap(CborValue),
    #[error("Expected to parse a CBOR integer, received: '{0:?}'")]
    NotAnInteger(Box<CborValue>),
    #[error("Expected to parse a CBOR tag (number {0}), received: '{1:?}'")]
    NotATag(u64, CborValue),
    #[error("Timestamp out of range: {0}")]
    OutOfRange(#[from] time::error::ComponentRange),
    #[error("validity lifetime overflows the supported time range")]
    Overflow,
    #[error("expiry {expires_at} precedes issuance {issued_at}")]
    Inverted {
        issued_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    },
}

const ISSUED_AT: &str = "iat";
const EXPIRES_AT: &str = "exp";
const EPOCH_TAG: u64 = 1;

impl ValidityInfo {
    /// Validity starting at `issued_at` (truncated to the second) lasting `lifetime`.
    pub fn starting_at(issued_at: OffsetDateTime, lifetime: Duration) -> Result<Self> {
        let issued_at = OffsetDateTime::from_unix_timestamp(issued_at.unix_timestamp())?;
        let expires_at = issued_at.checked_add(lifetime).ok_or(Error::Overflow)?;
        Self::new(issued_at, expires_at)
    }

    pub fn new(issued_at: OffsetDateTime, expires_at: OffsetDateTime) -> Result<Self> {
        if expires_at < issued_at {
            return Err(Error::Inverted {
                issued_at,
                expires_at,
            });
        }
        Ok(Self {
            issued_at,
            expires_at,
        })
    }

    /// Expiry is exclusive of the instant itself: a credential is still valid at
    /// exactly `expires_at`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }
}

impl From<ValidityInfo> for CborValue {
    fn from(v: ValidityInfo) -> CborValue {
        let entries = vec![
            (
                CborValue::Text(String::from(ISSUED_AT)),
                datetime_to_cbor(v.issued_at),
            ),
            (
                CborValue::Text(String::from(EXPIRES_AT)),
                datetime_to_cbor(v.expires_at),
            ),
        ];
        CborValue::Map(entries)
    }
}

impl TryFrom<CborValue> for ValidityInfo {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<ValidityInfo> {
        if let CborValue::Map(entries) = v {
            let mut issued_at = None;
            let mut expires_at = None;
            for (key, value) in entries {
                match key.as_text() {
                    Some(ISSUED_AT) => issued_at = Some(cbor_to_datetime(value)?),
                    Some(EXPIRES_AT) => expires_at = Some(cbor_to_datetime(value)?),
                    _ => {}
                }
            }
            let issued_at = issued_at.ok_or(Error::MissingField(ISSUED_AT))?;
            let expires_at = expires_at.ok_or(Error::MissingField(EXPIRES_AT))?;
            Self::new(issued_at, expires_at)
        } else {
            Err(Error::NotAMap(v))
        }
    }
}

fn datetime_to_cbor(t: OffsetDateTime) -> CborValue {
    CborValue::Tag(
        EPOCH_TAG,
        Box::new(CborValue::Integer(t.unix_timestamp().into())),
    )
}

fn cbor_to_datetime(v: CborValue) -> Result<OffsetDateTime> {
    if let CborValue::Tag(EPOCH_TAG, inner) = v {
        if let CborValue::Integer(secs) = inner.as_ref() {
            let secs = i64::try_from(*secs).map_err(|_| Error::NotAnInteger(inner.clone()))?;
            Ok(OffsetDateTime::from_unix_timestamp(secs)?)
        } else {
            Err(Error::NotAnInteger(inner))
        }
    } else {
        Err(Error::NotATag(EPOCH_TAG, v))
    }
}
