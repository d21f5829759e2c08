use crate::{config, cose, definitions::validity_info, store};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the credential lifecycle operations.
///
/// Every variant except [`Error::Internal`] is caused by the caller's input and is
/// safe to report back to the user. `Internal` means a collaborator (storage,
/// signing keys) is unavailable and should be reported as a service outage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input shape: unknown test type, bad date, wrong HMAC length.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The verification code does not exist.
    #[error("verification code not found")]
    NotFound,
    /// The code, token or certificate is past its expiry.
    #[error("{0} has expired")]
    Expired(&'static str),
    /// The verification code has already been redeemed.
    #[error("verification code has already been used")]
    AlreadyUsed,
    /// A token or certificate could not be decoded into the expected structure.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
    /// A token or certificate signature did not verify against any acceptable key.
    #[error("{0} signature is invalid")]
    SignatureInvalid(&'static str),
    /// Storage or key material is unavailable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure should be reported as service-unavailable rather than as a
    /// user-actionable error.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    pub(crate) fn malformed(what: &'static str, reason: impl ToString) -> Self {
        Error::Malformed {
            what,
            reason: reason.to_string(),
        }
    }
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Self {
        Error::Internal(format!("code store: {e}"))
    }
}

impl From<validity_info::Error> for Error {
    fn from(e: validity_info::Error) -> Self {
        Error::Internal(format!("validity: {e}"))
    }
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Error::Internal(format!("configuration: {e}"))
    }
}

impl From<cose::Error> for Error {
    fn from(e: cose::Error) -> Self {
        match e {
            cose::Error::Decoding { what, reason } => Error::Malformed { what, reason },
            cose::Error::UnexpectedContentType { what, .. } => {
                Error::malformed(what, "unexpected content type")
            }
            cose::Error::SignatureInvalid(what) => Error::SignatureInvalid(what),
            e @ (cose::Error::NoActiveKey | cose::Error::Encoding(_) | cose::Error::Key(_)) => {
                Error::Internal(e.to_string())
            }
        }
    }
}
