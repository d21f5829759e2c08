//! COSE_Sign1 envelopes for tokens and certificates, and the keys that sign them.
pub mod key;
pub mod sign1;

pub use key::{KeyAlgorithm, KeyEntry, KeyRing, SigningKey};
pub use sign1::CredentialKind;

use coset::iana;

/// Trait to represent the signature algorithm of a signer or verifier.
pub trait SignatureAlgorithm {
    fn algorithm(&self) -> iana::Algorithm;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input is not a well-formed envelope or does not carry the expected claims.
    #[error("unable to decode {what}: {reason}")]
    Decoding { what: &'static str, reason: String },
    /// The envelope verified but was minted for the other credential kind.
    #[error("{what} has unexpected content type {found:?}")]
    UnexpectedContentType {
        what: &'static str,
        found: Option<String>,
    },
    #[error("{0} signature did not verify against any accepted key")]
    SignatureInvalid(&'static str),
    #[error("no signing key is active")]
    NoActiveKey,
    #[error("unable to encode credential: {0}")]
    Encoding(String),
    #[error("key error: {0}")]
    Key(String),
}
