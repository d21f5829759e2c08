//! Diagnosis verification for exposure notification.
//!
//! A health authority [issues](issuance::CodeIssuer) a short-lived, single-use
//! verification code for a diagnosis. The patient's device
//! [redeems](verification::CodeVerifier) it for a signed, long-term token, and
//! later exchanges that token together with an HMAC over its exposure keys for a
//! short-lived [certificate](issuance::CertificateIssuer) that a key server can
//! [validate](verification::CertificateValidator).
//!
//! Tokens and certificates are COSE_Sign1 envelopes around CBOR claims, encoded
//! as unpadded base64url.
//!
//! ```ignore
//! use enverify::{config::Config, service::VerificationService};
//!
//! let config = Config::from_file("enverify.toml".as_ref())?;
//! let service = VerificationService::from_config(&config)?;
//! ```
pub mod clock;
pub mod config;
pub mod cose;
pub mod definitions;
pub mod error;
pub mod issuance;
pub mod service;
pub mod store;
pub mod verification;

pub use error::{Error, Result};
