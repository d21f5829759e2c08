//! Redemption of verification codes and validation of the signed credentials
//! derived from them.
pub mod certificate;
pub mod code;
pub mod token;

pub use certificate::CertificateValidator;
pub use code::{CodeVerifier, VerifiedCode};
pub use token::TokenValidator;

use crate::{
    cose::{sign1, CredentialKind, KeyRing},
    definitions::{Credential, Parties},
    Error, Result,
};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

/// Open a signed credential and check it was minted by us, for our audience,
/// and is unexpired at `now`.
pub(crate) fn open_credential<T: DeserializeOwned + Credential>(
    kind: CredentialKind,
    encoded: &str,
    keys: &KeyRing,
    parties: &Parties,
    now: OffsetDateTime,
) -> Result<T> {
    let claims: T = sign1::open(kind, encoded, keys, now)?;
    if !parties.matches(&claims) {
        return Err(Error::malformed(
            kind.name(),
            format!(
                "issued by '{}' for '{}'",
                claims.issuer(),
                claims.audience()
            ),
        ));
    }
    if claims.validity().is_expired(now) {
        tracing::warn!(
            jti = %claims.id(),
            expires_at = %claims.validity().expires_at,
            "rejected expired {}",
            kind.name()
        );
        return Err(Error::Expired(kind.name()));
    }
    tracing::debug!(jti = %claims.id(), "{} is valid", kind.name());
    Ok(claims)
}
