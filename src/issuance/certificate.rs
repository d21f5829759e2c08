use crate::{
    clock::Clock,
    cose::{sign1, CredentialKind, KeyRing},
    definitions::{
        exposure_key_hmac::{self, HMAC_SHA256_LEN},
        CertificateClaims, ExposureKeyHmac, Parties, ValidityInfo,
    },
    verification::TokenValidator,
    Error, Result,
};
use std::sync::Arc;
use time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Lifetime and binding rules for certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificatePolicy {
    pub lifetime: Duration,
    /// Ceiling `lifetime` may not exceed.
    pub max_lifetime: Duration,
    /// Expected exposure key HMAC length in bytes.
    pub hmac_len: usize,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::minutes(15),
            max_lifetime: Duration::minutes(60),
            hmac_len: HMAC_SHA256_LEN,
        }
    }
}

impl CertificatePolicy {
    pub fn validate(&self) -> Result<()> {
        if !self.lifetime.is_positive() {
            return Err(Error::InvalidArgument(
                "certificate lifetime must be positive".into(),
            ));
        }
        if self.lifetime > self.max_lifetime {
            return Err(Error::InvalidArgument(format!(
                "certificate lifetime of {} exceeds the maximum of {}",
                self.lifetime, self.max_lifetime
            )));
        }
        if self.hmac_len == 0 {
            return Err(Error::InvalidArgument(
                "exposure key hmac length must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A freshly signed certificate and the claims it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub certificate: String,
    pub claims: CertificateClaims,
}

/// Exchanges a valid token and an exposure key HMAC for a short-lived
/// certificate.
///
/// Holds no state of its own: the same token may be exchanged any number of
/// times until it expires, and retries after a lost response are safe.
#[derive(Debug)]
pub struct CertificateIssuer {
    tokens: TokenValidator,
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    parties: Parties,
    policy: CertificatePolicy,
}

impl CertificateIssuer {
    /// Fails if the policy's lifetime exceeds its ceiling.
    pub fn new(
        tokens: TokenValidator,
        keys: Arc<KeyRing>,
        clock: Arc<dyn Clock>,
        parties: Parties,
        policy: CertificatePolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            tokens,
            keys,
            clock,
            parties,
            policy,
        })
    }

    pub fn policy(&self) -> &CertificatePolicy {
        &self.policy
    }

    /// Issue a certificate for the standard base64 form of the HMAC.
    pub fn issue_base64(&self, token: &str, hmac: &str) -> Result<IssuedCertificate> {
        let hmac = ExposureKeyHmac::from_base64(hmac, self.policy.hmac_len)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        self.issue(token, &hmac)
    }

    /// Validate `token` and mint a certificate binding its claims to `hmac`.
    ///
    /// Token failures are returned unchanged.
    #[instrument(level = "debug", skip_all)]
    pub fn issue(&self, token: &str, hmac: &ExposureKeyHmac) -> Result<IssuedCertificate> {
        if hmac.as_bytes().len() != self.policy.hmac_len {
            let e = exposure_key_hmac::Error::Length {
                expected: self.policy.hmac_len,
                actual: hmac.as_bytes().len(),
            };
            return Err(Error::InvalidArgument(e.to_string()));
        }
        let token = self.tokens.validate(token)?;

        let now = self.clock.now();
        let claims = CertificateClaims {
            id: Uuid::new_v4(),
            issuer: self.parties.issuer.clone(),
            audience: self.parties.audience.clone(),
            test_type: token.test_type,
            symptom_date: token.symptom_date,
            hmac: hmac.clone(),
            validity: ValidityInfo::starting_at(now, self.policy.lifetime)?,
        };
        let certificate = sign1::sign(CredentialKind::Certificate, &claims, &self.keys, now)?;
        tracing::info!(jti = %claims.id, token = %token.id, "certificate issued");

        Ok(IssuedCertificate {
            certificate,
            claims,
        })
    }
}
