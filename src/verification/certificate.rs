use super::open_credential;
use crate::{
    clock::Clock,
    cose::{CredentialKind, KeyRing},
    definitions::{CertificateClaims, Parties},
    Result,
};
use std::sync::Arc;
use tracing::instrument;

/// Validates verification certificates for downstream consumers such as a key
/// server accepting an upload.
#[derive(Clone, Debug)]
pub struct CertificateValidator {
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    parties: Parties,
}

impl CertificateValidator {
    pub fn new(keys: Arc<KeyRing>, clock: Arc<dyn Clock>, parties: Parties) -> Self {
        Self {
            keys,
            clock,
            parties,
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub fn validate(&self, certificate: &str) -> Result<CertificateClaims> {
        open_credential(
            CredentialKind::Certificate,
            certificate,
            &self.keys,
            &self.parties,
            self.clock.now(),
        )
    }
}
