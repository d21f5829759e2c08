//! The boundary operations of the verification server, in terms of the JSON
//! request and response payloads.
//!
//! Transport, authentication of callers and rate limiting sit in front of this
//! type and are not handled here.
use crate::{
    clock::{Clock, SystemClock},
    config::{Config, StoreBackend},
    cose::KeyRing,
    definitions::{
        api::{
            ApiResponse, IssueCodeRequest, IssueCodeResponse, VerificationCertificateRequest,
            VerificationCertificateResponse, VerifyCodeRequest, VerifyCodeResponse,
        },
        CertificateClaims, FullDate, Parties, TestType, TokenClaims,
    },
    issuance::{CertificateIssuer, CertificatePolicy, CodeIssuer, CodePolicy},
    store::{CodeStore, MemoryCodeStore, SqliteCodeStore},
    verification::{CertificateValidator, CodeVerifier, TokenValidator},
    Error, Result,
};
use std::{str::FromStr, sync::Arc};
use time::Duration;
use tracing::instrument;

type SharedStore = Arc<dyn CodeStore>;

/// All three lifecycle operations behind one handle, sharing a store, a clock
/// and the two key rings.
#[derive(Debug)]
pub struct VerificationService {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    codes: CodeIssuer<SharedStore>,
    verifier: CodeVerifier<SharedStore>,
    tokens: TokenValidator,
    certificates: CertificateIssuer,
    certificate_validator: CertificateValidator,
}

/// Assembles a [`VerificationService`]. Both key rings are required; everything
/// else falls back to defaults.
#[derive(Default)]
pub struct Builder {
    store: Option<SharedStore>,
    clock: Option<Arc<dyn Clock>>,
    token_keys: Option<KeyRing>,
    certificate_keys: Option<KeyRing>,
    parties: Parties,
    code_policy: CodePolicy,
    token_lifetime: Option<Duration>,
    certificate_policy: CertificatePolicy,
}

impl Builder {
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn token_keys(mut self, keys: KeyRing) -> Self {
        self.token_keys = Some(keys);
        self
    }

    pub fn certificate_keys(mut self, keys: KeyRing) -> Self {
        self.certificate_keys = Some(keys);
        self
    }

    pub fn parties(mut self, parties: Parties) -> Self {
        self.parties = parties;
        self
    }

    pub fn code_policy(mut self, policy: CodePolicy) -> Self {
        self.code_policy = policy;
        self
    }

    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }

    pub fn certificate_policy(mut self, policy: CertificatePolicy) -> Self {
        self.certificate_policy = policy;
        self
    }

    pub fn build(self) -> Result<VerificationService> {
        let token_keys = Arc::new(
            self.token_keys
                .ok_or_else(|| Error::InvalidArgument("token keys are required".into()))?,
        );
        let certificate_keys = Arc::new(
            self.certificate_keys
                .ok_or_else(|| Error::InvalidArgument("certificate keys are required".into()))?,
        );
        let token_lifetime = self.token_lifetime.unwrap_or(Duration::hours(24));
        if !token_lifetime.is_positive() {
            return Err(Error::InvalidArgument(
                "token lifetime must be positive".into(),
            ));
        }
        self.code_policy.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCodeStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let tokens = TokenValidator::new(token_keys.clone(), clock.clone(), self.parties.clone());

        Ok(VerificationService {
            codes: CodeIssuer::new(store.clone(), clock.clone(), self.code_policy),
            verifier: CodeVerifier::new(
                store.clone(),
                token_keys,
                clock.clone(),
                self.parties.clone(),
                token_lifetime,
            ),
            certificates: CertificateIssuer::new(
                tokens.clone(),
                certificate_keys.clone(),
                clock.clone(),
                self.parties.clone(),
                self.certificate_policy,
            )?,
            certificate_validator: CertificateValidator::new(
                certificate_keys,
                clock.clone(),
                self.parties,
            ),
            tokens,
            store,
            clock,
        })
    }
}

impl VerificationService {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Build a service from configuration, opening the configured store and
    /// loading both key rings.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: SharedStore = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryCodeStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteCodeStore::open(
                config.store_path(),
                config.busy_timeout(),
            )?),
        };
        Self::builder()
            .store(store)
            .parties(config.parties())
            .code_policy(config.code_policy()?)
            .token_lifetime(config.token_lifetime()?)
            .certificate_policy(config.certificate_policy()?)
            .token_keys(config.token_keys()?)
            .certificate_keys(config.certificate_keys()?)
            .build()
    }

    /// Issue a verification code for a diagnosis.
    #[instrument(level = "debug", skip_all, fields(test_type = %request.test_type))]
    pub fn issue_code(&self, request: &IssueCodeRequest) -> Result<IssueCodeResponse> {
        let test_type = TestType::from_str(request.test_type.trim()).map_err(|_| {
            Error::InvalidArgument(format!("unknown test type '{}'", request.test_type))
        })?;
        let symptom_date = match request.symptom_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(date) => Some(
                FullDate::from_str(date).map_err(|e| Error::InvalidArgument(e.to_string()))?,
            ),
        };

        let issued = self.codes.issue(test_type, symptom_date)?;
        Ok(IssueCodeResponse {
            expires_at: issued.expires_at_rfc1123()?,
            expires_at_timestamp: issued.expires_at_timestamp(),
            verification_code: issued.code,
        })
    }

    /// Redeem a verification code for a long-term token.
    pub fn verify_code(&self, request: &VerifyCodeRequest) -> Result<VerifyCodeResponse> {
        let verified = self.verifier.verify(&request.verification_code)?;
        Ok(VerifyCodeResponse {
            test_type: verified.test_type,
            symptom_date: verified.symptom_date,
            verification_token: verified.token,
        })
    }

    /// Exchange a token and an exposure key HMAC for a certificate.
    pub fn issue_certificate(
        &self,
        request: &VerificationCertificateRequest,
    ) -> Result<VerificationCertificateResponse> {
        let issued = self
            .certificates
            .issue_base64(&request.verification_token, &request.exposure_key_hmac)?;
        Ok(VerificationCertificateResponse {
            certificate: issued.certificate,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenClaims> {
        self.tokens.validate(token)
    }

    pub fn validate_certificate(&self, certificate: &str) -> Result<CertificateClaims> {
        self.certificate_validator.validate(certificate)
    }

    /// Delete codes that expired before now. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.purge_expired(self.clock.now())?;
        tracing::info!(removed, "purged expired verification codes");
        Ok(removed)
    }

    /// [`issue_code`](Self::issue_code) as a wire response.
    pub fn handle_issue_code(&self, request: &IssueCodeRequest) -> ApiResponse<IssueCodeResponse> {
        respond(self.issue_code(request))
    }

    /// [`verify_code`](Self::verify_code) as a wire response.
    pub fn handle_verify_code(
        &self,
        request: &VerifyCodeRequest,
    ) -> ApiResponse<VerifyCodeResponse> {
        respond(self.verify_code(request))
    }

    /// [`issue_certificate`](Self::issue_certificate) as a wire response.
    pub fn handle_issue_certificate(
        &self,
        request: &VerificationCertificateRequest,
    ) -> ApiResponse<VerificationCertificateResponse> {
        respond(self.issue_certificate(request))
    }
}

fn respond<T>(result: Result<T>) -> ApiResponse<T> {
    if let Err(e) = &result {
        if e.is_internal() {
            tracing::error!("{e}");
        } else {
            tracing::debug!("request rejected: {e}");
        }
    }
    result.into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use crate::cose::{KeyAlgorithm, SigningKey};
    use time::macros::datetime;

    fn service() -> (VerificationService, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(datetime!(2024-01-20 10:00 UTC)));
        let service = VerificationService::builder()
            .clock(clock.clone())
            .parties(Parties::new("health-authority", "key-server"))
            .token_keys(KeyRing::single(
                "token-v1",
                SigningKey::generate(KeyAlgorithm::ES256),
            ))
            .certificate_keys(KeyRing::single(
                "cert-v1",
                SigningKey::generate(KeyAlgorithm::ES256),
            ))
            .build()
            .unwrap();
        (service, clock)
    }

    #[test]
    fn keys_are_required() {
        assert!(matches!(
            VerificationService::builder().build(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn request_parsing() {
        let (service, _) = service();
        for (test_type, symptom_date) in [
            ("positive", None),
            ("confirmed", Some("15/01/2024")),
            ("confirmed", Some("2024-02-30")),
        ] {
            let request = IssueCodeRequest {
                test_type: test_type.into(),
                symptom_date: symptom_date.map(String::from),
            };
            assert!(matches!(
                service.issue_code(&request),
                Err(Error::InvalidArgument(_))
            ));
        }

        let request = IssueCodeRequest {
            test_type: "likely".into(),
            symptom_date: Some(String::new()),
        };
        let response = service.issue_code(&request).unwrap();
        assert_eq!(response.expires_at, "Sat, 20 Jan 2024 10:15:00 UTC");
    }

    #[test]
    fn errors_become_error_payloads() {
        let (service, _) = service();
        let response = service.handle_verify_code(&VerifyCodeRequest {
            verification_code: "UNKNOWN".into(),
        });
        assert_eq!(
            response,
            ApiResponse::Error(crate::definitions::api::ErrorReturn {
                error: Error::NotFound.to_string()
            })
        );
    }

    #[test]
    fn purge_uses_the_clock() {
        let (service, clock) = service();
        let request = IssueCodeRequest {
            test_type: "negative".into(),
            symptom_date: None,
        };
        service.issue_code(&request).unwrap();
        assert_eq!(service.purge_expired().unwrap(), 0);
        clock.advance(Duration::minutes(16));
        assert_eq!(service.purge_expired().unwrap(), 1);
    }
}
