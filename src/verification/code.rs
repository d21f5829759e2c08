use crate::{
    clock::Clock,
    cose::{sign1, CredentialKind, KeyRing},
    definitions::{FullDate, Parties, TestType, TokenClaims, ValidityInfo},
    store::{CodeStore, Consume},
    Error, Result,
};
use std::sync::Arc;
use time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Outcome of a successful redemption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedCode {
    pub test_type: TestType,
    pub symptom_date: Option<FullDate>,
    /// The encoded verification token.
    pub token: String,
    pub claims: TokenClaims,
}

/// Redeems verification codes for signed tokens.
#[derive(Debug)]
pub struct CodeVerifier<S> {
    store: S,
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    parties: Parties,
    token_lifetime: Duration,
}

impl<S: CodeStore> CodeVerifier<S> {
    pub fn new(
        store: S,
        keys: Arc<KeyRing>,
        clock: Arc<dyn Clock>,
        parties: Parties,
        token_lifetime: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            clock,
            parties,
            token_lifetime,
        }
    }

    /// Consume `code` and mint a token carrying its diagnosis.
    ///
    /// The code is marked consumed by a single conditional update in the store, so
    /// of any number of concurrent calls for one code at most one succeeds.
    /// Unknown, expired and already used codes are rejected without writing
    /// anything. The signing key and the token's validity window are resolved
    /// before the code is touched, so a service that cannot mint a token never
    /// consumes a code.
    #[instrument(level = "debug", skip_all)]
    pub fn verify(&self, code: &str) -> Result<VerifiedCode> {
        let now = self.clock.now();
        let key = self.keys.signing_key(now)?;
        let validity = ValidityInfo::starting_at(now, self.token_lifetime)?;

        let record = match self.store.consume(code.trim(), now)? {
            Consume::Consumed(record) => record,
            Consume::NotFound => {
                tracing::warn!("verification code not found");
                return Err(Error::NotFound);
            }
            Consume::Expired => {
                tracing::warn!("verification code has expired");
                return Err(Error::Expired("verification code"));
            }
            Consume::AlreadyUsed => {
                tracing::warn!("verification code replayed");
                return Err(Error::AlreadyUsed);
            }
        };

        let claims = TokenClaims {
            id: Uuid::new_v4(),
            issuer: self.parties.issuer.clone(),
            audience: self.parties.audience.clone(),
            test_type: record.test_type,
            symptom_date: record.symptom_date,
            validity,
        };
        let token = sign1::sign_with(CredentialKind::Token, &claims, key)?;
        tracing::info!(
            jti = %claims.id,
            test_type = %claims.test_type,
            "verification code consumed, token issued"
        );

        Ok(VerifiedCode {
            test_type: record.test_type,
            symptom_date: record.symptom_date,
            token,
            claims,
        })
    }
}
