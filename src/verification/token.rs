use super::open_credential;
use crate::{
    clock::Clock,
    cose::{CredentialKind, KeyRing},
    definitions::{Parties, TokenClaims},
    Result,
};
use std::sync::Arc;
use tracing::instrument;

/// Validates long-term verification tokens against the token key ring.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    keys: Arc<KeyRing>,
    clock: Arc<dyn Clock>,
    parties: Parties,
}

impl TokenValidator {
    pub fn new(keys: Arc<KeyRing>, clock: Arc<dyn Clock>, parties: Parties) -> Self {
        Self {
            keys,
            clock,
            parties,
        }
    }

    /// Decode and check a token, returning its claims.
    ///
    /// Has no side effects; the same token validates any number of times until it
    /// expires.
    #[instrument(level = "debug", skip_all)]
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        open_credential(
            CredentialKind::Token,
            token,
            &self.keys,
            &self.parties,
            self.clock.now(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use crate::cose::{sign1, KeyAlgorithm, SigningKey};
    use crate::definitions::{TestType, ValidityInfo};
    use crate::Error;
    use time::{macros::datetime, Duration, OffsetDateTime};
    use uuid::Uuid;

    const NOW: OffsetDateTime = datetime!(2024-01-15 10:00 UTC);

    fn claims(parties: &Parties) -> TokenClaims {
        TokenClaims {
            id: Uuid::new_v4(),
            issuer: parties.issuer.clone(),
            audience: parties.audience.clone(),
            test_type: TestType::Likely,
            symptom_date: None,
            validity: ValidityInfo::starting_at(NOW, Duration::hours(24)).unwrap(),
        }
    }

    fn setup() -> (TokenValidator, Arc<KeyRing>, Arc<MockClock>) {
        let keys = Arc::new(KeyRing::single(
            "token-v1",
            SigningKey::generate(KeyAlgorithm::ES256),
        ));
        let clock = Arc::new(MockClock::new(NOW));
        let validator = TokenValidator::new(
            keys.clone(),
            clock.clone(),
            Parties::new("health-authority", "key-server"),
        );
        (validator, keys, clock)
    }

    #[test]
    fn valid_until_expiry_inclusive() {
        let (validator, keys, clock) = setup();
        let claims = claims(&validator.parties);
        let token = sign1::sign(CredentialKind::Token, &claims, &keys, NOW).unwrap();

        assert_eq!(validator.validate(&token).unwrap(), claims);
        // repeatable
        assert_eq!(validator.validate(&token).unwrap(), claims);

        clock.set(claims.validity.expires_at);
        assert!(validator.validate(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            validator.validate(&token),
            Err(Error::Expired("token"))
        ));
    }

    #[test]
    fn foreign_audience_is_malformed() {
        let (validator, keys, _) = setup();
        let other = Parties::new("health-authority", "somebody-else");
        let token = sign1::sign(CredentialKind::Token, &claims(&other), &keys, NOW).unwrap();
        assert!(matches!(
            validator.validate(&token),
            Err(Error::Malformed { what: "token", .. })
        ));
    }

    #[test]
    fn certificate_is_not_a_token() {
        let (validator, keys, _) = setup();
        let token = sign1::sign(
            CredentialKind::Certificate,
            &claims(&validator.parties),
            &keys,
            NOW,
        )
        .unwrap();
        assert!(matches!(
            validator.validate(&token),
            Err(Error::Malformed { what: "token", .. })
        ));
    }

    #[test]
    fn unknown_signer() {
        let (validator, _, _) = setup();
        let stranger = KeyRing::single("token-v1", SigningKey::generate(KeyAlgorithm::ES256));
        let token = sign1::sign(
            CredentialKind::Token,
            &claims(&validator.parties),
            &stranger,
            NOW,
        )
        .unwrap();
        assert!(matches!(
            validator.validate(&token),
            Err(Error::SignatureInvalid("token"))
        ));
    }
}
