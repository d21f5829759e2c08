use super::{ExposureKeyHmac, FullDate, TestType, ValidityInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a long-term verification token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Unique token identifier.
    #[serde(rename = "jti")]
    pub id: Uuid,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "aud")]
    pub audience: String,
    #[serde(rename = "testType")]
    pub test_type: TestType,
    #[serde(
        rename = "symptomDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub symptom_date: Option<FullDate>,
    pub validity: ValidityInfo,
}

/// Claims carried by a verification certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateClaims {
    #[serde(rename = "jti")]
    pub id: Uuid,
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "aud")]
    pub audience: String,
    #[serde(rename = "testType")]
    pub test_type: TestType,
    #[serde(
        rename = "symptomDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub symptom_date: Option<FullDate>,
    /// The exposure key HMAC this certificate is bound to.
    #[serde(rename = "tekmac")]
    pub hmac: ExposureKeyHmac,
    pub validity: ValidityInfo,
}

/// Fields shared by both credential kinds.
pub trait Credential {
    fn id(&self) -> Uuid;
    fn issuer(&self) -> &str;
    fn audience(&self) -> &str;
    fn validity(&self) -> &ValidityInfo;
}

macro_rules! impl_credential {
    ($($ty:ty),*) => {
        $(
            impl Credential for $ty {
                fn id(&self) -> Uuid {
                    self.id
                }

                fn issuer(&self) -> &str {
                    &self.issuer
                }

                fn audience(&self) -> &str {
                    &self.audience
                }

                fn validity(&self) -> &ValidityInfo {
                    &self.validity
                }
            }
        )*
    };
}

impl_credential!(TokenClaims, CertificateClaims);

/// Who mints credentials and for whom, stamped into every token and
/// certificate as `iss` and `aud`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Parties {
    pub issuer: String,
    pub audience: String,
}

impl Parties {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn matches(&self, credential: &impl Credential) -> bool {
        credential.issuer() == self.issuer && credential.audience() == self.audience
    }
}
