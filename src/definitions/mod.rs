pub mod api;
pub mod claims;
pub mod exposure_key_hmac;
pub mod fulldate;
pub mod test_type;
pub mod validity_info;
pub mod verification_code;

pub use claims::{CertificateClaims, Credential, Parties, TokenClaims};
pub use exposure_key_hmac::{exposure_key_hmac, ExposureKey, ExposureKeyHmac};
pub use fulldate::FullDate;
pub use test_type::TestType;
pub use validity_info::ValidityInfo;
pub use verification_code::VerificationCode;
