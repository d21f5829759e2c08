use std::sync::Arc;

use coset::{CborSerializable, CoseSign1};
use enverify::clock::MockClock;
use enverify::cose::{KeyAlgorithm, KeyRing, SigningKey};
use enverify::definitions::api::{IssueCodeRequest, IssueCodeResponse};
use enverify::definitions::Parties;
use enverify::service::VerificationService;
use enverify::store::CodeStore;
use time::macros::datetime;
use time::OffsetDateTime;

#[allow(dead_code)]
fn main() {}

/// Issuance instant used by every scenario.
#[allow(dead_code)]
pub const START: OffsetDateTime = datetime!(2024-01-20 10:00 UTC);

#[allow(dead_code)]
pub struct Harness {
    pub service: VerificationService,
    pub clock: Arc<MockClock>,
}

#[allow(dead_code)]
pub fn parties() -> Parties {
    Parties::new("health-authority", "key-server")
}

/// A service over an in-memory store with freshly generated keys and a clock
/// parked at [`START`].
#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(None)
}

#[allow(dead_code)]
pub fn harness_with(store: Option<Arc<dyn CodeStore>>) -> Harness {
    let clock = Arc::new(MockClock::new(START));
    let mut builder = VerificationService::builder()
        .clock(clock.clone())
        .parties(parties())
        .token_keys(KeyRing::single(
            "token-v1",
            SigningKey::generate(KeyAlgorithm::ES256),
        ))
        .certificate_keys(KeyRing::single(
            "cert-v1",
            SigningKey::generate(KeyAlgorithm::ES384),
        ));
    if let Some(store) = store {
        builder = builder.store(store);
    }
    Harness {
        service: builder.build().expect("service should build"),
        clock,
    }
}

#[allow(dead_code)]
pub fn issue(
    service: &VerificationService,
    test_type: &str,
    symptom_date: Option<&str>,
) -> IssueCodeResponse {
    service
        .issue_code(&IssueCodeRequest {
            test_type: test_type.into(),
            symptom_date: symptom_date.map(String::from),
        })
        .expect("code should be issued")
}

/// A 32 byte HMAC in standard base64.
#[allow(dead_code)]
pub fn hmac_b64() -> String {
    let hmac = hex::decode("d3b2c6a1f0e9d8c7b6a5948372615f4e3d2c1b0a99887766554433221100ffee");
    base64::encode(hmac.unwrap())
}

/// Decode a token or certificate, let `edit` change the COSE structure and
/// re-encode it.
#[allow(dead_code)]
pub fn tamper(encoded: &str, edit: impl FnOnce(&mut CoseSign1)) -> String {
    let bytes = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD).unwrap();
    let mut sign1 = CoseSign1::from_slice(&bytes).unwrap();
    edit(&mut sign1);
    base64::encode_config(sign1.to_vec().unwrap(), base64::URL_SAFE_NO_PAD)
}
