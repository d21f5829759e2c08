#![no_main]

use std::sync::OnceLock;

use enverify::cose::{sign1, CredentialKind, KeyAlgorithm, KeyRing, SigningKey};
use enverify::definitions::TokenClaims;
use libfuzzer_sys::fuzz_target;
use time::OffsetDateTime;

fn keys() -> &'static KeyRing {
    static KEYS: OnceLock<KeyRing> = OnceLock::new();
    KEYS.get_or_init(|| KeyRing::single("fuzz", SigningKey::generate(KeyAlgorithm::ES256)))
}

fuzz_target!(|data: &[u8]| {
    let _ = ciborium::de::from_reader::<TokenClaims, _>(data);
    if let Ok(encoded) = std::str::from_utf8(data) {
        let _ = sign1::open::<TokenClaims>(
            CredentialKind::Token,
            encoded,
            keys(),
            OffsetDateTime::UNIX_EPOCH,
        );
    }
});
