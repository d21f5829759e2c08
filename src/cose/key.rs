//! Signing keys and the rotation schedule that decides which of them sign and
//! which of them still verify.
use super::{Error, SignatureAlgorithm};
use coset::iana;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use signature::{Signer, Verifier};
use std::{collections::HashSet, fmt};
use strum_macros::{Display, EnumString};
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

/// Supported signature algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
pub enum KeyAlgorithm {
    #[default]
    ES256,
    ES384,
}

/// A private ECDSA key used to sign credentials.
#[derive(Clone)]
pub enum SigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl SigningKey {
    /// Generate a fresh random key.
    pub fn generate(algorithm: KeyAlgorithm) -> Self {
        match algorithm {
            KeyAlgorithm::ES256 => SigningKey::P256(p256::SecretKey::random(&mut OsRng).into()),
            KeyAlgorithm::ES384 => SigningKey::P384(p384::SecretKey::random(&mut OsRng).into()),
        }
    }

    /// Generate a fresh random key in PKCS#8 PEM form.
    pub fn generate_pem(algorithm: KeyAlgorithm) -> Result<Zeroizing<String>, Error> {
        let pem = match algorithm {
            KeyAlgorithm::ES256 => p256::SecretKey::random(&mut OsRng).to_pkcs8_pem(LineEnding::LF),
            KeyAlgorithm::ES384 => p384::SecretKey::random(&mut OsRng).to_pkcs8_pem(LineEnding::LF),
        };
        pem.map_err(|e| Error::Key(format!("unable to encode key: {e}")))
    }

    /// Parse a PKCS#8 PEM private key for the given algorithm.
    pub fn from_pkcs8_pem(algorithm: KeyAlgorithm, pem: &str) -> Result<Self, Error> {
        let key = match algorithm {
            KeyAlgorithm::ES256 => p256::SecretKey::from_pkcs8_pem(pem)
                .map(|k| SigningKey::P256(k.into())),
            KeyAlgorithm::ES384 => p384::SecretKey::from_pkcs8_pem(pem)
                .map(|k| SigningKey::P384(k.into())),
        };
        key.map_err(|e| Error::Key(format!("unable to parse {algorithm} key: {e}")))
    }

    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self {
            SigningKey::P256(_) => KeyAlgorithm::ES256,
            SigningKey::P384(_) => KeyAlgorithm::ES384,
        }
    }

    pub(crate) fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
            SigningKey::P384(key) => {
                let signature: p384::ecdsa::Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
        }
    }

    pub(crate) fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), signature::Error> {
        match self {
            SigningKey::P256(key) => {
                let signature = p256::ecdsa::Signature::from_slice(signature)?;
                key.verifying_key().verify(data, &signature)
            }
            SigningKey::P384(key) => {
                let signature = p384::ecdsa::Signature::from_slice(signature)?;
                key.verifying_key().verify(data, &signature)
            }
        }
    }
}

impl SignatureAlgorithm for SigningKey {
    fn algorithm(&self) -> iana::Algorithm {
        match self {
            SigningKey::P256(key) => key.algorithm(),
            SigningKey::P384(key) => key.algorithm(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({})", self.key_algorithm())
    }
}

/// A key together with its identifier and the instant it starts signing.
#[derive(Clone, Debug)]
pub struct KeyEntry {
    pub kid: String,
    pub key: SigningKey,
    pub valid_from: OffsetDateTime,
}

/// An ordered set of keys forming a rotation schedule.
///
/// The newest key whose `valid_from` has passed signs. A key replaced by a newer
/// one keeps verifying until `rotation_overlap` after its successor became
/// active. Keys that are not yet valid never sign or verify.
#[derive(Clone, Debug)]
pub struct KeyRing {
    // newest first
    entries: Vec<KeyEntry>,
    rotation_overlap: Duration,
}

impl KeyRing {
    pub fn new(mut entries: Vec<KeyEntry>, rotation_overlap: Duration) -> Result<Self, Error> {
        if entries.is_empty() {
            return Err(Error::Key("key ring must contain at least one key".into()));
        }
        let mut kids = HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !kids.insert(e.kid.as_str())) {
            return Err(Error::Key(format!("duplicate key id '{}'", dup.kid)));
        }
        if rotation_overlap.is_negative() {
            return Err(Error::Key("rotation overlap must not be negative".into()));
        }
        entries.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));
        Ok(Self {
            entries,
            rotation_overlap,
        })
    }

    /// A ring holding one key that has always been valid.
    pub fn single(kid: impl Into<String>, key: SigningKey) -> Self {
        Self {
            entries: vec![KeyEntry {
                kid: kid.into(),
                key,
                valid_from: OffsetDateTime::UNIX_EPOCH,
            }],
            rotation_overlap: Duration::ZERO,
        }
    }

    /// The key that signs at `now`.
    pub fn signing_key(&self, now: OffsetDateTime) -> Result<&KeyEntry, Error> {
        self.entries
            .iter()
            .find(|e| e.valid_from <= now)
            .ok_or(Error::NoActiveKey)
    }

    /// Keys accepted for verification at `now`, newest first.
    pub fn verification_keys(&self, now: OffsetDateTime) -> Vec<&KeyEntry> {
        let mut accepted = Vec::new();
        let mut superseded_at: Option<OffsetDateTime> = None;
        for entry in self.entries.iter().filter(|e| e.valid_from <= now) {
            if let Some(successor_from) = superseded_at {
                if now >= successor_from + self.rotation_overlap {
                    break;
                }
            }
            accepted.push(entry);
            superseded_at = Some(entry.valid_from);
        }
        accepted
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }
}

mod p256_alg {
    use crate::cose::SignatureAlgorithm;
    use coset::iana;
    use p256::ecdsa::SigningKey;

    impl SignatureAlgorithm for SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES256
        }
    }
}

mod p384_alg {
    use crate::cose::SignatureAlgorithm;
    use coset::iana;
    use p384::ecdsa::SigningKey;

    impl SignatureAlgorithm for SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES384
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn entry(kid: &str, valid_from: OffsetDateTime) -> KeyEntry {
        KeyEntry {
            kid: kid.into(),
            key: SigningKey::generate(KeyAlgorithm::ES256),
            valid_from,
        }
    }

    fn kids(keys: Vec<&KeyEntry>) -> Vec<&str> {
        keys.into_iter().map(|e| e.kid.as_str()).collect()
    }

    fn rotating_ring() -> KeyRing {
        KeyRing::new(
            vec![
                entry("v1", datetime!(2024-01-01 00:00 UTC)),
                entry("v3", datetime!(2024-03-01 00:00 UTC)),
                entry("v2", datetime!(2024-02-01 00:00 UTC)),
            ],
            Duration::days(2),
        )
        .unwrap()
    }

    #[test]
    fn newest_active_key_signs() {
        let ring = rotating_ring();
        let at = |t| ring.signing_key(t).unwrap().kid.clone();
        assert_eq!(at(datetime!(2024-01-15 00:00 UTC)), "v1");
        assert_eq!(at(datetime!(2024-02-01 00:00 UTC)), "v2");
        assert_eq!(at(datetime!(2025-01-01 00:00 UTC)), "v3");
        assert!(matches!(
            ring.signing_key(datetime!(2023-12-31 00:00 UTC)),
            Err(Error::NoActiveKey)
        ));
    }

    #[test]
    fn previous_key_verifies_during_overlap_only() {
        let ring = rotating_ring();
        assert_eq!(
            kids(ring.verification_keys(datetime!(2024-02-02 00:00 UTC))),
            ["v2", "v1"]
        );
        assert_eq!(
            kids(ring.verification_keys(datetime!(2024-02-03 00:00 UTC))),
            ["v2"]
        );
        assert_eq!(
            kids(ring.verification_keys(datetime!(2024-01-20 00:00 UTC))),
            ["v1"]
        );
        assert!(ring
            .verification_keys(datetime!(2023-06-01 00:00 UTC))
            .is_empty());
    }

    #[test]
    fn rejects_empty_and_duplicate_rings() {
        assert!(KeyRing::new(vec![], Duration::ZERO).is_err());
        let t = datetime!(2024-01-01 00:00 UTC);
        assert!(KeyRing::new(vec![entry("a", t), entry("a", t)], Duration::ZERO).is_err());
    }

    #[test]
    fn sign_and_verify_both_curves() {
        for algorithm in [KeyAlgorithm::ES256, KeyAlgorithm::ES384] {
            let key = SigningKey::generate(algorithm);
            let signature = key.sign(b"payload");
            assert!(key.verify(b"payload", &signature).is_ok());
            assert!(key.verify(b"payloaD", &signature).is_err());
            assert!(SigningKey::generate(algorithm)
                .verify(b"payload", &signature)
                .is_err());
        }
    }

    #[test]
    fn pem_roundtrip() {
        for algorithm in [KeyAlgorithm::ES256, KeyAlgorithm::ES384] {
            let pem = SigningKey::generate_pem(algorithm).unwrap();
            let key = SigningKey::from_pkcs8_pem(algorithm, &pem).unwrap();
            assert_eq!(key.key_algorithm(), algorithm);
        }
        let pem = SigningKey::generate_pem(KeyAlgorithm::ES256).unwrap();
        assert!(SigningKey::from_pkcs8_pem(KeyAlgorithm::ES384, &pem).is_err());
    }
}
