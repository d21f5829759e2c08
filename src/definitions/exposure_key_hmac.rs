//! The client-supplied binding between a certificate and the exposure keys it
//! will be used to publish.
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

/// Length of an HMAC-SHA256 digest.
pub const HMAC_SHA256_LEN: usize = 32;

/// An opaque HMAC over a set of temporary exposure keys.
///
/// The issuer never recomputes this value; it only checks the length and binds
/// it into the certificate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureKeyHmac(#[serde(with = "serde_bytes")] Vec<u8>);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("exposure key hmac is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("exposure key hmac must be {expected} bytes, received {actual}")]
    Length { expected: usize, actual: usize },
    #[error("unable to key hmac: {0}")]
    Key(#[from] hmac::digest::InvalidLength),
}

impl ExposureKeyHmac {
    /// Accept raw digest bytes of exactly `expected_len` bytes.
    pub fn from_bytes(bytes: Vec<u8>, expected_len: usize) -> Result<Self, Error> {
        if bytes.len() != expected_len {
            return Err(Error::Length {
                expected: expected_len,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Decode the standard base64 form sent by devices.
    pub fn from_base64(encoded: &str, expected_len: usize) -> Result<Self, Error> {
        Self::from_bytes(base64::decode(encoded.trim())?, expected_len)
    }

    pub fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ExposureKeyHmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExposureKeyHmac({} bytes)", self.0.len())
    }
}

/// A temporary exposure key as uploaded by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposureKey {
    /// The raw 16 byte key.
    pub key: Vec<u8>,
    pub interval_number: u32,
    pub interval_count: u32,
    pub transmission_risk: u8,
}

impl ExposureKey {
    fn canonical(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            base64::encode(&self.key),
            self.interval_number,
            self.interval_count,
            self.transmission_risk
        )
    }
}

/// Compute the exposure key HMAC the way a device does before requesting a
/// certificate.
///
/// Each key is rendered as `base64(key).interval_number.interval_count.transmission_risk`,
/// the renderings are sorted and joined with `,`, and the result is authenticated
/// with HMAC-SHA256 under the device's random `secret`.
pub fn exposure_key_hmac(secret: &[u8], keys: &[ExposureKey]) -> Result<ExposureKeyHmac, Error> {
    let mut rendered: Vec<String> = keys.iter().map(ExposureKey::canonical).collect();
    rendered.sort();

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)?;
    mac.update(rendered.join(",").as_bytes());
    Ok(ExposureKeyHmac(mac.finalize().into_bytes().to_vec()))
}
