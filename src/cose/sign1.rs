use super::{Error, KeyEntry, KeyRing, SignatureAlgorithm};
use ciborium::Value;
use coset::{
    CborSerializable, CoseSign1, CoseSign1Builder, Header, HeaderBuilder, RegisteredLabel,
};
use serde::{de::DeserializeOwned, Serialize};
use time::OffsetDateTime;

/// Which credential an envelope carries.
///
/// Tokens and certificates are signed by different key rings, and the content
/// type in the protected header keeps one from being accepted as the other even
/// when a deployment reuses keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    Token,
    Certificate,
}

impl CredentialKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            CredentialKind::Token => "application/en-verification-token+cbor",
            CredentialKind::Certificate => "application/en-verification-certificate+cbor",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CredentialKind::Token => "token",
            CredentialKind::Certificate => "certificate",
        }
    }
}

/// Sign `claims` with the key active at `now` and encode the envelope as
/// unpadded base64url.
pub fn sign<T: Serialize>(
    kind: CredentialKind,
    claims: &T,
    keys: &KeyRing,
    now: OffsetDateTime,
) -> Result<String, Error> {
    sign_with(kind, claims, keys.signing_key(now)?)
}

/// Sign `claims` with an already selected key.
pub fn sign_with<T: Serialize>(
    kind: CredentialKind,
    claims: &T,
    entry: &KeyEntry,
) -> Result<String, Error> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(claims, &mut payload)
        .map_err(|e| Error::Encoding(e.to_string()))?;

    let protected = HeaderBuilder::new()
        .algorithm(entry.key.algorithm())
        .key_id(entry.kid.as_bytes().to_vec())
        .content_type(kind.content_type().to_string())
        .build();

    let sign1 = CoseSign1Builder::new()
        .protected(protected)
        .payload(payload)
        .create_signature(&[], |data| entry.key.sign(data))
        .build();

    let bytes = sign1
        .to_vec()
        .map_err(|e| Error::Encoding(format!("error encoding cosesign1: {e}")))?;
    Ok(base64::encode_config(bytes, base64::URL_SAFE_NO_PAD))
}

/// Decode an envelope produced by [`sign`], check its signature against the keys
/// accepted at `now` and return the claims.
///
/// The signature is checked over the raw protected header bytes before the header
/// is interpreted, so damage anywhere inside the signed data is reported as
/// [`Error::SignatureInvalid`]. Expiry is not checked here.
pub fn open<T: DeserializeOwned>(
    kind: CredentialKind,
    encoded: &str,
    keys: &KeyRing,
    now: OffsetDateTime,
) -> Result<T, Error> {
    let bytes = decode_base64(kind, encoded)?;
    let envelope = Envelope::parse(kind, &bytes)?;

    // kid and alg only pick the candidate keys; an unreadable header means every
    // accepted key is tried.
    let parsed = CoseSign1::from_slice(&bytes);
    let header = parsed.as_ref().ok().map(|sign1| &sign1.protected.header);
    verify(kind, &envelope, header, keys, now)?;

    let sign1 = parsed.map_err(|e| Error::Decoding {
        what: kind.name(),
        reason: format!("invalid cosesign1: {e}"),
    })?;

    match &sign1.protected.header.content_type {
        Some(RegisteredLabel::Text(content_type)) if content_type == kind.content_type() => {}
        other => {
            return Err(Error::UnexpectedContentType {
                what: kind.name(),
                found: other.as_ref().map(|c| format!("{c:?}")),
            })
        }
    }

    ciborium::de::from_reader(envelope.payload.as_slice()).map_err(|e| Error::Decoding {
        what: kind.name(),
        reason: format!("unexpected claims: {e}"),
    })
}

#[cfg(test)]
pub(crate) fn decode(kind: CredentialKind, encoded: &str) -> Result<CoseSign1, Error> {
    let bytes = decode_base64(kind, encoded)?;
    CoseSign1::from_slice(&bytes).map_err(|e| Error::Decoding {
        what: kind.name(),
        reason: format!("invalid cosesign1: {e}"),
    })
}

fn decode_base64(kind: CredentialKind, encoded: &str) -> Result<Vec<u8>, Error> {
    base64::decode_config(encoded.trim(), base64::URL_SAFE_NO_PAD).map_err(|e| Error::Decoding {
        what: kind.name(),
        reason: format!("invalid base64url: {e}"),
    })
}

/// The outer `[protected, unprotected, payload, signature]` array, with the
/// protected header left as the bytes that were signed.
struct Envelope {
    protected: Vec<u8>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl Envelope {
    fn parse(kind: CredentialKind, bytes: &[u8]) -> Result<Self, Error> {
        let malformed = |reason: String| Error::Decoding {
            what: kind.name(),
            reason: format!("invalid cosesign1: {reason}"),
        };
        let mut reader = bytes;
        let value: Value =
            ciborium::de::from_reader(&mut reader).map_err(|e| malformed(e.to_string()))?;
        if !reader.is_empty() {
            return Err(malformed(format!("{} trailing bytes", reader.len())));
        }
        let Value::Array(items) = value else {
            return Err(malformed("expected an array".into()));
        };
        match <[Value; 4]>::try_from(items) {
            Ok([
                Value::Bytes(protected),
                Value::Map(_),
                Value::Bytes(payload),
                Value::Bytes(signature),
            ]) => Ok(Self {
                protected,
                payload,
                signature,
            }),
            _ => Err(malformed(
                "expected [protected, unprotected, payload, signature]".into(),
            )),
        }
    }

    /// The `Sig_structure` for COSE_Sign1 with no external data.
    fn to_be_signed(&self) -> Result<Vec<u8>, Error> {
        let structure = Value::Array(vec![
            Value::Text("Signature1".into()),
            Value::Bytes(self.protected.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(self.payload.clone()),
        ]);
        let mut data = Vec::new();
        ciborium::ser::into_writer(&structure, &mut data)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(data)
    }
}

// The key named by the header's kid is tried first, then every other accepted key.
fn verify(
    kind: CredentialKind,
    envelope: &Envelope,
    header: Option<&Header>,
    keys: &KeyRing,
    now: OffsetDateTime,
) -> Result<(), Error> {
    let kid = header.map(|h| h.key_id.as_slice()).unwrap_or_default();
    let accepted = keys.verification_keys(now);
    let candidates = accepted
        .iter()
        .filter(|e| e.kid.as_bytes() == kid)
        .chain(accepted.iter().filter(|e| e.kid.as_bytes() != kid));
    let data = envelope.to_be_signed()?;

    for entry in candidates {
        if let Some(header) = header {
            let expected_alg = coset::Algorithm::Assigned(entry.key.algorithm());
            if header.alg.as_ref() != Some(&expected_alg) {
                continue;
            }
        }
        if entry.key.verify(&data, &envelope.signature).is_ok() {
            tracing::trace!(kid = %entry.kid, "{} signature verified", kind.name());
            return Ok(());
        }
    }
    Err(Error::SignatureInvalid(kind.name()))
}
