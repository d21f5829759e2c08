//! Minting of verification codes and verification certificates.
pub mod certificate;
pub mod code;

pub use certificate::{CertificateIssuer, CertificatePolicy, IssuedCertificate};
pub use code::{CodeIssuer, CodePolicy, IssuedCode};
