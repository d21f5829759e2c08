//! Request and response payloads exchanged with browsers and devices.
//!
//! Field names follow the JSON wire format used by existing clients.
use super::{FullDate, TestType};
use serde::{Deserialize, Serialize};

/// Request a new verification code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueCodeRequest {
    pub test_type: String,
    /// ISO 8601 `YYYY-MM-DD`; absent or empty when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom_date: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueCodeResponse {
    #[serde(rename = "code")]
    pub verification_code: String,
    /// RFC 1123 formatted expiry, in UTC.
    pub expires_at: String,
    /// Expiry in seconds since the Unix epoch.
    pub expires_at_timestamp: i64,
}

/// Exchange a verification code for a long-term token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifyCodeRequest {
    #[serde(rename = "code")]
    pub verification_code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifyCodeResponse {
    #[serde(rename = "testtype")]
    pub test_type: TestType,
    #[serde(
        rename = "symptomDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub symptom_date: Option<FullDate>,
    /// Signed, not encrypted.
    #[serde(rename = "token")]
    pub verification_token: String,
}

/// Exchange a token and an exposure key HMAC for a certificate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationCertificateRequest {
    #[serde(rename = "token")]
    pub verification_token: String,
    /// Standard base64 encoding of the HMAC.
    #[serde(rename = "ekeyhmac")]
    pub exposure_key_hmac: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationCertificateResponse {
    pub certificate: String,
}

/// The common error payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorReturn {
    pub error: String,
}

/// Either a success payload or an [`ErrorReturn`], never both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Error(ErrorReturn),
    Ok(T),
}

impl<T> ApiResponse<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, ApiResponse::Error(_))
    }
}

impl<T> From<crate::Result<T>> for ApiResponse<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(payload) => ApiResponse::Ok(payload),
            Err(e) => ApiResponse::Error(ErrorReturn {
                error: e.to_string(),
            }),
        }
    }
}
