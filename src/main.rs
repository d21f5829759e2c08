use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use enverify::{
    config::Config,
    cose::{KeyAlgorithm, SigningKey},
    definitions::{
        api::{ApiResponse, IssueCodeRequest, VerificationCertificateRequest, VerifyCodeRequest},
        CertificateClaims,
    },
    service::VerificationService,
};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service configuration file.
    #[arg(short, long, default_value = "enverify.toml")]
    config: PathBuf,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Generate a PKCS#8 PEM signing key.
    Keygen {
        #[arg(long, default_value_t = KeyAlgorithm::ES256)]
        algorithm: KeyAlgorithm,
        /// Where to write the key. Refuses to overwrite an existing file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Issue a verification code.
    Issue {
        /// One of confirmed, likely or negative.
        #[arg(long)]
        test_type: String,
        /// YYYY-MM-DD
        #[arg(long)]
        symptom_date: Option<String>,
    },
    /// Redeem a verification code for a token.
    Verify { code: String },
    /// Exchange a token and an exposure key HMAC for a certificate.
    Certificate {
        /// The token, or - to read it from stdin.
        token: MaybeStdin<String>,
        /// Standard base64 HMAC over the exposure keys.
        #[arg(long)]
        hmac: String,
    },
    /// Validate a certificate and print its claims.
    InspectCertificate {
        /// The certificate, or - to read it from stdin.
        certificate: MaybeStdin<String>,
    },
    /// Delete expired codes from the store.
    Purge,
}

fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    match args.action {
        Action::Keygen { algorithm, out } => keygen(algorithm, &out),
        Action::Issue {
            test_type,
            symptom_date,
        } => {
            let request = IssueCodeRequest {
                test_type,
                symptom_date,
            };
            print_response(service(&args.config)?.handle_issue_code(&request))
        }
        Action::Verify { code } => {
            let request = VerifyCodeRequest {
                verification_code: code,
            };
            print_response(service(&args.config)?.handle_verify_code(&request))
        }
        Action::Certificate { token, hmac } => {
            let request = VerificationCertificateRequest {
                verification_token: token.to_string(),
                exposure_key_hmac: hmac,
            };
            print_response(service(&args.config)?.handle_issue_certificate(&request))
        }
        Action::InspectCertificate { certificate } => {
            let certificate = certificate.to_string();
            let claims = service(&args.config)?
                .validate_certificate(certificate.trim())
                .context("certificate rejected")?;
            println!("{}", serde_json::to_string_pretty(&describe(&claims)?)?);
            Ok(())
        }
        Action::Purge => {
            let removed = service(&args.config)?.purge_expired()?;
            println!("{removed}");
            Ok(())
        }
    }
}

fn service(config: &Path) -> Result<VerificationService, Error> {
    let config = Config::from_file(config)
        .with_context(|| format!("could not load {}", config.display()))?;
    Ok(VerificationService::from_config(&config)?)
}

fn keygen(algorithm: KeyAlgorithm, out: &Path) -> Result<(), Error> {
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    let pem = SigningKey::generate_pem(algorithm)?;
    std::fs::write(out, pem.as_bytes())
        .with_context(|| format!("could not write {}", out.display()))?;
    tracing::info!(%algorithm, path = %out.display(), "generated signing key");
    Ok(())
}

fn print_response<T: Serialize>(response: ApiResponse<T>) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn describe(claims: &CertificateClaims) -> Result<serde_json::Value, Error> {
    Ok(serde_json::json!({
        "jti": claims.id,
        "iss": claims.issuer,
        "aud": claims.audience,
        "testType": claims.test_type,
        "symptomDate": claims.symptom_date,
        "tekmac": claims.hmac.to_base64(),
        "issuedAt": claims.validity.issued_at.format(&Rfc3339)?,
        "expiresAt": claims.validity.expires_at.format(&Rfc3339)?,
    }))
}
