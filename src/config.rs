//! Service configuration, loaded from a TOML file.
//!
//! ```toml
//! issuer = "example-health-authority"
//! audience = "exposure-notifications-server"
//!
//! [codes]
//! length = 16
//! lifetime_secs = 900
//! max_symptom_age_days = 14
//!
//! [tokens]
//! lifetime_secs = 86400
//! [[tokens.keys]]
//! kid = "token-v1"
//! algorithm = "ES256"
//! pem_file = "keys/token-v1.pem"
//! valid_from = "2024-01-01T00:00:00Z"
//!
//! [certificates]
//! lifetime_secs = 900
//! [[certificates.keys]]
//! kid = "cert-v1"
//! pem_file = "keys/cert-v1.pem"
//!
//! [store]
//! backend = "sqlite"
//! path = "enverify.db"
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.
use crate::{
    cose::{self, KeyAlgorithm, KeyEntry, KeyRing, SigningKey},
    definitions::{exposure_key_hmac::HMAC_SHA256_LEN, Parties},
    issuance::{CertificatePolicy, CodePolicy},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("configuration validation failed: {0}")]
    Validation(String),
    #[error("key '{kid}': {source}")]
    Key { kid: String, source: cose::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Stamped into every credential as `iss`.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Stamped into every credential as `aud`.
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default)]
    pub codes: CodesConfig,
    pub tokens: TokensConfig,
    pub certificates: CertificatesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CodesConfig {
    #[serde(default = "default_code_length")]
    pub length: usize,
    #[serde(default = "default_code_lifetime")]
    pub lifetime_secs: u64,
    /// Oldest accepted symptom date, in days. `0` accepts any past date.
    #[serde(default = "default_max_symptom_age")]
    pub max_symptom_age_days: u32,
}

impl Default for CodesConfig {
    fn default() -> Self {
        Self {
            length: default_code_length(),
            lifetime_secs: default_code_lifetime(),
            max_symptom_age_days: default_max_symptom_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokensConfig {
    #[serde(default = "default_token_lifetime")]
    pub lifetime_secs: u64,
    #[serde(default = "default_token_overlap")]
    pub rotation_overlap_secs: u64,
    pub keys: Vec<KeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificatesConfig {
    #[serde(default = "default_certificate_lifetime")]
    pub lifetime_secs: u64,
    #[serde(default = "default_certificate_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_hmac_len")]
    pub hmac_len: usize,
    #[serde(default = "default_certificate_overlap")]
    pub rotation_overlap_secs: u64,
    pub keys: Vec<KeyConfig>,
}

/// One signing key. Exactly one of `pem_file` and `pem` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    pub kid: String,
    #[serde(default)]
    pub algorithm: KeyAlgorithm,
    #[serde(default)]
    pub pem_file: Option<PathBuf>,
    /// Inline PKCS#8 PEM.
    #[serde(default)]
    pub pem: Option<String>,
    /// RFC 3339 instant the key starts signing; always valid when absent.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_from: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Codes live only as long as the process.
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Config {
    /// Load and validate the configuration at `path`.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    /// Parse and validate a configuration. Relative paths resolve against the
    /// working directory.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.code_policy()?
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.certificate_policy()?
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        if !self.token_lifetime()?.is_positive() {
            return Err(Error::Validation("token lifetime must be positive".into()));
        }
        for (name, keys) in [
            ("tokens", &self.tokens.keys),
            ("certificates", &self.certificates.keys),
        ] {
            if keys.is_empty() {
                return Err(Error::Validation(format!(
                    "[{name}] must list at least one key"
                )));
            }
            if let Some(key) = keys.iter().find(|k| k.pem.is_some() == k.pem_file.is_some()) {
                return Err(Error::Validation(format!(
                    "key '{}' must set exactly one of pem_file and pem",
                    key.kid
                )));
            }
        }
        Ok(())
    }

    pub fn parties(&self) -> Parties {
        Parties::new(&self.issuer, &self.audience)
    }

    pub fn code_policy(&self) -> Result<CodePolicy, Error> {
        let max_symptom_age = match self.codes.max_symptom_age_days {
            0 => None,
            days => Some(Duration::days(i64::from(days))),
        };
        Ok(CodePolicy {
            length: self.codes.length,
            lifetime: seconds("codes.lifetime_secs", self.codes.lifetime_secs)?,
            max_symptom_age,
        })
    }

    pub fn token_lifetime(&self) -> Result<Duration, Error> {
        seconds("tokens.lifetime_secs", self.tokens.lifetime_secs)
    }

    pub fn certificate_policy(&self) -> Result<CertificatePolicy, Error> {
        Ok(CertificatePolicy {
            lifetime: seconds("certificates.lifetime_secs", self.certificates.lifetime_secs)?,
            max_lifetime: seconds(
                "certificates.max_lifetime_secs",
                self.certificates.max_lifetime_secs,
            )?,
            hmac_len: self.certificates.hmac_len,
        })
    }

    pub fn token_keys(&self) -> Result<KeyRing, Error> {
        self.key_ring(
            &self.tokens.keys,
            seconds("tokens.rotation_overlap_secs", self.tokens.rotation_overlap_secs)?,
        )
    }

    pub fn certificate_keys(&self) -> Result<KeyRing, Error> {
        self.key_ring(
            &self.certificates.keys,
            seconds(
                "certificates.rotation_overlap_secs",
                self.certificates.rotation_overlap_secs,
            )?,
        )
    }

    /// The SQLite database path, resolved against the config file's directory.
    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.store.path)
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store.busy_timeout_ms)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn key_ring(&self, keys: &[KeyConfig], overlap: Duration) -> Result<KeyRing, Error> {
        let entries = keys
            .iter()
            .map(|k| self.load_key(k))
            .collect::<Result<Vec<_>, _>>()?;
        KeyRing::new(entries, overlap).map_err(|e| Error::Validation(e.to_string()))
    }

    fn load_key(&self, config: &KeyConfig) -> Result<KeyEntry, Error> {
        let pem = match (&config.pem, &config.pem_file) {
            (Some(pem), _) => zeroize::Zeroizing::new(pem.clone()),
            (None, Some(file)) => {
                let path = self.resolve(file);
                std::fs::read_to_string(&path)
                    .map(zeroize::Zeroizing::new)
                    .map_err(|source| Error::Io { path, source })?
            }
            (None, None) => {
                return Err(Error::Validation(format!(
                    "key '{}' has no key material",
                    config.kid
                )))
            }
        };
        let key = SigningKey::from_pkcs8_pem(config.algorithm, &pem).map_err(|source| {
            Error::Key {
                kid: config.kid.clone(),
                source,
            }
        })?;
        tracing::debug!(kid = %config.kid, algorithm = %config.algorithm, "loaded signing key");
        Ok(KeyEntry {
            kid: config.kid.clone(),
            key,
            valid_from: config.valid_from.unwrap_or(OffsetDateTime::UNIX_EPOCH),
        })
    }
}

fn seconds(name: &str, secs: u64) -> Result<Duration, Error> {
    i64::try_from(secs)
        .map(Duration::seconds)
        .map_err(|_| Error::Validation(format!("{name} is out of range")))
}

fn default_issuer() -> String {
    "enverify".to_string()
}

fn default_audience() -> String {
    "exposure-notifications-server".to_string()
}

const fn default_code_length() -> usize {
    16
}

const fn default_code_lifetime() -> u64 {
    15 * 60
}

const fn default_max_symptom_age() -> u32 {
    14
}

const fn default_token_lifetime() -> u64 {
    24 * 60 * 60
}

const fn default_token_overlap() -> u64 {
    2 * 24 * 60 * 60
}

const fn default_certificate_lifetime() -> u64 {
    15 * 60
}

const fn default_certificate_max_lifetime() -> u64 {
    60 * 60
}

const fn default_hmac_len() -> usize {
    HMAC_SHA256_LEN
}

const fn default_certificate_overlap() -> u64 {
    60 * 60
}

fn default_store_path() -> PathBuf {
    PathBuf::from("enverify.db")
}

const fn default_busy_timeout() -> u64 {
    5000
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn pem() -> String {
        let pem = SigningKey::generate_pem(KeyAlgorithm::ES256).unwrap();
        String::clone(&pem)
    }

    fn minimal() -> String {
        format!(
            r#"
[tokens]
[[tokens.keys]]
kid = "token-v1"
pem = """{}"""

[certificates]
[[certificates.keys]]
kid = "cert-v1"
pem = """{}"""
"#,
            pem(),
            pem()
        )
    }

    #[test]
    fn defaults() {
        let config = Config::from_toml(&minimal()).unwrap();
        assert_eq!(config.code_policy().unwrap(), CodePolicy::default());
        assert_eq!(
            config.certificate_policy().unwrap(),
            CertificatePolicy::default()
        );
        assert_eq!(config.token_lifetime().unwrap(), Duration::hours(24));
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.parties().issuer, "enverify");

        let keys = config.token_keys().unwrap();
        assert_eq!(keys.entries()[0].kid, "token-v1");
        assert_eq!(keys.entries()[0].valid_from, OffsetDateTime::UNIX_EPOCH);
        assert!(config.certificate_keys().is_ok());
    }

    #[test]
    fn rejects_certificate_lifetime_above_ceiling() {
        let toml = minimal().replace(
            "[certificates]",
            "[certificates]\nlifetime_secs = 7200\nmax_lifetime_secs = 3600",
        );
        assert!(matches!(
            Config::from_toml(&toml),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn rejects_short_codes_and_empty_key_lists() {
        let toml = format!("[codes]\nlength = 4\n{}", minimal());
        assert!(matches!(
            Config::from_toml(&toml),
            Err(Error::Validation(_))
        ));

        let toml = "[tokens]\nkeys = []\n[certificates]\nkeys = []\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = format!("colour = \"blue\"\n{}", minimal());
        assert!(matches!(Config::from_toml(&toml), Err(Error::Parse(_))));
    }

    #[test]
    fn unlimited_symptom_age() {
        let toml = format!("[codes]\nmax_symptom_age_days = 0\n{}", minimal());
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.code_policy().unwrap().max_symptom_age, None);
    }

    #[test]
    fn pem_files_resolve_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keys")).unwrap();
        std::fs::write(dir.path().join("keys/token.pem"), pem()).unwrap();
        std::fs::write(
            dir.path().join("keys/cert.pem"),
            SigningKey::generate_pem(KeyAlgorithm::ES384)
                .unwrap()
                .as_bytes(),
        )
        .unwrap();
        let path = dir.path().join("enverify.toml");
        std::fs::write(
            &path,
            r#"
issuer = "health-authority"

[tokens]
[[tokens.keys]]
kid = "token-v1"
pem_file = "keys/token.pem"
valid_from = "2024-01-01T00:00:00Z"

[certificates]
[[certificates.keys]]
kid = "cert-v1"
algorithm = "ES384"
pem_file = "keys/cert.pem"

[store]
backend = "sqlite"
path = "codes.db"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store_path(), dir.path().join("codes.db"));
        assert_eq!(
            config.token_keys().unwrap().entries()[0].valid_from,
            datetime!(2024-01-01 00:00 UTC)
        );
        assert_eq!(
            config.certificate_keys().unwrap().entries()[0]
                .key
                .key_algorithm(),
            KeyAlgorithm::ES384
        );
    }

    #[test]
    fn wrong_algorithm_for_key() {
        let toml = minimal().replace(
            "kid = \"cert-v1\"",
            "kid = \"cert-v1\"\nalgorithm = \"ES384\"",
        );
        let config = Config::from_toml(&toml).unwrap();
        assert!(matches!(
            config.certificate_keys(),
            Err(Error::Key { kid, .. }) if kid == "cert-v1"
        ));
    }
}
