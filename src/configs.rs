//! Application configuration loaded from `certica.toml`.
//!
//! Every field has a serde default, so a missing file or a partial one
//! yields a usable [`AppConfig`].

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::authority_store::CaRequest;
use crate::error::{CerticaError, Result};
use crate::layout::Layout;
use crate::signing::{CertType, SigningRequest};
use crate::trust_store::TrustSettings;

pub const DEFAULT_CONFIG_PATH: &str = "certica.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub authority_defaults: AuthorityDefaults,
    #[serde(default)]
    pub certificate_defaults: CertificateDefaults,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            authority_defaults: AuthorityDefaults::default(),
            certificate_defaults: CertificateDefaults::default(),
            trust: TrustConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthorityDefaults {
    #[serde(default = "default_ca_organization")]
    pub organization: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_city")]
    pub city: String,
    #[serde(default = "default_ca_validity")]
    pub validity_days: u32,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
}

impl Default for AuthorityDefaults {
    fn default() -> Self {
        Self {
            organization: default_ca_organization(),
            country: default_country(),
            state: default_state(),
            city: default_city(),
            validity_days: default_ca_validity(),
            key_size: default_key_size(),
        }
    }
}

impl AuthorityDefaults {
    /// A CA request pre-filled with these defaults
    pub fn request(&self, name: &str) -> CaRequest {
        CaRequest::new(name)
            .organization(&self.organization)
            .country(&self.country)
            .state(&self.state)
            .city(&self.city)
            .validity_days(self.validity_days)
            .key_size(self.key_size)
    }
}

fn default_ca_organization() -> String {
    "Development CA".to_string()
}

fn default_country() -> String {
    "CN".to_string()
}

fn default_state() -> String {
    "Beijing".to_string()
}

fn default_city() -> String {
    "Beijing".to_string()
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

fn default_key_size() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CertificateDefaults {
    #[serde(rename = "type", default = "default_cert_type")]
    pub cert_type: CertType,
    #[serde(default = "default_cert_validity")]
    pub validity_days: u32,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
}

impl Default for CertificateDefaults {
    fn default() -> Self {
        Self {
            cert_type: default_cert_type(),
            validity_days: default_cert_validity(),
            key_size: default_key_size(),
        }
    }
}

impl CertificateDefaults {
    pub fn request(&self, cert_name: &str, ca_name: &str) -> SigningRequest {
        SigningRequest::new(cert_name, ca_name, self.cert_type)
            .validity_days(self.validity_days)
            .key_size(self.key_size)
    }
}

fn default_cert_type() -> CertType {
    CertType::Server
}

fn default_cert_validity() -> u32 {
    365
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    #[serde(default = "default_os_release_path")]
    pub os_release_path: PathBuf,
    #[serde(default = "default_anchor_root")]
    pub anchor_root: PathBuf,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            os_release_path: default_os_release_path(),
            anchor_root: default_anchor_root(),
            platform: default_platform(),
            use_sudo: default_use_sudo(),
        }
    }
}

impl TrustConfig {
    pub fn settings(&self) -> TrustSettings {
        TrustSettings {
            os_release_path: self.os_release_path.clone(),
            anchor_root: self.anchor_root.clone(),
            platform: self.platform.clone(),
        }
    }
}

fn default_os_release_path() -> PathBuf {
    PathBuf::from("/etc/os-release")
}

fn default_anchor_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

fn default_use_sudo() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
            .map_err(|e| CerticaError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).map_err(|e| CerticaError::config(e.to_string()))
    }

    /// Load `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.base_dir, PathBuf::from("output"));
        assert_eq!(config.authority_defaults.validity_days, 3650);
        assert_eq!(config.certificate_defaults.cert_type, CertType::Server);
        assert!(config.trust.use_sudo);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
base_dir = "/srv/pki"

[authority_defaults]
organization = "Acme"

[certificate_defaults]
type = "client"
validity_days = 30

[trust]
use_sudo = false
anchor_root = "/tmp/root"
"#,
        )
        .unwrap();
        assert_eq!(config.layout().base_dir(), Path::new("/srv/pki"));
        assert_eq!(config.authority_defaults.organization, "Acme");
        assert_eq!(config.authority_defaults.country, "CN");
        assert_eq!(config.certificate_defaults.cert_type, CertType::Client);
        assert_eq!(config.certificate_defaults.key_size, 2048);
        assert_eq!(config.trust.settings().anchor_root, PathBuf::from("/tmp/root"));

        let req = config.certificate_defaults.request("web", "acme");
        assert_eq!(req.validity_days, 30);
        assert_eq!(req.cert_type, CertType::Client);
        let ca = config.authority_defaults.request("acme");
        assert_eq!(ca.common_name(), "Acme Root CA");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("certica.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certica.toml");
        fs::write(&path, "base_dir = [").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
