//! Signing Engine
//!
//! Turns a [`SigningRequest`] plus issuer materials into a new key/certificate
//! pair written to its destination paths.
//!
//! # Algorithm
//! 1. Generate a private key of `key_size` bits
//! 2. Resolve the effective CN: `common_name`, else the first DNS name, else
//!    the first IP address, else `cert_name`
//! 3. Build a CSR with the CN and organization/location fields
//! 4. Attach the SAN extension: every DNS name, then every IP address
//! 5. Apply server/client usage, or CA usage when self-signed
//! 6. Sign with the issuer key (or the new key itself) for `validity_days`
//! 7. Write the key (`0600`) then the certificate (`0644`); if the certificate
//!    cannot be written the key is removed again
//!
//! Key bytes live only inside [`KeyMaterial`] for the duration of
//! [`SigningEngine::sign`] and are zeroized when it returns.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CerticaError, Result};
use crate::layout::{validate_name, ArtifactPaths};
use crate::repository::{ArtifactRepository, FileMode};
use crate::toolkit::{
    CertParams, CertProfile, CryptoToolkit, IssuerMaterial, KeyMaterial, SanEntry, SubjectFields,
};

const DEFAULT_VALIDITY_DAYS: u32 = 365;
const DEFAULT_KEY_SIZE: u32 = 2048;

/// Intended use of a leaf certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertType {
    Server,
    Client,
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertType::Server => write!(f, "server"),
            CertType::Client => write!(f, "client"),
        }
    }
}

impl FromStr for CertType {
    type Err = CerticaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(CertType::Server),
            "client" => Ok(CertType::Client),
            other => Err(CerticaError::invalid_input(format!(
                "certificate type must be 'server' or 'client', got '{other}'"
            ))),
        }
    }
}

/// Parameters of one signing operation; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub cert_name: String,
    pub ca_name: String,
    pub cert_type: CertType,
    /// Empty means "derive from SANs or the certificate name"
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub organization: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub validity_days: u32,
    pub key_size: u32,
}

impl SigningRequest {
    /// Create a request with empty subject fields, 365 days and 2048-bit keys
    pub fn new<N: Into<String>, C: Into<String>>(cert_name: N, ca_name: C, cert_type: CertType) -> Self {
        Self {
            cert_name: cert_name.into(),
            ca_name: ca_name.into(),
            cert_type,
            common_name: String::new(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            organization: String::new(),
            country: String::new(),
            state: String::new(),
            city: String::new(),
            validity_days: DEFAULT_VALIDITY_DAYS,
            key_size: DEFAULT_KEY_SIZE,
        }
    }

    pub fn common_name<S: Into<String>>(mut self, cn: S) -> Self {
        self.common_name = cn.into();
        self
    }

    pub fn dns_name<S: Into<String>>(mut self, name: S) -> Self {
        self.dns_names.push(name.into());
        self
    }

    pub fn ip_address<S: Into<String>>(mut self, ip: S) -> Self {
        self.ip_addresses.push(ip.into());
        self
    }

    pub fn organization<S: Into<String>>(mut self, org: S) -> Self {
        self.organization = org.into();
        self
    }

    /// Two-letter ISO country code
    pub fn country<S: Into<String>>(mut self, country: S) -> Self {
        self.country = country.into();
        self
    }

    pub fn state<S: Into<String>>(mut self, state: S) -> Self {
        self.state = state.into();
        self
    }

    pub fn city<S: Into<String>>(mut self, city: S) -> Self {
        self.city = city.into();
        self
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// CN actually written into the subject
    pub fn effective_common_name(&self) -> &str {
        if !self.common_name.is_empty() {
            return &self.common_name;
        }
        self.dns_names
            .first()
            .or_else(|| self.ip_addresses.first())
            .map(String::as_str)
            .unwrap_or(&self.cert_name)
    }

    /// Check every field and return the SAN entries in signing order
    pub fn validate(&self) -> Result<Vec<SanEntry>> {
        validate_name("certificate", &self.cert_name)?;
        validate_name("CA", &self.ca_name)?;
        if self.validity_days == 0 {
            return Err(CerticaError::invalid_input("validity days must be positive"));
        }
        if self.key_size == 0 {
            return Err(CerticaError::invalid_input("key size must be positive"));
        }
        if !self.country.is_empty()
            && !(self.country.len() == 2 && self.country.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(CerticaError::invalid_input(format!(
                "country must be a two-letter code, got '{}'",
                self.country
            )));
        }

        let mut sans = Vec::with_capacity(self.dns_names.len() + self.ip_addresses.len());
        for dns in &self.dns_names {
            if dns.is_empty() || dns.chars().any(|c| c.is_whitespace() || c == ',') {
                return Err(CerticaError::invalid_input(format!(
                    "'{dns}' is not a valid DNS name"
                )));
            }
            sans.push(SanEntry::Dns(dns.clone()));
        }
        for ip in &self.ip_addresses {
            let addr = IpAddr::from_str(ip).map_err(|_| {
                CerticaError::invalid_input(format!("'{ip}' is not a valid IPv4/IPv6 address"))
            })?;
            sans.push(SanEntry::Ip(addr));
        }
        Ok(sans)
    }

    fn subject(&self) -> SubjectFields {
        SubjectFields {
            common_name: self.effective_common_name().to_string(),
            organization: self.organization.clone(),
            country: self.country.clone(),
            state: self.state.clone(),
            city: self.city.clone(),
        }
    }
}

/// Who signs the new certificate
#[derive(Debug, Clone, Copy)]
pub enum Issuer<'a> {
    /// The new key signs its own request; produces a root authority
    SelfSigned,
    /// An existing authority's key and certificate
    Authority { key_path: &'a Path, cert_path: &'a Path },
}

impl fmt::Display for Issuer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issuer::SelfSigned => write!(f, "self-signed"),
            Issuer::Authority { cert_path, .. } => write!(f, "{}", cert_path.display()),
        }
    }
}

/// Result of a successful signing operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArtifacts {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub common_name: String,
    pub sans: Vec<SanEntry>,
    pub validity_days: u32,
    pub key_size: u32,
}

/// Issues certificates through a [`CryptoToolkit`] and persists them
#[derive(Clone)]
pub struct SigningEngine {
    toolkit: Arc<dyn CryptoToolkit>,
    repository: Arc<dyn ArtifactRepository>,
}

impl SigningEngine {
    pub fn new(toolkit: Arc<dyn CryptoToolkit>, repository: Arc<dyn ArtifactRepository>) -> Self {
        Self {
            toolkit,
            repository,
        }
    }

    /// Sign `request` and write the result to `destination`
    ///
    /// # Errors
    /// - `InvalidInput` for a malformed request
    /// - `NotFound` if the issuer's key or certificate cannot be read
    /// - `ExternalToolFailure` if key generation or signing fails
    /// - `AlreadyExists` if a destination file is already present
    pub fn sign(
        &self,
        request: &SigningRequest,
        issuer: Issuer<'_>,
        destination: &ArtifactPaths,
    ) -> Result<SignedArtifacts> {
        let sans = request.validate()?;
        let subject = request.subject();

        let issuer_material = match issuer {
            Issuer::SelfSigned => None,
            Issuer::Authority {
                key_path,
                cert_path,
            } => {
                let key = KeyMaterial::from_pem(self.repository.read(key_path)?);
                let cert = self.repository.read(cert_path)?;
                Some((key, cert))
            }
        };
        let profile = match issuer {
            Issuer::SelfSigned => CertProfile::RootAuthority,
            Issuer::Authority { .. } => CertProfile::Leaf(request.cert_type),
        };

        debug!(
            cert = %request.cert_name,
            cn = %subject.common_name,
            key_size = request.key_size,
            "Generating private key"
        );
        let key = self
            .toolkit
            .generate_key(request.key_size)
            .map_err(|e| with_inputs(e, request, &issuer))?;

        let cert_pem = self
            .toolkit
            .build_and_sign_cert(&CertParams {
                subject: &subject,
                sans: &sans,
                profile,
                validity_days: request.validity_days,
                subject_key: &key,
                issuer: issuer_material.as_ref().map(|(key, cert)| IssuerMaterial {
                    key,
                    cert_pem: cert,
                }),
            })
            .map_err(|e| with_inputs(e, request, &issuer))?;

        self.repository
            .write_new(&destination.key_path, key.expose_pem(), FileMode::Private)?;
        if let Err(e) = self
            .repository
            .write_new(&destination.cert_path, &cert_pem, FileMode::Public)
        {
            warn!(
                path = %destination.key_path.display(),
                "Certificate write failed; removing freshly written key"
            );
            self.discard_written(&destination.key_path, key.expose_pem());
            return Err(e);
        }

        Ok(SignedArtifacts {
            key_path: destination.key_path.clone(),
            cert_path: destination.cert_path.clone(),
            common_name: subject.common_name,
            sans,
            validity_days: request.validity_days,
            key_size: request.key_size,
        })
    }

    /// Remove `path` only if it still holds `written`
    fn discard_written(&self, path: &Path, written: &[u8]) {
        match self.repository.read(path) {
            Ok(current) if current == written => {
                if let Err(cleanup) = self.repository.remove_file(path) {
                    warn!(error = %cleanup, path = %path.display(), "Failed to remove partial key");
                }
            }
            Ok(_) => warn!(path = %path.display(), "Key was replaced by another writer; leaving it"),
            Err(e) => debug!(error = %e, path = %path.display(), "Partial key already gone"),
        }
    }
}

/// Attach the decision inputs of a request to a toolkit failure
fn with_inputs(error: CerticaError, request: &SigningRequest, issuer: &Issuer<'_>) -> CerticaError {
    match error {
        CerticaError::ExternalToolFailure {
            tool,
            status,
            message,
        } => CerticaError::ExternalToolFailure {
            tool,
            status,
            message: format!(
                "{message} [cert={}, type={}, cn={}, key_size={}, validity_days={}, issuer={}]",
                request.cert_name,
                request.cert_type,
                request.effective_common_name(),
                request.key_size,
                request.validity_days,
                issuer
            ),
        },
        other => other,
    }
}
