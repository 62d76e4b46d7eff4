//! Certificate Store
//!
//! Owns `{base}/certs/{ca_name}/{cert_name}/`. Every leaf certificate is
//! bound to the authority whose directory it lives under; the owning CA name
//! is taken from the path, never from certificate contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authority_store::CertificateAuthority;
use crate::error::{CerticaError, ErrorKind, Result};
use crate::layout::{is_reserved_entry, validate_name, Layout};
use crate::repository::{bury_dir, ArtifactRepository};
use crate::signing::{CertType, Issuer, SigningEngine, SigningRequest};
use crate::toolkit::{CertDetails, CryptoToolkit};

/// A complete leaf certificate on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub name: String,
    pub ca_name: String,
    /// `None` when the stored certificate cannot be inspected
    pub cert_type: Option<CertType>,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

pub struct CertificateStore {
    layout: Layout,
    repository: Arc<dyn ArtifactRepository>,
    toolkit: Arc<dyn CryptoToolkit>,
    engine: SigningEngine,
}

impl CertificateStore {
    pub fn new(
        layout: Layout,
        repository: Arc<dyn ArtifactRepository>,
        toolkit: Arc<dyn CryptoToolkit>,
    ) -> Self {
        let engine = SigningEngine::new(toolkit.clone(), repository.clone());
        Self {
            layout,
            repository,
            toolkit,
            engine,
        }
    }

    /// Sign a leaf certificate with `ca` and store it under the CA's directory
    ///
    /// # Errors
    /// - `InvalidInput` if `request.ca_name` is not `ca.name` or the request is malformed
    /// - `NotFound` if the authority is not complete on disk
    /// - `AlreadyExists` if a certificate of that name exists, complete or not
    pub fn sign_certificate(
        &self,
        ca: &CertificateAuthority,
        request: &SigningRequest,
    ) -> Result<Certificate> {
        if request.ca_name != ca.name {
            return Err(CerticaError::invalid_input(format!(
                "request targets CA '{}' but was given CA '{}'",
                request.ca_name, ca.name
            )));
        }
        request.validate()?;
        if !self.repository.exists(&ca.key_path) || !self.repository.exists(&ca.cert_path) {
            return Err(CerticaError::not_found(format!(
                "CA '{}' is missing its key or certificate",
                ca.name
            )));
        }

        let dir = self.layout.cert_dir(&ca.name, &request.cert_name);
        if self.complete_certificate(&ca.name, &request.cert_name).is_some() {
            return Err(CerticaError::already_exists(format!(
                "certificate '{}' already exists under CA '{}'",
                request.cert_name, ca.name
            )));
        }
        self.repository.create_dir(&dir).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => CerticaError::already_exists(format!(
                "certificate '{}' under CA '{}' is incomplete or being created by another process; run cleanup to clear a stale entry",
                request.cert_name, ca.name
            )),
            _ => e,
        })?;

        let paths = self.layout.cert_paths(&ca.name, &request.cert_name);
        let issuer = Issuer::Authority {
            key_path: &ca.key_path,
            cert_path: &ca.cert_path,
        };
        let signed = match self.engine.sign(request, issuer, &paths) {
            Ok(signed) => signed,
            Err(e) => {
                if let Err(cleanup) = self.repository.remove_dir_if_empty(&dir) {
                    warn!(error = %cleanup, path = %dir.display(), "Failed to remove certificate directory");
                }
                return Err(e);
            }
        };

        info!(
            cert = %request.cert_name,
            ca = %ca.name,
            cert_type = %request.cert_type,
            cn = %signed.common_name,
            sans = signed.sans.len(),
            "Certificate signed"
        );
        Ok(Certificate {
            name: request.cert_name.clone(),
            ca_name: ca.name.clone(),
            cert_type: Some(request.cert_type),
            key_path: signed.key_path,
            cert_path: signed.cert_path,
        })
    }

    /// Complete certificates sorted by CA then name, optionally for one CA only
    ///
    /// Directory listings are read up front so that I/O failures are returned;
    /// completeness of each entry is checked as the iterator advances.
    pub fn list_certificates(
        &self,
        ca_filter: Option<&str>,
    ) -> Result<impl Iterator<Item = Certificate> + '_> {
        let ca_names = match ca_filter {
            Some(name) if validate_name("CA", name).is_ok() => vec![name.to_string()],
            Some(_) => Vec::new(),
            None => self.repository.list_dirs(&self.layout.certs_root())?,
        };

        let mut entries = Vec::new();
        for ca in ca_names.into_iter().filter(|ca| !is_reserved_entry(ca)) {
            for name in self.repository.list_dirs(&self.layout.ca_certs_dir(&ca))? {
                if !is_reserved_entry(&name) {
                    entries.push((ca.clone(), name));
                }
            }
        }
        Ok(entries
            .into_iter()
            .filter_map(move |(ca, name)| self.complete_certificate(&ca, &name)))
    }

    /// Text dump of a certificate: subject, issuer, validity, extensions
    pub fn get_certificate_info(&self, cert_path: &Path) -> Result<String> {
        let pem = self.repository.read(cert_path)?;
        self.toolkit.dump_cert_text(&pem)
    }

    pub fn describe_certificate(&self, cert_path: &Path) -> Result<CertDetails> {
        let pem = self.repository.read(cert_path)?;
        self.toolkit.inspect(&pem)
    }

    /// Remove a certificate's directory; returns whether a complete
    /// certificate existed
    pub fn delete_certificate(&self, ca_name: &str, cert_name: &str) -> Result<bool> {
        validate_name("CA", ca_name)?;
        validate_name("certificate", cert_name)?;
        let existed = self.is_complete(ca_name, cert_name);
        let removed = bury_dir(
            self.repository.as_ref(),
            &self.layout.cert_dir(ca_name, cert_name),
        )?;
        if existed {
            info!(cert = %cert_name, ca = %ca_name, "Certificate deleted");
        } else if removed {
            warn!(cert = %cert_name, ca = %ca_name, "Removed leftovers of an incomplete certificate");
        } else {
            debug!(cert = %cert_name, ca = %ca_name, "Certificate does not exist");
        }
        Ok(existed)
    }

    /// Remove partial certificates, orphans of missing CAs, temporary files
    /// and interrupted deletions
    pub fn purge_partial(&self) -> Result<Vec<PathBuf>> {
        let root = self.layout.certs_root();
        let mut removed = Vec::new();

        for ca in self.repository.list_dirs(&root)? {
            let ca_dir = root.join(&ca);
            if is_reserved_entry(&ca) || !self.ca_is_complete(&ca) {
                warn!(path = %ca_dir.display(), "Removing certificates without a complete CA");
                self.repository.remove_dir_all(&ca_dir)?;
                removed.push(ca_dir);
                continue;
            }
            for name in self.repository.list_dirs(&ca_dir)? {
                let dir = ca_dir.join(&name);
                if is_reserved_entry(&name) || self.complete_certificate(&ca, &name).is_none() {
                    warn!(path = %dir.display(), "Removing partial certificate entry");
                    self.repository.remove_dir_all(&dir)?;
                    removed.push(dir);
                    continue;
                }
                for file in self.repository.list_files(&dir)? {
                    if is_reserved_entry(&file) {
                        let path = dir.join(&file);
                        self.repository.remove_file(&path)?;
                        removed.push(path);
                    }
                }
            }
        }
        Ok(removed)
    }

    fn ca_is_complete(&self, ca_name: &str) -> bool {
        let paths = self.layout.ca_paths(ca_name);
        self.repository.exists(&paths.key_path) && self.repository.exists(&paths.cert_path)
    }

    fn is_complete(&self, ca_name: &str, cert_name: &str) -> bool {
        let paths = self.layout.cert_paths(ca_name, cert_name);
        self.repository.exists(&paths.key_path) && self.repository.exists(&paths.cert_path)
    }

    fn complete_certificate(&self, ca_name: &str, cert_name: &str) -> Option<Certificate> {
        if !self.is_complete(ca_name, cert_name) {
            return None;
        }
        let paths = self.layout.cert_paths(ca_name, cert_name);
        let cert_type = self
            .describe_certificate(&paths.cert_path)
            .ok()
            .and_then(|details| details.cert_type);
        Some(Certificate {
            name: cert_name.to_string(),
            ca_name: ca_name.to_string(),
            cert_type,
            key_path: paths.key_path,
            cert_path: paths.cert_path,
        })
    }
}
