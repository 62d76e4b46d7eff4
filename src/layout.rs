//! On-disk layout of CA, certificate and template artifacts.
//!
//! ```text
//! {base}/ca/{ca_name}/{ca_name}.key.pem
//! {base}/ca/{ca_name}/{ca_name}.cert.pem
//! {base}/certs/{ca_name}/{cert_name}/key.pem
//! {base}/certs/{ca_name}/{cert_name}/cert.pem
//! {base}/templates/{template_name}.json
//! ```
//!
//! Dot-prefixed entries are reserved for temporary files and tombstones of
//! in-flight deletions, so entity names may never start with a dot.

use std::path::{Path, PathBuf};

use crate::error::{CerticaError, Result};

const CA_DIR: &str = "ca";
const CERTS_DIR: &str = "certs";
const TEMPLATES_DIR: &str = "templates";
const LEAF_KEY_FILE: &str = "key.pem";
const LEAF_CERT_FILE: &str = "cert.pem";

/// Key and certificate locations of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

/// Path arithmetic rooted at the configured base directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base_dir: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ca_root(&self) -> PathBuf {
        self.base_dir.join(CA_DIR)
    }

    pub fn certs_root(&self) -> PathBuf {
        self.base_dir.join(CERTS_DIR)
    }

    pub fn templates_root(&self) -> PathBuf {
        self.base_dir.join(TEMPLATES_DIR)
    }

    pub fn ca_dir(&self, ca_name: &str) -> PathBuf {
        self.ca_root().join(ca_name)
    }

    pub fn ca_paths(&self, ca_name: &str) -> ArtifactPaths {
        let dir = self.ca_dir(ca_name);
        ArtifactPaths {
            key_path: dir.join(format!("{ca_name}.key.pem")),
            cert_path: dir.join(format!("{ca_name}.cert.pem")),
        }
    }

    /// Every certificate signed by `ca_name` lives below this directory
    pub fn ca_certs_dir(&self, ca_name: &str) -> PathBuf {
        self.certs_root().join(ca_name)
    }

    pub fn cert_dir(&self, ca_name: &str, cert_name: &str) -> PathBuf {
        self.ca_certs_dir(ca_name).join(cert_name)
    }

    pub fn cert_paths(&self, ca_name: &str, cert_name: &str) -> ArtifactPaths {
        let dir = self.cert_dir(ca_name, cert_name);
        ArtifactPaths {
            key_path: dir.join(LEAF_KEY_FILE),
            cert_path: dir.join(LEAF_CERT_FILE),
        }
    }

    /// [`Layout::cert_paths`] for names taken from user input
    pub fn checked_cert_paths(&self, ca_name: &str, cert_name: &str) -> Result<ArtifactPaths> {
        validate_name("CA", ca_name)?;
        validate_name("certificate", cert_name)?;
        Ok(self.cert_paths(ca_name, cert_name))
    }

    pub fn template_path(&self, template_name: &str) -> PathBuf {
        self.templates_root().join(format!("{template_name}.json"))
    }

    /// Sibling name used while a directory is being removed
    pub fn tombstone_for(dir: &Path) -> Option<PathBuf> {
        let name = dir.file_name()?.to_str()?;
        Some(dir.with_file_name(format!(".{name}.deleting")))
    }
}

/// Reject names that cannot be used as a single directory component
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CerticaError::invalid_input(format!("{kind} name must not be empty")));
    }
    if name.starts_with('.') {
        return Err(CerticaError::invalid_input(format!(
            "{kind} name '{name}' must not start with '.'"
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(CerticaError::invalid_input(format!(
            "{kind} name '{name}' contains a path separator or control character"
        )));
    }
    Ok(())
}

/// Whether a directory entry is a reserved temporary or tombstone entry
pub(crate) fn is_reserved_entry(name: &str) -> bool {
    name.starts_with('.')
}
