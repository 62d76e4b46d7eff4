//! Authority Store
//!
//! Owns the `{base}/ca/{ca_name}/` subtree. An authority exists only when
//! both its key and certificate files are present; a directory holding just
//! one of them is partial, invisible to listings and removed by
//! [`AuthorityStore::purge_partial`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::certificate_store::{Certificate, CertificateStore};
use crate::error::{CerticaError, ErrorKind, Result};
use crate::layout::{is_reserved_entry, validate_name, Layout};
use crate::repository::{bury_dir, ArtifactRepository};
use crate::signing::{CertType, Issuer, SigningEngine, SigningRequest};
use crate::toolkit::{CertDetails, CryptoToolkit};

const DEFAULT_ORGANIZATION: &str = "Development CA";
const DEFAULT_COUNTRY: &str = "CN";
const DEFAULT_STATE: &str = "Beijing";
const DEFAULT_CITY: &str = "Beijing";
const DEFAULT_CA_VALIDITY_DAYS: u32 = 3650;
const DEFAULT_CA_KEY_SIZE: u32 = 2048;

/// A complete root authority on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub name: String,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

/// Parameters for [`AuthorityStore::create_root_ca`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaRequest {
    pub name: String,
    pub organization: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub validity_days: u32,
    pub key_size: u32,
}

impl CaRequest {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            country: DEFAULT_COUNTRY.to_string(),
            state: DEFAULT_STATE.to_string(),
            city: DEFAULT_CITY.to_string(),
            validity_days: DEFAULT_CA_VALIDITY_DAYS,
            key_size: DEFAULT_CA_KEY_SIZE,
        }
    }

    pub fn organization<S: Into<String>>(mut self, org: S) -> Self {
        self.organization = org.into();
        self
    }

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

    /// Subject CN of the root certificate
    pub fn common_name(&self) -> String {
        if self.organization.is_empty() {
            self.name.clone()
        } else {
            format!("{} Root CA", self.organization)
        }
    }
}

/// Outcome of a successful [`AuthorityStore::create_root_ca`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCreated {
    pub authority: CertificateAuthority,
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub validity_days: u32,
    pub key_size: u32,
}

pub struct AuthorityStore {
    layout: Layout,
    repository: Arc<dyn ArtifactRepository>,
    toolkit: Arc<dyn CryptoToolkit>,
    engine: SigningEngine,
}

impl AuthorityStore {
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

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Create a self-signed root authority
    ///
    /// The CA directory is claimed exclusively, so a partial entry left by an
    /// interrupted run (or a concurrent create) yields `AlreadyExists` until
    /// [`AuthorityStore::purge_partial`] clears it. If signing or writing
    /// fails, the files written by this call are removed before the error is
    /// returned.
    pub fn create_root_ca(&self, request: &CaRequest) -> Result<CaCreated> {
        validate_name("CA", &request.name)?;
        if self.get_ca(&request.name).is_some() {
            return Err(CerticaError::already_exists(format!(
                "CA '{}' already exists",
                request.name
            )));
        }

        let dir = self.layout.ca_dir(&request.name);
        self.repository.create_dir(&dir).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => CerticaError::already_exists(format!(
                "CA '{}' is incomplete or being created by another process; run cleanup to clear a stale entry",
                request.name
            )),
            _ => e,
        })?;

        let signing_request = SigningRequest::new(&request.name, &request.name, CertType::Server)
            .common_name(request.common_name())
            .organization(&request.organization)
            .country(&request.country)
            .state(&request.state)
            .city(&request.city)
            .validity_days(request.validity_days)
            .key_size(request.key_size);
        let paths = self.layout.ca_paths(&request.name);

        let signed = match self.engine.sign(&signing_request, Issuer::SelfSigned, &paths) {
            Ok(signed) => signed,
            Err(e) => {
                if let Err(cleanup) = self.repository.remove_dir_if_empty(&dir) {
                    warn!(error = %cleanup, path = %dir.display(), "Failed to remove CA directory");
                }
                return Err(e);
            }
        };

        info!(ca = %request.name, cn = %signed.common_name, "Root CA created");
        Ok(CaCreated {
            authority: CertificateAuthority {
                name: request.name.clone(),
                key_path: signed.key_path,
                cert_path: signed.cert_path,
            },
            common_name: signed.common_name,
            organization: request.organization.clone(),
            country: request.country.clone(),
            state: request.state.clone(),
            city: request.city.clone(),
            validity_days: signed.validity_days,
            key_size: signed.key_size,
        })
    }

    /// Complete authorities, sorted by name
    ///
    /// The directory is read once per call; completeness of each entry is
    /// checked as the iterator advances.
    pub fn list_cas(&self) -> Result<impl Iterator<Item = CertificateAuthority> + '_> {
        let names = self.repository.list_dirs(&self.layout.ca_root())?;
        Ok(names
            .into_iter()
            .filter(|name| !is_reserved_entry(name))
            .filter_map(move |name| self.complete_ca(&name)))
    }

    /// The authority named `name`, if it is complete
    pub fn get_ca(&self, name: &str) -> Option<CertificateAuthority> {
        if validate_name("CA", name).is_err() {
            return None;
        }
        self.complete_ca(name)
    }

    /// Text dump of a certificate: subject, issuer, validity, extensions
    pub fn get_ca_info(&self, cert_path: &Path) -> Result<String> {
        let pem = self.repository.read(cert_path)?;
        self.toolkit.dump_cert_text(&pem)
    }

    pub fn describe_certificate(&self, cert_path: &Path) -> Result<CertDetails> {
        let pem = self.repository.read(cert_path)?;
        self.toolkit.inspect(&pem)
    }

    /// Leaf certificates signed by `ca_name`
    pub fn certificates_of(&self, ca_name: &str) -> Result<Vec<Certificate>> {
        let certs = self.certificate_view();
        let listed = certs.list_certificates(Some(ca_name))?;
        Ok(listed.collect())
    }

    /// Delete an authority and every certificate it signed
    ///
    /// Certificates go first, so a certificate is never visible without its
    /// authority. Returns whether a complete authority existed.
    pub fn delete_ca(&self, name: &str) -> Result<bool> {
        validate_name("CA", name)?;
        let existed = self.complete_ca(name).is_some();

        let certs_removed = bury_dir(self.repository.as_ref(), &self.layout.ca_certs_dir(name))?;
        let ca_removed = bury_dir(self.repository.as_ref(), &self.layout.ca_dir(name))?;

        if existed {
            info!(ca = %name, cascade = certs_removed, "CA deleted");
        } else if ca_removed || certs_removed {
            warn!(ca = %name, "Removed leftovers of an incomplete CA");
        } else {
            debug!(ca = %name, "CA does not exist; nothing to delete");
        }
        Ok(existed)
    }

    /// Remove partial authorities, temporary files and interrupted deletions
    pub fn purge_partial(&self) -> Result<Vec<PathBuf>> {
        let root = self.layout.ca_root();
        let mut removed = Vec::new();

        for name in self.repository.list_dirs(&root)? {
            let dir = root.join(&name);
            if is_reserved_entry(&name) || self.complete_ca(&name).is_none() {
                warn!(path = %dir.display(), "Removing partial CA entry");
                self.repository.remove_dir_all(&dir)?;
                removed.push(dir);
                continue;
            }
            for file in self.repository.list_files(&dir)? {
                if is_reserved_entry(&file) {
                    let path = dir.join(&file);
                    warn!(path = %path.display(), "Removing leftover temporary file");
                    self.repository.remove_file(&path)?;
                    removed.push(path);
                }
            }
        }
        Ok(removed)
    }

    fn complete_ca(&self, name: &str) -> Option<CertificateAuthority> {
        let paths = self.layout.ca_paths(name);
        if self.repository.exists(&paths.key_path) && self.repository.exists(&paths.cert_path) {
            Some(CertificateAuthority {
                name: name.to_string(),
                key_path: paths.key_path,
                cert_path: paths.cert_path,
            })
        } else {
            None
        }
    }

    fn certificate_view(&self) -> CertificateStore {
        CertificateStore::new(
            self.layout.clone(),
            self.repository.clone(),
            self.toolkit.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{FileMode, MemoryRepository};
    use crate::toolkit::stub::StubToolkit;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn store() -> (AuthorityStore, Arc<MemoryRepository>, Arc<StubToolkit>) {
        let repo = Arc::new(MemoryRepository::new());
        let toolkit = Arc::new(StubToolkit::default());
        let store = AuthorityStore::new(Layout::new("/pki"), repo.clone(), toolkit.clone());
        (store, repo, toolkit)
    }

    #[test]
    fn test_create_root_ca_reports_parameters() {
        let (store, repo, _) = store();
        let created = store
            .create_root_ca(&CaRequest::new("myca").organization("Acme").validity_days(90))
            .unwrap();

        assert_eq!(created.common_name, "Acme Root CA");
        assert_eq!(created.validity_days, 90);
        assert_eq!(created.key_size, 2048);
        assert_eq!(created.country, "CN");
        assert_eq!(
            created.authority.key_path,
            PathBuf::from("/pki/ca/myca/myca.key.pem")
        );
        assert_eq!(repo.mode_of(&created.authority.key_path), Some(0o600));
        assert_eq!(repo.mode_of(&created.authority.cert_path), Some(0o644));
        assert_eq!(store.get_ca("myca"), Some(created.authority));
    }

    #[test]
    fn test_common_name_without_organization_is_ca_name() {
        let req = CaRequest::new("lab").organization("");
        assert_eq!(req.common_name(), "lab");
    }

    #[test]
    fn test_duplicate_create_leaves_original_untouched() {
        let (store, repo, _) = store();
        let first = store.create_root_ca(&CaRequest::new("myca")).unwrap();
        let key_before = repo.read(&first.authority.key_path).unwrap();
        let cert_before = repo.read(&first.authority.cert_path).unwrap();

        let err = store.create_root_ca(&CaRequest::new("myca")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(repo.read(&first.authority.key_path).unwrap(), key_before);
        assert_eq!(repo.read(&first.authority.cert_path).unwrap(), cert_before);
    }

    #[test]
    fn test_failed_signing_leaves_nothing_behind() {
        let (store, repo, toolkit) = store();
        toolkit.fail_sign.store(true, Ordering::SeqCst);

        let err = store.create_root_ca(&CaRequest::new("broken")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
        assert_eq!(toolkit.keys_generated.load(Ordering::SeqCst), 1);
        assert_eq!(repo.file_count_under(&store.layout().ca_dir("broken")), 0);
        assert!(!repo.is_dir(&store.layout().ca_dir("broken")));
        assert_eq!(store.list_cas().unwrap().count(), 0);
    }

    #[test]
    fn test_failed_cert_write_removes_key() {
        let (store, repo, _) = store();
        repo.fail_writes_to("broken.cert.pem");
        assert!(store.create_root_ca(&CaRequest::new("broken")).is_err());
        assert_eq!(repo.file_count_under(&store.layout().ca_dir("broken")), 0);
    }

    #[test]
    fn test_partial_ca_blocks_create_until_purged() {
        let (store, repo, _) = store();
        let paths = store.layout().ca_paths("half");
        repo.create_dir_all(&store.layout().ca_dir("half")).unwrap();
        repo.write_new(&paths.key_path, b"orphan key", FileMode::Private)
            .unwrap();

        assert!(store.get_ca("half").is_none());
        assert_eq!(store.list_cas().unwrap().count(), 0);

        let err = store.create_root_ca(&CaRequest::new("half")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(repo.read(&paths.key_path).unwrap(), b"orphan key");

        store.purge_partial().unwrap();
        store.create_root_ca(&CaRequest::new("half")).unwrap();
        assert_ne!(repo.read(&paths.key_path).unwrap(), b"orphan key");
    }

    /// Runs a second create of the same CA right after the first writes its key
    struct InterleavingRepository {
        inner: Arc<MemoryRepository>,
        trigger: &'static str,
        rival: Mutex<Option<AuthorityStore>>,
        rival_result: Mutex<Option<Result<CaCreated>>>,
    }

    impl ArtifactRepository for InterleavingRepository {
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }

        fn is_dir(&self, path: &Path) -> bool {
            self.inner.is_dir(path)
        }

        fn read(&self, path: &Path) -> Result<Vec<u8>> {
            self.inner.read(path)
        }

        fn write_new(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
            self.inner.write_new(path, contents, mode)?;
            if path.ends_with(self.trigger) {
                let rival = self.rival.lock().unwrap().take();
                if let Some(rival) = rival {
                    let result = rival.create_root_ca(&CaRequest::new("dev"));
                    *self.rival_result.lock().unwrap() = Some(result);
                }
            }
            Ok(())
        }

        fn write_replace(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
            self.inner.write_replace(path, contents, mode)
        }

        fn remove_file(&self, path: &Path) -> Result<bool> {
            self.inner.remove_file(path)
        }

        fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.create_dir_all(path)
        }

        fn create_dir(&self, path: &Path) -> Result<()> {
            self.inner.create_dir(path)
        }

        fn remove_dir_if_empty(&self, path: &Path) -> Result<bool> {
            self.inner.remove_dir_if_empty(path)
        }

        fn remove_dir_all(&self, path: &Path) -> Result<bool> {
            self.inner.remove_dir_all(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            self.inner.rename(from, to)
        }

        fn list_dirs(&self, path: &Path) -> Result<Vec<String>> {
            self.inner.list_dirs(path)
        }

        fn list_files(&self, path: &Path) -> Result<Vec<String>> {
            self.inner.list_files(path)
        }
    }

    #[test]
    fn test_interleaved_creates_keep_first_writer_intact() {
        let inner = Arc::new(MemoryRepository::new());
        let toolkit = Arc::new(StubToolkit::default());
        let layout = Layout::new("/pki");
        let rival = AuthorityStore::new(layout.clone(), inner.clone(), toolkit.clone());
        let repo = Arc::new(InterleavingRepository {
            inner: inner.clone(),
            trigger: "dev.key.pem",
            rival: Mutex::new(Some(rival)),
            rival_result: Mutex::new(None),
        });
        let store = AuthorityStore::new(layout, repo.clone(), toolkit);

        let created = store.create_root_ca(&CaRequest::new("dev")).unwrap();

        let rival_result = repo.rival_result.lock().unwrap().take().unwrap();
        assert_eq!(rival_result.unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert!(inner.exists(&created.authority.key_path));
        assert!(inner.exists(&created.authority.cert_path));
        assert_eq!(store.get_ca("dev"), Some(created.authority));
    }

    #[test]
    fn test_list_cas_sorted_and_restartable() {
        let (store, _, _) = store();
        for name in ["zeta", "alpha", "mid"] {
            store.create_root_ca(&CaRequest::new(name)).unwrap();
        }
        let names: Vec<String> = store.list_cas().unwrap().map(|ca| ca.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(store.list_cas().unwrap().count(), 3);
    }

    #[test]
    fn test_delete_missing_ca_is_noop() {
        let (store, _, _) = store();
        assert!(!store.delete_ca("never").unwrap());
        assert!(!store.delete_ca("never").unwrap());
    }

    #[test]
    fn test_delete_ca_cascades_certificates() {
        let (store, repo, toolkit) = store();
        let ca = store.create_root_ca(&CaRequest::new("myca")).unwrap().authority;
        let certs = CertificateStore::new(store.layout().clone(), repo.clone(), toolkit);
        for name in ["x", "y"] {
            certs
                .sign_certificate(&ca, &SigningRequest::new(name, "myca", CertType::Server))
                .unwrap();
        }
        assert_eq!(store.certificates_of("myca").unwrap().len(), 2);

        assert!(store.delete_ca("myca").unwrap());
        assert!(store.get_ca("myca").is_none());
        assert_eq!(certs.list_certificates(None).unwrap().count(), 0);
        assert_eq!(repo.file_count_under(Path::new("/pki")), 0);
    }

    #[test]
    fn test_purge_partial() {
        let (store, repo, _) = store();
        store.create_root_ca(&CaRequest::new("good")).unwrap();
        let half = store.layout().ca_paths("half");
        repo.create_dir_all(&store.layout().ca_dir("half")).unwrap();
        repo.write_new(&half.cert_path, b"c", FileMode::Public).unwrap();
        let tombstone = store.layout().ca_root().join(".old.deleting");
        repo.create_dir_all(&tombstone).unwrap();

        let removed = store.purge_partial().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&store.layout().ca_dir("half")));
        assert!(removed.contains(&tombstone));
        assert!(store.get_ca("good").is_some());
    }

    #[test]
    fn test_get_ca_info_of_missing_file() {
        let (store, _, _) = store();
        let err = store
            .get_ca_info(Path::new("/pki/ca/none/none.cert.pem"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
