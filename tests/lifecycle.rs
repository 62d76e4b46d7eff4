use std::path::Path;
use std::sync::Arc;

use certica::authority_store::{AuthorityStore, CaRequest};
use certica::certificate_store::CertificateStore;
use certica::layout::Layout;
use certica::repository::FsRepository;
use certica::signing::{CertType, SigningRequest};
use certica::toolkit::{
    CertDetails, CertParams, CryptoToolkit, KeyMaterial, OpensslToolkit, SanEntry,
};
use certica::{CerticaError, ErrorKind};

struct Pki {
    _dir: tempfile::TempDir,
    layout: Layout,
    authorities: AuthorityStore,
    certificates: CertificateStore,
}

fn pki_with(toolkit: Arc<dyn CryptoToolkit>) -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::new(dir.path().join("output"));
    let repository = Arc::new(FsRepository::new());
    Pki {
        authorities: AuthorityStore::new(layout.clone(), repository.clone(), toolkit.clone()),
        certificates: CertificateStore::new(layout.clone(), repository, toolkit),
        layout,
        _dir: dir,
    }
}

fn pki() -> Pki {
    pki_with(Arc::new(OpensslToolkit::new()))
}

/// Real key generation, failing certificate issuance
struct SigningFails(OpensslToolkit);

impl CryptoToolkit for SigningFails {
    fn generate_key(&self, bits: u32) -> certica::Result<KeyMaterial> {
        self.0.generate_key(bits)
    }

    fn build_and_sign_cert(&self, _params: &CertParams<'_>) -> certica::Result<Vec<u8>> {
        Err(CerticaError::tool("openssl", Some(1), "forced failure"))
    }

    fn dump_cert_text(&self, cert_pem: &[u8]) -> certica::Result<String> {
        self.0.dump_cert_text(cert_pem)
    }

    fn inspect(&self, cert_pem: &[u8]) -> certica::Result<CertDetails> {
        self.0.inspect(cert_pem)
    }

    fn fingerprints(&self, pem: &[u8]) -> certica::Result<Vec<String>> {
        self.0.fingerprints(pem)
    }
}

fn files_under(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                files_under(&entry.path())
            } else {
                1
            }
        })
        .sum()
}

#[test]
fn test_duplicate_ca_leaves_files_byte_identical() {
    let pki = pki();
    let created = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev").organization("Acme"))
        .unwrap();
    let key = std::fs::read(&created.authority.key_path).unwrap();
    let cert = std::fs::read(&created.authority.cert_path).unwrap();

    let err = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(std::fs::read(&created.authority.key_path).unwrap(), key);
    assert_eq!(std::fs::read(&created.authority.cert_path).unwrap(), cert);

    let details = pki
        .authorities
        .describe_certificate(&created.authority.cert_path)
        .unwrap();
    assert!(details.is_ca);
    assert_eq!(details.subject_common_name.as_deref(), Some("Acme Root CA"));
}

#[test]
fn test_delete_ca_cascades() {
    let pki = pki();
    let ca = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap()
        .authority;
    for name in ["x", "y"] {
        pki.certificates
            .sign_certificate(&ca, &SigningRequest::new(name, "dev", CertType::Server))
            .unwrap();
    }
    assert_eq!(pki.certificates.list_certificates(None).unwrap().count(), 2);

    assert!(pki.authorities.delete_ca("dev").unwrap());
    assert!(pki.authorities.get_ca("dev").is_none());
    assert_eq!(pki.certificates.list_certificates(None).unwrap().count(), 0);
    assert_eq!(files_under(pki.layout.base_dir()), 0);
}

#[test]
fn test_forced_signing_failure_leaves_no_files() {
    let pki = pki_with(Arc::new(SigningFails(OpensslToolkit::new())));
    let err = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    assert_eq!(files_under(&pki.layout.ca_dir("dev")), 0);
    assert_eq!(pki.authorities.list_cas().unwrap().count(), 0);
}

#[test]
fn test_san_round_trip() {
    let pki = pki();
    let ca = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap()
        .authority;
    let request = SigningRequest::new("web", "dev", CertType::Server)
        .dns_name("a.example")
        .dns_name("b.example")
        .ip_address("127.0.0.1");
    let cert = pki.certificates.sign_certificate(&ca, &request).unwrap();

    let text = pki.certificates.get_certificate_info(&cert.cert_path).unwrap();
    assert!(
        text.contains("DNS:a.example, DNS:b.example, IP Address:127.0.0.1"),
        "{text}"
    );

    let details = pki.certificates.describe_certificate(&cert.cert_path).unwrap();
    assert_eq!(
        details.sans,
        vec![
            SanEntry::Dns("a.example".to_string()),
            SanEntry::Dns("b.example".to_string()),
            SanEntry::Ip("127.0.0.1".parse().unwrap()),
        ]
    );
    assert_eq!(details.subject_common_name.as_deref(), Some("a.example"));
    assert_eq!(details.cert_type, Some(CertType::Server));
    assert!(!details.is_ca);
}

#[test]
fn test_common_name_fallback() {
    let pki = pki();
    let ca = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap()
        .authority;

    let by_ip = pki
        .certificates
        .sign_certificate(
            &ca,
            &SigningRequest::new("svc", "dev", CertType::Client).ip_address("10.0.0.5"),
        )
        .unwrap();
    let details = pki.certificates.describe_certificate(&by_ip.cert_path).unwrap();
    assert_eq!(details.subject_common_name.as_deref(), Some("10.0.0.5"));
    assert_eq!(details.cert_type, Some(CertType::Client));

    let by_name = pki
        .certificates
        .sign_certificate(&ca, &SigningRequest::new("bare", "dev", CertType::Server))
        .unwrap();
    let details = pki.certificates.describe_certificate(&by_name.cert_path).unwrap();
    assert_eq!(details.subject_common_name.as_deref(), Some("bare"));
    assert!(details.sans.is_empty());
}

#[test]
fn test_invalid_ip_is_rejected_before_any_write() {
    let pki = pki();
    let ca = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap()
        .authority;
    let err = pki
        .certificates
        .sign_certificate(
            &ca,
            &SigningRequest::new("web", "dev", CertType::Server).ip_address("localhost"),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!pki.layout.cert_dir("dev", "web").exists());
}

#[test]
fn test_delete_unknown_ca_is_noop() {
    let pki = pki();
    assert!(!pki.authorities.delete_ca("never").unwrap());
    assert!(!pki.authorities.delete_ca("never").unwrap());
}

#[cfg(unix)]
#[test]
fn test_key_and_cert_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let pki = pki();
    let ca = pki
        .authorities
        .create_root_ca(&CaRequest::new("dev"))
        .unwrap()
        .authority;
    let cert = pki
        .certificates
        .sign_certificate(&ca, &SigningRequest::new("web", "dev", CertType::Server))
        .unwrap();

    let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&ca.key_path), 0o600);
    assert_eq!(mode(&ca.cert_path), 0o644);
    assert_eq!(mode(&cert.key_path), 0o600);
    assert_eq!(mode(&cert.cert_path), 0o644);
}
