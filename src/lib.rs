//! Certica - Local Certificate Authority Manager
//!
//! Creates local root CAs, signs server and client certificates under them, keeps every
//! artifact in a plain directory tree, and installs CA certificates into the host trust store.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, CA:TRUE)
//!   └── Leaf certificate (signed by the Root, CA:FALSE, serverAuth | clientAuth)
//! ```
//!
//! The filesystem is the only database:
//!
//! ```text
//! {base}/ca/{ca_name}/{ca_name}.key.pem      (0600)
//! {base}/ca/{ca_name}/{ca_name}.cert.pem     (0644)
//! {base}/certs/{ca_name}/{cert_name}/key.pem (0600)
//! {base}/certs/{ca_name}/{cert_name}/cert.pem (0644)
//! {base}/templates/{template_name}.json
//! ```
//!
//! # Features
//!
//! - **Atomic artifacts**: every file is written to a temporary sibling and renamed into
//!   place without clobbering, so listings never see half-written entities
//! - **Cascading deletion**: deleting a CA removes every certificate it signed
//! - **SAN support**: any number of DNS names and IP addresses per certificate
//! - **Trust store integration**: Debian, Fedora, Arch and SUSE families, with
//!   post-install verification by SHA-256 fingerprint, plus the macOS System
//!   keychain and the Windows `Root` store
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use certica::authority_store::{AuthorityStore, CaRequest};
//! use certica::certificate_store::CertificateStore;
//! use certica::layout::Layout;
//! use certica::repository::FsRepository;
//! use certica::signing::{CertType, SigningRequest};
//! use certica::toolkit::OpensslToolkit;
//!
//! fn main() -> certica::Result<()> {
//!     let layout = Layout::new("output");
//!     let repository = Arc::new(FsRepository::new());
//!     let toolkit = Arc::new(OpensslToolkit::new());
//!
//!     let authorities = AuthorityStore::new(layout.clone(), repository.clone(), toolkit.clone());
//!     let ca = authorities
//!         .create_root_ca(&CaRequest::new("dev").organization("Acme"))?
//!         .authority;
//!
//!     let certificates = CertificateStore::new(layout, repository, toolkit);
//!     let request = SigningRequest::new("web", "dev", CertType::Server)
//!         .dns_name("web.local")
//!         .ip_address("127.0.0.1");
//!     let cert = certificates.sign_certificate(&ca, &request)?;
//!     println!("certificate written to {}", cert.cert_path.display());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`authority_store`]: create, list, inspect and delete root CAs
//! - [`certificate_store`]: sign, list, inspect and delete leaf certificates
//! - [`signing`]: signing requests and the engine that turns them into key/cert pairs
//! - [`toolkit`]: the [`toolkit::CryptoToolkit`] seam and its OpenSSL implementation
//! - [`trust_store`]: the install/remove state machine and privileged executors
//! - [`repository`]: storage backends (filesystem and in-memory)
//! - [`layout`]: path arithmetic and name validation
//! - [`templates`]: JSON defaults for requests
//! - [`configs`]: TOML application configuration
//! - [`system_check`]: preflight tool discovery
//!
//! # Security Considerations
//!
//! Private keys are held in zeroizing buffers only for the duration of the operation that
//! produced or consumed them, are written with owner-only permissions, and never appear in
//! logs or error messages. There is no locking between concurrent processes; each entity
//! directory is created exclusively, so two writers cannot both claim the same entity, and
//! a half-written entity blocks re-creation until `cleanup` removes it.

pub mod authority_store;
pub mod certificate_store;
pub mod configs;
pub mod error;
pub mod layout;
pub mod repository;
pub mod signing;
pub mod system_check;
pub mod templates;
pub mod toolkit;
pub mod trust_store;

pub use error::{CerticaError, ErrorKind, Result};
