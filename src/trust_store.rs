//! Trust-Store Installer
//!
//! One run per install/remove call:
//!
//! ```text
//! DetectDistro -> Stage -> UpdateTrustBundle -> Verify -> Installed | Removed
//!       \            \              \              \
//!        `-----------`--------------`--------------`--> Failed { state, error }
//! ```
//!
//! A failed bundle rebuild leaves the staged anchor in place; only the
//! rebuild needs to be repeated, through [`TrustStoreInstaller::update_trust_bundle`].
//!
//! On macOS and Windows the system store is changed by a single `security`
//! or `certutil` command, so a run there skips `Stage` and records that
//! command as `UpdateTrustBundle`.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::authority_store::CertificateAuthority;
use crate::error::{CerticaError, Result};
use crate::toolkit::CryptoToolkit;

const ANCHOR_MODE: &str = "0644";
const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Linux distribution families with a known trust-store layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Debian,
    Fedora,
    Arch,
    Suse,
}

impl Distro {
    /// Select a family from the contents of `/etc/os-release`
    ///
    /// `ID` is consulted first, then each entry of `ID_LIKE`.
    pub fn from_os_release(contents: &str) -> Option<Distro> {
        let mut id = None;
        let mut id_like = None;
        for line in contents.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => id = Some(value.to_ascii_lowercase()),
                "ID_LIKE" => id_like = Some(value.to_ascii_lowercase()),
                _ => {}
            }
        }

        id.iter()
            .map(String::as_str)
            .chain(id_like.iter().flat_map(|like| like.split_whitespace()))
            .find_map(Self::from_id)
    }

    fn from_id(id: &str) -> Option<Distro> {
        match id {
            "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" | "elementary" => {
                Some(Distro::Debian)
            }
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "ol" | "amzn" => {
                Some(Distro::Fedora)
            }
            "arch" | "manjaro" | "endeavouros" => Some(Distro::Arch),
            "suse" | "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => {
                Some(Distro::Suse)
            }
            _ => None,
        }
    }

    pub fn platform(self) -> TrustPlatform {
        TrustPlatform::Linux(self.anchor_store())
    }

    pub fn anchor_store(self) -> AnchorStore {
        match self {
            Distro::Debian => AnchorStore {
                distro: self,
                anchor_dir: "/usr/local/share/ca-certificates",
                update_command: &["update-ca-certificates"],
                bundle_path: "/etc/ssl/certs/ca-certificates.crt",
            },
            Distro::Fedora => AnchorStore {
                distro: self,
                anchor_dir: "/etc/pki/ca-trust/source/anchors",
                update_command: &["update-ca-trust", "extract"],
                bundle_path: "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
            },
            Distro::Arch => AnchorStore {
                distro: self,
                anchor_dir: "/etc/ca-certificates/trust-source/anchors",
                update_command: &["trust", "extract-compat"],
                bundle_path: "/etc/ca-certificates/extracted/tls-ca-bundle.pem",
            },
            Distro::Suse => AnchorStore {
                distro: self,
                anchor_dir: "/etc/pki/trust/anchors",
                update_command: &["update-ca-certificates"],
                bundle_path: "/var/lib/ca-certificates/ca-bundle.pem",
            },
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distro::Debian => write!(f, "debian"),
            Distro::Fedora => write!(f, "fedora"),
            Distro::Arch => write!(f, "arch"),
            Distro::Suse => write!(f, "suse"),
        }
    }
}

/// Anchor directory, rebuild command and extracted bundle of one distro family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorStore {
    pub distro: Distro,
    pub anchor_dir: &'static str,
    pub update_command: &'static [&'static str],
    pub bundle_path: &'static str,
}

/// Certificate stores managed by an operating-system tool rather than files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStore {
    /// The macOS System keychain, through `security`
    MacKeychain,
    /// The Windows LocalMachine `Root` store, through `certutil`
    WindowsRoot,
}

impl NativeStore {
    pub fn tool(self) -> &'static str {
        match self {
            NativeStore::MacKeychain => "security",
            NativeStore::WindowsRoot => "certutil",
        }
    }

    /// Where trusted roots end up
    pub fn location(self) -> &'static str {
        match self {
            NativeStore::MacKeychain => SYSTEM_KEYCHAIN,
            NativeStore::WindowsRoot => "LocalMachine\\Root",
        }
    }

    fn import_args(self, cert_path: &str) -> Vec<&str> {
        match self {
            NativeStore::MacKeychain => vec![
                "add-trusted-cert",
                "-d",
                "-r",
                "trustRoot",
                "-k",
                SYSTEM_KEYCHAIN,
                cert_path,
            ],
            NativeStore::WindowsRoot => vec!["-addstore", "-f", "Root", cert_path],
        }
    }

    fn delete_args(self, label: &str) -> Vec<&str> {
        match self {
            NativeStore::MacKeychain => vec!["delete-certificate", "-c", label, SYSTEM_KEYCHAIN],
            NativeStore::WindowsRoot => vec!["-delstore", "Root", label],
        }
    }

    fn find_args(self, label: &str) -> Vec<&str> {
        match self {
            NativeStore::MacKeychain => vec!["find-certificate", "-c", label, SYSTEM_KEYCHAIN],
            NativeStore::WindowsRoot => vec!["-verifystore", "Root", label],
        }
    }
}

impl fmt::Display for NativeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeStore::MacKeychain => write!(f, "macos"),
            NativeStore::WindowsRoot => write!(f, "windows"),
        }
    }
}

/// Trust store of the host the installer drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPlatform {
    /// Anchor file plus bundle rebuild
    Linux(AnchorStore),
    Native(NativeStore),
}

impl fmt::Display for TrustPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustPlatform::Linux(store) => write!(f, "{}", store.distro),
            TrustPlatform::Native(store) => write!(f, "{store}"),
        }
    }
}

/// Host facts the installer works against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSettings {
    pub os_release_path: PathBuf,
    /// Prefix joined onto the distro's absolute anchor and bundle paths
    pub anchor_root: PathBuf,
    /// Operating system name as reported by `std::env::consts::OS`
    pub platform: String,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            os_release_path: PathBuf::from("/etc/os-release"),
            anchor_root: PathBuf::from("/"),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

impl TrustSettings {
    fn rooted(&self, absolute: &str) -> PathBuf {
        self.anchor_root.join(absolute.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    DetectDistro,
    Stage,
    UpdateTrustBundle,
    Verify,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustState::DetectDistro => write!(f, "detect-distro"),
            TrustState::Stage => write!(f, "stage"),
            TrustState::UpdateTrustBundle => write!(f, "update-trust-bundle"),
            TrustState::Verify => write!(f, "verify"),
        }
    }
}

/// Terminal state of one installer run
#[derive(Debug)]
pub enum TrustOutcome {
    Installed,
    Removed,
    Failed {
        state: TrustState,
        error: CerticaError,
    },
}

/// What an installer run did and where it stopped
#[derive(Debug)]
pub struct TrustReport {
    pub outcome: TrustOutcome,
    /// States entered, in order
    pub visited: Vec<TrustState>,
    pub platform: Option<TrustPlatform>,
    pub distro: Option<Distro>,
    pub anchor_path: Option<PathBuf>,
}

impl TrustReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, TrustOutcome::Failed { .. })
    }

    /// Files are in the desired state but trust could not be confirmed
    pub fn is_unverified(&self) -> bool {
        matches!(
            &self.outcome,
            TrustOutcome::Failed { error: CerticaError::VerificationFailed(_), .. }
        )
    }

    pub fn error(&self) -> Option<&CerticaError> {
        match &self.outcome {
            TrustOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

// ================= Privileged execution =================

/// Performs the filesystem and process steps that need elevation
pub trait PrivilegedExecutor: Send + Sync {
    /// Copy `source` to `destination` with mode `0644`, creating parents
    fn install_file(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Returns whether the file existed
    fn remove_file(&self, path: &Path) -> Result<bool>;

    fn run(&self, program: &str, args: &[&str]) -> Result<()>;
}

/// Runs every step through `sudo`, optionally feeding a password on stdin
pub struct SudoExecutor {
    password: Option<SecretString>,
}

impl SudoExecutor {
    pub fn new(password: Option<SecretString>) -> Self {
        Self { password }
    }

    fn sudo<I, S>(&self, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new("sudo");
        if self.password.is_some() {
            command.args(["-S", "-p", ""]).stdin(Stdio::piped());
        }
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(password), Some(mut stdin)) = (&self.password, child.stdin.take()) {
            writeln!(stdin, "{}", password.expose_secret())?;
        }
        child.wait_with_output()
    }
}

impl fmt::Debug for SudoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SudoExecutor")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

impl PrivilegedExecutor for SudoExecutor {
    fn install_file(&self, source: &Path, destination: &Path) -> Result<()> {
        let output = self
            .sudo([
                OsStr::new("install"),
                OsStr::new("-D"),
                OsStr::new("-m"),
                OsStr::new(ANCHOR_MODE),
                source.as_os_str(),
                destination.as_os_str(),
            ])
            .map_err(|e| CerticaError::permission_denied(format!("failed to run sudo: {e}")))?;
        if !output.status.success() {
            return Err(CerticaError::permission_denied(format!(
                "cannot install {}: {}",
                destination.display(),
                stderr_of(&output)
            )));
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let output = self
            .sudo([OsStr::new("rm"), OsStr::new("-f"), path.as_os_str()])
            .map_err(|e| CerticaError::permission_denied(format!("failed to run sudo: {e}")))?;
        if !output.status.success() {
            return Err(CerticaError::permission_denied(format!(
                "cannot remove {}: {}",
                path.display(),
                stderr_of(&output)
            )));
        }
        Ok(true)
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = self
            .sudo(std::iter::once(program).chain(args.iter().copied()))
            .map_err(|e| CerticaError::tool(program, None, format!("failed to start: {e}")))?;
        if !output.status.success() {
            return Err(CerticaError::tool(program, output.status.code(), stderr_of(&output)));
        }
        Ok(())
    }
}

/// Performs every step as the current user
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl PrivilegedExecutor for DirectExecutor {
    fn install_file(&self, source: &Path, destination: &Path) -> Result<()> {
        let denied = |e: std::io::Error| {
            CerticaError::permission_denied(format!("cannot install {}: {e}", destination.display()))
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(denied)?;
        }
        fs::copy(source, destination).map_err(denied)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(destination, fs::Permissions::from_mode(0o644)).map_err(denied)?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CerticaError::permission_denied(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| CerticaError::tool(program, None, format!("failed to start: {e}")))?;
        if !output.status.success() {
            return Err(CerticaError::tool(program, output.status.code(), stderr_of(&output)));
        }
        Ok(())
    }
}

// ================= Installer =================

#[derive(Clone, Copy)]
enum Direction {
    Install,
    Remove,
}

/// Accumulates visited states while a run advances
struct Run {
    visited: Vec<TrustState>,
    platform: Option<TrustPlatform>,
    anchor_path: Option<PathBuf>,
}

impl Run {
    fn new() -> Self {
        Self {
            visited: Vec::new(),
            platform: None,
            anchor_path: None,
        }
    }

    fn enter(&mut self, state: TrustState) {
        debug!(state = %state, "Trust installer state");
        self.visited.push(state);
    }

    fn finish(self, outcome: TrustOutcome) -> TrustReport {
        match &outcome {
            TrustOutcome::Failed { state, error } => {
                warn!(state = %state, error = %error, "Trust store operation failed")
            }
            TrustOutcome::Installed => info!("CA installed into trust store"),
            TrustOutcome::Removed => info!("CA removed from trust store"),
        }
        let distro = match self.platform {
            Some(TrustPlatform::Linux(store)) => Some(store.distro),
            _ => None,
        };
        TrustReport {
            outcome,
            visited: self.visited,
            platform: self.platform,
            distro,
            anchor_path: self.anchor_path,
        }
    }

    fn fail(self, error: CerticaError) -> TrustReport {
        let state = self
            .visited
            .last()
            .copied()
            .unwrap_or(TrustState::DetectDistro);
        self.finish(TrustOutcome::Failed { state, error })
    }
}

/// Installs CA certificates into the host trust store and removes them again
pub struct TrustStoreInstaller {
    settings: TrustSettings,
    executor: Arc<dyn PrivilegedExecutor>,
    toolkit: Arc<dyn CryptoToolkit>,
}

impl TrustStoreInstaller {
    pub fn new(
        settings: TrustSettings,
        executor: Arc<dyn PrivilegedExecutor>,
        toolkit: Arc<dyn CryptoToolkit>,
    ) -> Self {
        Self {
            settings,
            executor,
            toolkit,
        }
    }

    /// Resolve the trust store of the host
    pub fn detect(&self) -> Result<TrustPlatform> {
        match self.settings.platform.as_str() {
            "linux" => self.detect_distro().map(Distro::platform),
            "macos" => Ok(TrustPlatform::Native(NativeStore::MacKeychain)),
            "windows" => Ok(TrustPlatform::Native(NativeStore::WindowsRoot)),
            other => Err(CerticaError::unsupported_platform(format!(
                "no trust-store support for '{other}'"
            ))),
        }
    }

    fn detect_distro(&self) -> Result<Distro> {
        let contents = fs::read_to_string(&self.settings.os_release_path).map_err(|e| {
            CerticaError::unsupported_platform(format!(
                "cannot read {}: {e}",
                self.settings.os_release_path.display()
            ))
        })?;
        Distro::from_os_release(&contents).ok_or_else(|| {
            CerticaError::unsupported_platform("unrecognized Linux distribution")
        })
    }

    /// Anchor file that holds `ca_name` in `store`
    pub fn anchor_path(&self, store: &AnchorStore, ca_name: &str) -> PathBuf {
        self.settings
            .rooted(store.anchor_dir)
            .join(format!("{ca_name}.crt"))
    }

    pub fn install(&self, ca: &CertificateAuthority) -> TrustReport {
        let mut run = Run::new();
        run.enter(TrustState::DetectDistro);
        let platform = match self.detect() {
            Ok(platform) => platform,
            Err(e) => return run.fail(e),
        };
        run.platform = Some(platform);
        match platform {
            TrustPlatform::Linux(store) => self.install_anchor(run, &store, ca),
            TrustPlatform::Native(store) => self.import_native(run, store, ca),
        }
    }

    fn install_anchor(&self, mut run: Run, store: &AnchorStore, ca: &CertificateAuthority) -> TrustReport {
        let anchor = self.anchor_path(store, &ca.name);
        run.anchor_path = Some(anchor.clone());
        info!(ca = %ca.name, distro = %store.distro, anchor = %anchor.display(), "Installing CA");

        run.enter(TrustState::Stage);
        let fingerprint = match self.fingerprint_of(&ca.cert_path) {
            Ok(fp) => fp,
            Err(e) => return run.fail(e),
        };
        if let Err(e) = self.executor.install_file(&ca.cert_path, &anchor) {
            return run.fail(e);
        }

        self.update_and_verify(run, store, &anchor, Some(&fingerprint), Direction::Install)
    }

    /// Remove `ca_name` from the trust store
    ///
    /// The fingerprint looked up in the rebuilt bundle comes from the anchor
    /// being removed, else from `ca_cert` when given; without either only the
    /// anchor's absence is verified. An absent anchor is a no-op stage.
    /// Native stores are searched by the subject CN of `ca_cert`, falling
    /// back to `ca_name`.
    pub fn remove(&self, ca_name: &str, ca_cert: Option<&Path>) -> TrustReport {
        let mut run = Run::new();
        run.enter(TrustState::DetectDistro);
        let platform = match self.detect() {
            Ok(platform) => platform,
            Err(e) => return run.fail(e),
        };
        run.platform = Some(platform);
        let store = match platform {
            TrustPlatform::Linux(store) => store,
            TrustPlatform::Native(store) => {
                return self.remove_native(run, store, ca_name, ca_cert)
            }
        };

        let anchor = self.anchor_path(&store, ca_name);
        run.anchor_path = Some(anchor.clone());
        info!(ca = %ca_name, distro = %store.distro, anchor = %anchor.display(), "Removing CA");

        run.enter(TrustState::Stage);
        let fingerprint = self
            .fingerprint_of(&anchor)
            .ok()
            .or_else(|| ca_cert.and_then(|path| self.fingerprint_of(path).ok()));
        match self.executor.remove_file(&anchor) {
            Ok(true) => {}
            Ok(false) => debug!(anchor = %anchor.display(), "Anchor already absent"),
            Err(e) => return run.fail(e),
        }

        self.update_and_verify(run, &store, &anchor, fingerprint.as_deref(), Direction::Remove)
    }

    /// Re-run the bundle rebuild and verification for an anchor that is
    /// already staged; native stores repeat the import
    pub fn update_trust_bundle(&self, ca: &CertificateAuthority) -> TrustReport {
        let mut run = Run::new();
        run.enter(TrustState::DetectDistro);
        let platform = match self.detect() {
            Ok(platform) => platform,
            Err(e) => return run.fail(e),
        };
        run.platform = Some(platform);
        let store = match platform {
            TrustPlatform::Linux(store) => store,
            TrustPlatform::Native(store) => return self.import_native(run, store, ca),
        };
        let anchor = self.anchor_path(&store, &ca.name);
        run.anchor_path = Some(anchor.clone());

        let fingerprint = self.fingerprint_of(&ca.cert_path).ok();
        self.update_and_verify(run, &store, &anchor, fingerprint.as_deref(), Direction::Install)
    }

    fn update_and_verify(
        &self,
        mut run: Run,
        store: &AnchorStore,
        anchor: &Path,
        fingerprint: Option<&str>,
        direction: Direction,
    ) -> TrustReport {
        run.enter(TrustState::UpdateTrustBundle);
        if let Err(e) = self.rebuild(store) {
            return run.fail(e);
        }

        run.enter(TrustState::Verify);
        let bundle = self.settings.rooted(store.bundle_path);
        let verified = match direction {
            Direction::Install => self.verify_installed(anchor, &bundle, fingerprint),
            Direction::Remove => self.verify_removed(anchor, &bundle, fingerprint),
        };
        match (verified, direction) {
            (Err(e), _) => run.fail(e),
            (Ok(()), Direction::Install) => run.finish(TrustOutcome::Installed),
            (Ok(()), Direction::Remove) => run.finish(TrustOutcome::Removed),
        }
    }

    fn import_native(&self, mut run: Run, store: NativeStore, ca: &CertificateAuthority) -> TrustReport {
        info!(ca = %ca.name, store = store.location(), "Importing CA into system store");
        run.enter(TrustState::UpdateTrustBundle);
        let label = match self.label_of(&ca.cert_path) {
            Ok(label) => label,
            Err(e) => return run.fail(e),
        };
        let cert_path = ca.cert_path.to_string_lossy();
        if let Err(e) = self.executor.run(store.tool(), &store.import_args(&cert_path)) {
            return run.fail(e);
        }

        run.enter(TrustState::Verify);
        match self.native_contains(store, &label) {
            Ok(true) => run.finish(TrustOutcome::Installed),
            Ok(false) => run.fail(CerticaError::verification_failed(format!(
                "'{label}' not found in {} after import",
                store.location()
            ))),
            Err(e) => run.fail(CerticaError::verification_failed(format!(
                "cannot query {}: {e}",
                store.location()
            ))),
        }
    }

    fn remove_native(
        &self,
        mut run: Run,
        store: NativeStore,
        ca_name: &str,
        ca_cert: Option<&Path>,
    ) -> TrustReport {
        let label = ca_cert
            .and_then(|path| self.label_of(path).ok())
            .unwrap_or_else(|| ca_name.to_string());
        info!(ca = %ca_name, label = %label, store = store.location(), "Removing CA from system store");

        run.enter(TrustState::UpdateTrustBundle);
        match self.native_contains(store, &label) {
            Ok(true) => {
                if let Err(e) = self.executor.run(store.tool(), &store.delete_args(&label)) {
                    return run.fail(e);
                }
            }
            Ok(false) => debug!(label = %label, "Certificate already absent from system store"),
            Err(e) => return run.fail(e),
        }

        run.enter(TrustState::Verify);
        match self.native_contains(store, &label) {
            Ok(false) => run.finish(TrustOutcome::Removed),
            Ok(true) => run.fail(CerticaError::verification_failed(format!(
                "{} still contains '{label}'",
                store.location()
            ))),
            Err(e) => run.fail(CerticaError::verification_failed(format!(
                "cannot query {}: {e}",
                store.location()
            ))),
        }
    }

    /// A lookup that exits non-zero means the certificate is absent
    fn native_contains(&self, store: NativeStore, label: &str) -> Result<bool> {
        match self.executor.run(store.tool(), &store.find_args(label)) {
            Ok(()) => Ok(true),
            Err(CerticaError::ExternalToolFailure { status: Some(_), .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Subject CN the native tools match certificates by
    fn label_of(&self, cert_path: &Path) -> Result<String> {
        let pem = fs::read(cert_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CerticaError::not_found(format!("{} does not exist", cert_path.display()))
            }
            _ => e.into(),
        })?;
        self.toolkit
            .inspect(&pem)?
            .subject_common_name
            .ok_or_else(|| {
                CerticaError::invalid_input(format!("{} has no subject CN", cert_path.display()))
            })
    }

    fn rebuild(&self, store: &AnchorStore) -> Result<()> {
        let (program, args) = store
            .update_command
            .split_first()
            .ok_or_else(|| CerticaError::unsupported_platform("no trust update command"))?;
        info!(command = %store.update_command.join(" "), "Rebuilding trust bundle");
        self.executor.run(program, args)
    }

    /// Anchor must match `expected` when known; the bundle, when present,
    /// must contain the anchor's certificate
    fn verify_installed(&self, anchor: &Path, bundle: &Path, expected: Option<&str>) -> Result<()> {
        let anchored = self.fingerprint_of(anchor).map_err(|e| {
            CerticaError::verification_failed(format!("anchor {} unreadable: {e}", anchor.display()))
        })?;
        if expected.is_some_and(|fp| fp != anchored) {
            return Err(CerticaError::verification_failed(format!(
                "anchor {} does not match the CA certificate",
                anchor.display()
            )));
        }
        if bundle.exists() && !self.bundle_contains(bundle, &anchored)? {
            return Err(CerticaError::verification_failed(format!(
                "{} does not contain the CA after rebuild",
                bundle.display()
            )));
        }
        Ok(())
    }

    fn verify_removed(&self, anchor: &Path, bundle: &Path, removed: Option<&str>) -> Result<()> {
        if anchor.exists() {
            return Err(CerticaError::verification_failed(format!(
                "{} is still present",
                anchor.display()
            )));
        }
        if let Some(fingerprint) = removed {
            if bundle.exists() && self.bundle_contains(bundle, fingerprint)? {
                return Err(CerticaError::verification_failed(format!(
                    "{} still contains the CA after rebuild",
                    bundle.display()
                )));
            }
        }
        Ok(())
    }

    fn bundle_contains(&self, bundle: &Path, fingerprint: &str) -> Result<bool> {
        let pem = fs::read(bundle).map_err(|e| {
            CerticaError::verification_failed(format!("cannot read {}: {e}", bundle.display()))
        })?;
        let fingerprints = self.toolkit.fingerprints(&pem).map_err(|e| {
            CerticaError::verification_failed(format!("cannot parse {}: {e}", bundle.display()))
        })?;
        Ok(fingerprints.iter().any(|fp| fp == fingerprint))
    }

    fn fingerprint_of(&self, cert_path: &Path) -> Result<String> {
        let pem = fs::read(cert_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CerticaError::not_found(format!("{} does not exist", cert_path.display()))
            }
            _ => e.into(),
        })?;
        self.toolkit.fingerprint(&pem)
    }
}
