//! Artifact repository: the filesystem treated as the only database.
//!
//! Stores never touch `std::fs` directly; they go through
//! [`ArtifactRepository`] so the backend can be swapped for
//! [`MemoryRepository`] in tests.
//!
//! # Write ordering
//!
//! [`ArtifactRepository::write_new`] writes into a temporary file next to the
//! destination, applies the permission bits, then renames it into place
//! without clobbering. A reader therefore observes either no file or a
//! complete one, and two writers racing for the same path cannot both win.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{CerticaError, Result};
use crate::layout::Layout;

/// Permission class applied when an artifact is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Owner read/write only (`0600`), for private keys
    Private,
    /// World-readable (`0644`), for certificates and templates
    Public,
}

impl FileMode {
    pub fn bits(self) -> u32 {
        match self {
            FileMode::Private => 0o600,
            FileMode::Public => 0o644,
        }
    }
}

/// Storage backend for key, certificate and template files
pub trait ArtifactRepository: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create `path` atomically; fails with `AlreadyExists` if it is present
    fn write_new(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()>;

    /// Atomically create or overwrite `path`
    fn write_replace(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()>;

    /// Returns whether the file existed
    fn remove_file(&self, path: &Path) -> Result<bool>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Create `path` (and missing parents); fails with `AlreadyExists` if
    /// `path` itself is present. Claims an entity directory for one writer.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Returns whether the directory existed, was empty and got removed
    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool>;

    /// Returns whether the directory existed
    fn remove_dir_all(&self, path: &Path) -> Result<bool>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Names of the subdirectories of `path`, sorted; empty if `path` is missing
    fn list_dirs(&self, path: &Path) -> Result<Vec<String>>;

    /// Names of the regular files in `path`, sorted; empty if `path` is missing
    fn list_files(&self, path: &Path) -> Result<Vec<String>>;
}

/// Remove a directory tree so that it disappears from listings in one step
///
/// The directory is first renamed to its dot-prefixed tombstone, then removed
/// recursively. A tombstone left by an earlier interrupted call is cleared
/// first. Returns whether `dir` existed.
pub fn bury_dir(repository: &dyn ArtifactRepository, dir: &Path) -> Result<bool> {
    if !repository.is_dir(dir) {
        return Ok(false);
    }
    let tombstone = Layout::tombstone_for(dir).ok_or_else(|| {
        CerticaError::invalid_input(format!("{} has no directory name", dir.display()))
    })?;
    repository.remove_dir_all(&tombstone)?;
    repository.rename(dir, &tombstone)?;
    repository.remove_dir_all(&tombstone)?;
    Ok(true)
}

// ================= Filesystem backend =================

/// Repository backed by the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRepository;

impl FsRepository {
    pub fn new() -> Self {
        FsRepository
    }

    fn write_temp(path: &Path, contents: &[u8], mode: FileMode) -> Result<tempfile::NamedTempFile> {
        let parent = path.parent().ok_or_else(|| {
            CerticaError::invalid_input(format!("{} has no parent directory", path.display()))
        })?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode.bits()))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(tmp)
    }

    fn list_entries(path: &Path, want_dirs: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let matches = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if !matches {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ArtifactRepository for FsRepository {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CerticaError::not_found(format!("{} does not exist", path.display()))
            }
            _ => e.into(),
        })
    }

    fn write_new(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
        let tmp = Self::write_temp(path, contents, mode)?;
        tmp.persist_noclobber(path).map_err(|e| match e.error.kind() {
            std::io::ErrorKind::AlreadyExists => {
                CerticaError::already_exists(format!("{} already exists", path.display()))
            }
            _ => CerticaError::Io(e.error),
        })?;
        Ok(())
    }

    fn write_replace(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
        let tmp = Self::write_temp(path, contents, mode)?;
        tmp.persist(path).map_err(|e| CerticaError::Io(e.error))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                CerticaError::already_exists(format!("{} already exists", path.display()))
            }
            _ => e.into(),
        })
    }

    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool> {
        let mut entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if entries.next().is_some() {
            return Ok(false);
        }
        fs::remove_dir(path)?;
        Ok(true)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<bool> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<String>> {
        Self::list_entries(path, true)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        Self::list_entries(path, false)
    }
}

// ================= In-memory backend =================

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    mode: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, MemoryFile>,
    failing_suffixes: Vec<String>,
}

/// Thread-safe in-memory repository for tests and dry runs
///
/// Supports write-fault injection through [`MemoryRepository::fail_writes_to`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent write to a path ending in `suffix` fail
    pub fn fail_writes_to(&self, suffix: &str) {
        self.state().failing_suffixes.push(suffix.to_string());
    }

    /// Permission bits recorded for `path`
    pub fn mode_of(&self, path: &Path) -> Option<u32> {
        self.state().files.get(path).map(|f| f.mode)
    }

    /// Number of files currently stored below `prefix`
    pub fn file_count_under(&self, prefix: &Path) -> usize {
        self.state()
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .count()
    }

    fn write(&self, path: &Path, contents: &[u8], mode: FileMode, clobber: bool) -> Result<()> {
        let mut state = self.state();
        let path_str = path.to_string_lossy();
        if state
            .failing_suffixes
            .iter()
            .any(|suffix| path_str.ends_with(suffix.as_str()))
        {
            return Err(CerticaError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected write failure for {}", path.display()),
            )));
        }
        let parent_missing = path
            .parent()
            .map(|parent| !state.dirs.contains(parent))
            .unwrap_or(true);
        if parent_missing {
            return Err(CerticaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("parent directory of {} does not exist", path.display()),
            )));
        }
        if !clobber && state.files.contains_key(path) {
            return Err(CerticaError::already_exists(format!(
                "{} already exists",
                path.display()
            )));
        }
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                contents: contents.to_vec(),
                mode: mode.bits(),
            },
        );
        Ok(())
    }

    fn children(state: &MemoryState, path: &Path, want_dirs: bool) -> Vec<String> {
        let names: BTreeSet<String> = if want_dirs {
            state
                .dirs
                .iter()
                .filter(|d| d.parent() == Some(path))
                .filter_map(|d| d.file_name()?.to_str().map(str::to_string))
                .collect()
        } else {
            state
                .files
                .keys()
                .filter(|f| f.parent() == Some(path))
                .filter_map(|f| f.file_name()?.to_str().map(str::to_string))
                .collect()
        };
        names.into_iter().collect()
    }
}

impl ArtifactRepository for MemoryRepository {
    fn exists(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().dirs.contains(path)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.state()
            .files
            .get(path)
            .map(|f| f.contents.clone())
            .ok_or_else(|| CerticaError::not_found(format!("{} does not exist", path.display())))
    }

    fn write_new(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
        self.write(path, contents, mode, false)
    }

    fn write_replace(&self, path: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
        self.write(path, contents, mode, true)
    }

    fn remove_file(&self, path: &Path) -> Result<bool> {
        Ok(self.state().files.remove(path).is_some())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        if state.dirs.contains(path) {
            return Err(CerticaError::already_exists(format!(
                "{} already exists",
                path.display()
            )));
        }
        for ancestor in path.ancestors() {
            if !ancestor.as_os_str().is_empty() {
                state.dirs.insert(ancestor.to_path_buf());
            }
        }
        Ok(())
    }

    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool> {
        let mut state = self.state();
        if !state.dirs.contains(path) {
            return Ok(false);
        }
        let occupied = state.files.keys().any(|f| f.parent() == Some(path))
            || state.dirs.iter().any(|d| d.parent() == Some(path));
        if occupied {
            return Ok(false);
        }
        state.dirs.remove(path);
        Ok(true)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<bool> {
        let mut state = self.state();
        if !state.dirs.contains(path) {
            return Ok(false);
        }
        state.files.retain(|f, _| !f.starts_with(path));
        state.dirs.retain(|d| !d.starts_with(path));
        Ok(true)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state();
        if let Some(file) = state.files.remove(from) {
            state.files.insert(to.to_path_buf(), file);
            return Ok(());
        }
        if !state.dirs.contains(from) {
            return Err(CerticaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", from.display()),
            )));
        }
        let moved_dirs: Vec<PathBuf> = state
            .dirs
            .iter()
            .filter(|d| d.starts_with(from))
            .cloned()
            .collect();
        for dir in moved_dirs {
            state.dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                state.dirs.insert(to.join(rest));
            }
        }
        let moved_files: Vec<PathBuf> = state
            .files
            .keys()
            .filter(|f| f.starts_with(from))
            .cloned()
            .collect();
        for path in moved_files {
            if let (Some(file), Ok(rest)) = (state.files.remove(&path), path.strip_prefix(from)) {
                state.files.insert(to.join(rest), file);
            }
        }
        Ok(())
    }

    fn list_dirs(&self, path: &Path) -> Result<Vec<String>> {
        Ok(Self::children(&self.state(), path, true))
    }

    fn list_files(&self, path: &Path) -> Result<Vec<String>> {
        Ok(Self::children(&self.state(), path, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fs_write_new_applies_modes_and_refuses_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new();
        let key = dir.path().join("a.key.pem");
        let cert = dir.path().join("a.cert.pem");

        repo.write_new(&key, b"key", FileMode::Private).unwrap();
        repo.write_new(&cert, b"cert", FileMode::Public).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let key_mode = fs::metadata(&key).unwrap().permissions().mode() & 0o777;
            let cert_mode = fs::metadata(&cert).unwrap().permissions().mode() & 0o777;
            assert_eq!(key_mode, 0o600);
            assert_eq!(cert_mode, 0o644);
        }

        let err = repo.write_new(&key, b"other", FileMode::Private).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(repo.read(&key).unwrap(), b"key");
        // no temporary files left behind
        assert_eq!(repo.list_files(dir.path()).unwrap(), vec!["a.cert.pem", "a.key.pem"]);
    }

    #[test]
    fn test_fs_listing_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new();
        assert!(repo.list_dirs(&dir.path().join("nope")).unwrap().is_empty());
        assert!(!repo.remove_dir_all(&dir.path().join("nope")).unwrap());
    }

    #[test]
    fn test_fs_remove_dir_if_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new();
        let sub = dir.path().join("sub");
        repo.create_dir_all(&sub).unwrap();
        repo.write_new(&sub.join("f"), b"x", FileMode::Public).unwrap();
        assert!(!repo.remove_dir_if_empty(&sub).unwrap());
        repo.remove_file(&sub.join("f")).unwrap();
        assert!(repo.remove_dir_if_empty(&sub).unwrap());
        assert!(!repo.is_dir(&sub));
    }

    #[test]
    fn test_memory_repository_tree_operations() {
        let repo = MemoryRepository::new();
        let base = PathBuf::from("/base/certs/myca");
        repo.create_dir_all(&base.join("web")).unwrap();
        repo.create_dir_all(&base.join("api")).unwrap();
        repo.write_new(&base.join("web/key.pem"), b"k", FileMode::Private)
            .unwrap();

        assert_eq!(repo.list_dirs(&base).unwrap(), vec!["api", "web"]);
        assert_eq!(repo.mode_of(&base.join("web/key.pem")), Some(0o600));

        let moved = PathBuf::from("/base/certs/.myca.deleting");
        repo.rename(&base, &moved).unwrap();
        assert!(!repo.is_dir(&base));
        assert!(repo.exists(&moved.join("web/key.pem")));

        assert!(repo.remove_dir_all(&moved).unwrap());
        assert_eq!(repo.file_count_under(Path::new("/base")), 0);
    }

    #[test]
    fn test_bury_dir_clears_stale_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new();
        let target = dir.path().join("myca");
        let stale = dir.path().join(".myca.deleting");
        repo.create_dir_all(&target).unwrap();
        repo.create_dir_all(&stale).unwrap();
        repo.write_new(&target.join("cert.pem"), b"c", FileMode::Public)
            .unwrap();

        assert!(bury_dir(&repo, &target).unwrap());
        assert!(!repo.is_dir(&target));
        assert!(!repo.is_dir(&stale));
        assert!(!bury_dir(&repo, &target).unwrap());
    }

    #[test]
    fn test_create_dir_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsRepository::new();
        let entity = dir.path().join("certs/myca/web");
        repo.create_dir(&entity).unwrap();
        assert!(repo.is_dir(&entity));
        let err = repo.create_dir(&entity).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let memory = MemoryRepository::new();
        memory.create_dir(Path::new("/pki/ca/dev")).unwrap();
        assert!(memory.is_dir(Path::new("/pki/ca")));
        let err = memory.create_dir(Path::new("/pki/ca/dev")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_memory_repository_fault_injection() {
        let repo = MemoryRepository::new();
        repo.create_dir_all(Path::new("/x")).unwrap();
        repo.fail_writes_to("cert.pem");
        assert!(repo
            .write_new(Path::new("/x/cert.pem"), b"c", FileMode::Public)
            .is_err());
        assert!(repo
            .write_new(Path::new("/x/key.pem"), b"k", FileMode::Private)
            .is_ok());
    }

    #[test]
    fn test_memory_write_requires_parent() {
        let repo = MemoryRepository::new();
        let err = repo
            .write_new(Path::new("/missing/file"), b"x", FileMode::Public)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
