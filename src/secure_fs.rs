//! Filesystem primitives that refuse to follow symlinks or overwrite files.

use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::config::Limits;
use crate::error::{ExtractError, Result};
use crate::sanitize::sanitize_path;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Creates the destination root (and any missing ancestors) and checks
/// that it is a directory. Ancestors of the root belong to the caller and
/// are not inspected for symlinks.
pub fn prepare_destination(root: &Path) -> Result<()> {
    fs::create_dir_all(root).map_err(|e| {
        log::warn!("cannot create destination {}: {}", root.display(), e);
        ExtractError::CreateDirFailed
    })?;
    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(ExtractError::CreateDirFailed),
    }
}

/// Ensures `dir` exists as a real directory below `root`.
///
/// Every level between `root` and `dir` is created parent-first with
/// owner-only permissions. A level that already exists must be a real
/// directory, checked without following links; anything else (a symlink
/// in particular) aborts with [`ExtractError::SymlinkDetected`].
pub fn create_secure_directory(root: &Path, dir: &Path) -> Result<()> {
    if dir == root {
        return Ok(());
    }
    if !dir.starts_with(root) {
        return Err(ExtractError::PathTraversalDetected);
    }
    if let Some(parent) = dir.parent() {
        create_secure_directory(root, parent)?;
    }

    match DirBuilder::new().mode(DIR_MODE).create(dir) {
        Ok(()) => {
            log::debug!("created directory {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match fs::symlink_metadata(dir) {
            Ok(meta) if meta.file_type().is_dir() => Ok(()),
            Ok(_) => {
                log::warn!("{} exists and is not a real directory", dir.display());
                Err(ExtractError::SymlinkDetected)
            }
            Err(_) => Err(ExtractError::CreateDirFailed),
        },
        Err(e) => {
            log::warn!("cannot create directory {}: {}", dir.display(), e);
            Err(ExtractError::CreateDirFailed)
        }
    }
}

/// Output file that only survives if [`SecureFile::commit`] is called.
///
/// Opened with exclusive create and no-follow semantics; dropping an
/// uncommitted handle deletes the file.
pub struct SecureFile {
    file: File,
    path: PathBuf,
    committed: bool,
}

impl SecureFile {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| open_error(path, &e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            committed: false,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).map_err(|e| {
            log::warn!("write to {} failed: {}", self.path.display(), e);
            if e.raw_os_error() == Some(libc::ENOSPC) {
                ExtractError::DiskFull
            } else {
                ExtractError::WriteFileFailed
            }
        })
    }

    /// Keeps the file on disk.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SecureFile {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!("removing incomplete file {}", self.path.display());
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn open_error(path: &Path, err: &io::Error) -> ExtractError {
    log::warn!("cannot create {}: {}", path.display(), err);
    match err.raw_os_error() {
        Some(libc::ELOOP) => ExtractError::SymlinkDetected,
        Some(libc::EEXIST) => match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => ExtractError::SymlinkDetected,
            _ => ExtractError::WriteFileFailed,
        },
        Some(libc::ENOSPC) => ExtractError::DiskFull,
        _ => ExtractError::WriteFileFailed,
    }
}

/// Makes an extracted program runnable by its owner.
///
/// `relative` is checked like an archive path, and the target must be a
/// regular file (not a symlink) inside `root`.
pub fn mark_executable(root: &Path, relative: &str, limits: &Limits) -> Result<PathBuf> {
    let path = sanitize_path(root, relative, limits)?;
    let meta = fs::symlink_metadata(&path).map_err(|_| ExtractError::OpenFileFailed)?;
    if meta.file_type().is_symlink() {
        return Err(ExtractError::SymlinkDetected);
    }
    if !meta.is_file() {
        return Err(ExtractError::OpenFileFailed);
    }
    let mode = meta.permissions().mode() | 0o700;
    fs::set_permissions(&path, Permissions::from_mode(mode))
        .map_err(|_| ExtractError::WriteFileFailed)?;
    log::info!("marked {} executable", path.display());
    Ok(path)
}
