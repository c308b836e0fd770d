//! Extraction loop: header, validation, limits, dispatch.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Limits;
use crate::error::{ExtractError, Result};
use crate::sanitize::{lexical_normalize, sanitize_path};
use crate::secure_fs::{create_secure_directory, prepare_destination, SecureFile};
use crate::source::ArchiveSource;
use crate::tar::{is_empty_block, padding_for, EntryKind, TarHeader, BLOCK_SIZE};

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Counters for one extraction call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionState {
    pub files_seen: u64,
    pub bytes_extracted: u64,
}

/// What an extraction call did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files_written: u64,
    pub directories_created: u64,
    pub entries_skipped: u64,
    pub bytes_extracted: u64,
}

/// Extracts archives under a fixed set of limits.
///
/// ```no_run
/// use safe_tgz::{Extractor, Limits};
/// use std::path::Path;
///
/// let summary = Extractor::new(Limits::default())
///     .extract(Path::new("speedtest.tgz"), Path::new("speedtest-cli"))
///     .unwrap();
/// println!("{} files", summary.files_written);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Extractor<'a> {
    limits: Limits,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Extractor<'a> {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            cancel: None,
        }
    }

    /// Polls `flag` before every header and payload chunk; once it is set
    /// the call fails with [`ExtractError::Interrupted`].
    pub fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Extracts the archive at `archive` into `dest`.
    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractSummary> {
        log::info!("extracting {} into {}", archive.display(), dest.display());
        let mut source = ArchiveSource::open(archive)?;
        self.run(&mut source, dest)
    }

    /// Extracts an already decompressed tar stream.
    pub fn extract_from_reader<R: Read>(&self, reader: R, dest: &Path) -> Result<ExtractSummary> {
        let mut source = ArchiveSource::new(reader);
        self.run(&mut source, dest)
    }

    fn run<R: Read>(&self, source: &mut ArchiveSource<R>, dest: &Path) -> Result<ExtractSummary> {
        let root = destination_root(dest)?;
        prepare_destination(&root)?;

        let mut state = ExtractionState::default();
        let mut summary = ExtractSummary::default();
        let mut block = [0u8; BLOCK_SIZE];

        loop {
            self.check_cancelled()?;
            if !source.read_block(&mut block)? || is_empty_block(&block) {
                break;
            }

            let header = TarHeader::from_bytes(&block, self.limits.max_component_len)?;
            let full_path = header.full_path();
            self.enforce_limits(&mut state, header.size)?;
            let target = sanitize_path(&root, &full_path, &self.limits)?;

            match header.kind() {
                EntryKind::Directory => {
                    create_secure_directory(&root, &target)?;
                    self.skip_payload(source, header.size)?;
                    summary.directories_created += 1;
                }
                EntryKind::Regular => {
                    self.write_file(source, &root, &target, header.size)?;
                    summary.files_written += 1;
                    log::debug!("extracted {} ({} bytes)", full_path, header.size);
                }
                EntryKind::HardLink | EntryKind::Symlink => {
                    log::warn!(
                        "refusing link entry {} -> {}",
                        full_path,
                        header.linkname
                    );
                    return Err(ExtractError::SymlinkDetected);
                }
                EntryKind::Other(flag) => {
                    log::debug!(
                        "skipping entry {} with type {:?}",
                        full_path,
                        char::from(flag)
                    );
                    self.skip_payload(source, header.size)?;
                    summary.entries_skipped += 1;
                }
            }
            state.bytes_extracted += header.size;
        }

        summary.bytes_extracted = state.bytes_extracted;
        log::info!(
            "extracted {} files and {} directories ({} bytes)",
            summary.files_written,
            summary.directories_created,
            summary.bytes_extracted
        );
        Ok(summary)
    }

    /// File count, then per-file size, then the remaining archive budget.
    fn enforce_limits(&self, state: &mut ExtractionState, size: u64) -> Result<()> {
        state.files_seen += 1;
        if state.files_seen > self.limits.max_files {
            log::warn!("archive has more than {} entries", self.limits.max_files);
            return Err(ExtractError::ArchiveTooLarge);
        }
        if size > self.limits.max_file_size {
            log::warn!("entry of {} bytes exceeds per-file limit", size);
            return Err(ExtractError::FileTooLarge);
        }
        let remaining = self.limits.max_total_size.saturating_sub(state.bytes_extracted);
        if size > remaining {
            log::warn!("entry of {} bytes exceeds remaining budget of {}", size, remaining);
            return Err(ExtractError::ArchiveTooLarge);
        }
        Ok(())
    }

    fn write_file<R: Read>(
        &self,
        source: &mut ArchiveSource<R>,
        root: &Path,
        target: &Path,
        size: u64,
    ) -> Result<()> {
        if let Some(parent) = target.parent() {
            create_secure_directory(root, parent)?;
        }
        let mut file = SecureFile::create(target)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            self.check_cancelled()?;
            let len = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            source.read_chunk(&mut buffer[..len])?;
            file.write(&buffer[..len])?;
            remaining -= len as u64;
        }
        source.skip(padding_for(size))?;
        file.commit();
        Ok(())
    }

    fn skip_payload<R: Read>(&self, source: &mut ArchiveSource<R>, size: u64) -> Result<()> {
        let padded = size
            .checked_add(padding_for(size))
            .ok_or(ExtractError::FileTooLarge)?;
        source.skip(padded)
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ExtractError::Interrupted),
            _ => Ok(()),
        }
    }
}

/// Absolute, lexically normalized form of the destination directory.
fn destination_root(dest: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(dest).map_err(|_| ExtractError::CreateDirFailed)?;
    Ok(lexical_normalize(&absolute))
}

/// Extracts `archive` into `dest` using the default limits.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    Extractor::new(Limits::default())
        .extract(archive, dest)
        .map(|_| ())
}
