//! Hardened extractor for untrusted tar.gz archives
//!
//! Archives fetched over the network are treated as hostile: entries may not
//! escape the destination directory, overwrite existing files, traverse
//! symlinks or exceed the configured size and count limits. Hard links and
//! symlinks inside the archive are refused outright.
//!
//! # Usage
//!
//! ## Extracting an archive
//!
//! ```no_run
//! use safe_tgz::{error_to_string, extract};
//! use std::path::Path;
//!
//! match extract(Path::new("speedtest.tgz"), Path::new("speedtest-cli")) {
//!     Ok(()) => println!("done"),
//!     Err(e) => eprintln!("Error: {}", error_to_string(e)),
//! }
//! ```
//!
//! ## Custom limits and cancellation
//!
//! ```no_run
//! use safe_tgz::{interrupt, Extractor, Limits};
//! use std::path::Path;
//!
//! let limits = Limits {
//!     max_file_size: 16 * 1024 * 1024,
//!     ..Limits::default()
//! };
//! let summary = Extractor::new(limits)
//!     .with_cancel_flag(interrupt::install_handlers())
//!     .extract(Path::new("speedtest.tgz"), Path::new("speedtest-cli"))
//!     .unwrap();
//! println!("{} files written", summary.files_written);
//! ```
//!
//! ## Listing and packing
//!
//! ```no_run
//! use safe_tgz::{list, pack, Limits};
//! use std::path::{Path, PathBuf};
//!
//! pack(Path::new("archive.tgz"), &[PathBuf::from("Cargo.toml")]).unwrap();
//! for header in list(Path::new("archive.tgz"), &Limits::default()).unwrap() {
//!     println!("{} ({} bytes)", header.full_path(), header.size);
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod interrupt;
pub mod sanitize;
pub mod secure_fs;
pub mod source;
pub mod tar;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

pub use config::Limits;
pub use error::{error_to_string, ExtractError};
pub use extract::{extract, ExtractSummary, Extractor};
pub use tar::{write_tar, EntryKind, TarEntry, TarHeader};

use source::ArchiveSource;
use tar::{is_empty_block, padding_for, BLOCK_SIZE};

/// Lists the headers of an archive without writing anything.
///
/// Every header is checksum-verified and the entry-count limit applies.
pub fn list(archive: &Path, limits: &Limits) -> error::Result<Vec<TarHeader>> {
    let mut source = ArchiveSource::open(archive)?;
    let mut headers = Vec::new();
    let mut block = [0u8; BLOCK_SIZE];
    while source.read_block(&mut block)? && !is_empty_block(&block) {
        if headers.len() as u64 >= limits.max_files {
            return Err(ExtractError::ArchiveTooLarge);
        }
        let header = TarHeader::from_bytes(&block, limits.max_component_len)?;
        let padded = header
            .size
            .checked_add(padding_for(header.size))
            .ok_or(ExtractError::FileTooLarge)?;
        source.skip(padded)?;
        headers.push(header);
    }
    Ok(headers)
}

/// Packs files into an archive, gzip-compressed when `tarfile` ends in
/// `.tgz` or `.tar.gz`. Entries are stored under their base names.
/// Returns the number of entries written.
pub fn pack(tarfile: &Path, files: &[PathBuf]) -> io::Result<usize> {
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let meta = fs::symlink_metadata(path)?;
        if !meta.is_file() {
            log::warn!("skipping {}: not a regular file", path.display());
            continue;
        }
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

        let mut header = TarHeader::new(name, file_mode(&meta), data.len() as u64);
        header.mtime = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp().max(0) as u64)
            .unwrap_or(0);
        entries.push(TarEntry::new(header, data));
    }

    let tar_data = write_tar(&entries);
    let name = tarfile.to_string_lossy();
    if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_data)?;
        fs::write(tarfile, encoder.finish()?)?;
    } else {
        fs::write(tarfile, &tar_data)?;
    }
    log::info!("created {} with {} entries", tarfile.display(), entries.len());
    Ok(entries.len())
}

fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}
