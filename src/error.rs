//! Error kinds reported by the extractor.
//!
//! Every kind is terminal for the extraction call that produced it.

use thiserror::Error;

/// Why an extraction was aborted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractError {
    #[error("Failed to open TGZ file")]
    OpenFileFailed,

    #[error("Failed to read compressed data")]
    ReadFailed,

    #[error("Invalid TAR header format")]
    InvalidHeader,

    #[error("TAR header checksum validation failed")]
    InvalidChecksum,

    #[error("Failed to create directory")]
    CreateDirFailed,

    #[error("Failed to write output file")]
    WriteFileFailed,

    #[error("Dangerous path detected (directory traversal attempt)")]
    PathTraversalDetected,

    #[error("File size exceeds maximum allowed size")]
    FileTooLarge,

    #[error("Archive exceeds maximum allowed size or file count")]
    ArchiveTooLarge,

    #[error("Symlink or hard link detected (potential security risk)")]
    SymlinkDetected,

    #[error("No space left on device")]
    DiskFull,

    #[error("Operation interrupted by user")]
    Interrupted,
}

/// Human-readable description of an error, for diagnostics.
pub fn error_to_string(err: ExtractError) -> String {
    err.to_string()
}

pub type Result<T> = std::result::Result<T, ExtractError>;
