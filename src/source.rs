//! Sequential reader over a (possibly gzip-compressed) tar stream.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{ExtractError, Result};
use crate::tar::BLOCK_SIZE;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Owns the decompression stream for one extraction. Dropping it closes the
/// underlying file.
pub struct ArchiveSource<R> {
    reader: R,
}

impl ArchiveSource<Box<dyn Read>> {
    /// Opens an archive file. Input starting with the gzip magic is
    /// decompressed; anything else is read as a plain tar stream.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            log::warn!("cannot open {}: {}", path.display(), e);
            ExtractError::OpenFileFailed
        })?;
        Self::detect(BufReader::new(file))
    }

    /// Wraps an in-memory or otherwise opened stream, detecting gzip the
    /// same way as [`ArchiveSource::open`].
    pub fn detect<B: BufRead + 'static>(mut reader: B) -> Result<Self> {
        let is_gzip = loop {
            match reader.fill_buf() {
                Ok(head) => break head.starts_with(&GZIP_MAGIC),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(ExtractError::ReadFailed),
            }
        };
        let reader: Box<dyn Read> = if is_gzip {
            Box::new(MultiGzDecoder::new(reader))
        } else {
            log::debug!("input is not gzip-compressed, reading as plain tar");
            Box::new(reader)
        };
        Ok(Self { reader })
    }
}

impl<R: Read> ArchiveSource<R> {
    /// Uses `reader` as an already-decompressed tar stream.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the next header record.
    ///
    /// Returns `Ok(false)` when the stream ends exactly on a record boundary.
    /// A partial record is an invalid header.
    pub fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("read error in header record: {}", e);
                    return Err(ExtractError::ReadFailed);
                }
            }
        }
        match filled {
            0 => Ok(false),
            BLOCK_SIZE => Ok(true),
            _ => Err(ExtractError::InvalidHeader),
        }
    }

    /// Fills `buf` completely; a short stream is a read failure.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            log::debug!("read error in payload: {}", e);
            ExtractError::ReadFailed
        })
    }

    /// Discards exactly `len` bytes.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())
            .map_err(|_| ExtractError::ReadFailed)?;
        if copied < len {
            log::debug!("stream ended {} bytes into a {} byte skip", copied, len);
            return Err(ExtractError::ReadFailed);
        }
        Ok(())
    }
}
