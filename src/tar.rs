//! ustar header codec
//!
//! # Usage
//!
//! ## Decoding a header
//!
//! ```rust
//! use safe_tgz::tar::{TarHeader, BLOCK_SIZE};
//!
//! let block = TarHeader::new("hello.txt".to_string(), 0o644, 5).to_bytes();
//! let header = TarHeader::from_bytes(&block, 255).unwrap();
//! assert_eq!(header.full_path(), "hello.txt");
//! assert_eq!(header.size, 5);
//! assert_eq!(block.len(), BLOCK_SIZE);
//! ```
//!
//! ## Building an archive
//!
//! ```rust
//! use safe_tgz::tar::{write_tar, TarEntry, TarHeader};
//!
//! let entries = vec![
//!     TarEntry::new(TarHeader::directory("data".to_string()), Vec::new()),
//!     TarEntry::new(TarHeader::new("data/hello.txt".to_string(), 0o644, 5), b"hello".to_vec()),
//! ];
//! let tar_data = write_tar(&entries);
//! assert_eq!(tar_data.len() % 512, 0);
//! ```

use std::ops::Range;

use crate::error::{ExtractError, Result};

pub const BLOCK_SIZE: usize = 512;

const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const CHECKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const LINKNAME: Range<usize> = 157..257;
const MAGIC: Range<usize> = 257..263;
const VERSION: Range<usize> = 263..265;
const PREFIX: Range<usize> = 345..500;

const _: () = assert!(PREFIX.end <= BLOCK_SIZE);

/// What a header record describes, decided by its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    HardLink,
    Symlink,
    /// Devices, fifos, GNU/PAX metadata records and anything unknown.
    Other(u8),
}

impl EntryKind {
    pub fn from_typeflag(flag: u8) -> Self {
        match flag {
            b'5' => Self::Directory,
            b'0' | 0 => Self::Regular,
            b'1' => Self::HardLink,
            b'2' => Self::Symlink,
            other => Self::Other(other),
        }
    }
}

/// Decoded ustar header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub checksum: u64,
    pub typeflag: u8,
    pub linkname: String,
    pub prefix: String,
}

impl TarHeader {
    /// Create a regular-file header with the remaining fields zeroed
    pub fn new(name: String, mode: u32, size: u64) -> Self {
        Self {
            name,
            mode,
            size,
            mtime: 0,
            checksum: 0,
            typeflag: b'0',
            linkname: String::new(),
            prefix: String::new(),
        }
    }

    /// Create a directory header
    pub fn directory(name: String) -> Self {
        let mut header = Self::new(name, 0o755, 0);
        header.typeflag = b'5';
        header
    }

    pub fn kind(&self) -> EntryKind {
        EntryKind::from_typeflag(self.typeflag)
    }

    /// Logical path of the entry: `prefix/name`, or just `name`.
    pub fn full_path(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.prefix, self.name)
        }
    }

    /// Decode and validate a header record.
    ///
    /// The checksum is verified before any other field is looked at. Name
    /// and prefix must be printable ASCII no longer than `max_component_len`.
    /// The link target is informational and decoded leniently.
    pub fn from_bytes(block: &[u8; BLOCK_SIZE], max_component_len: usize) -> Result<Self> {
        if !verify_checksum(block) {
            return Err(ExtractError::InvalidChecksum);
        }
        let text = |range: Range<usize>| {
            read_safe_str(&block[range], max_component_len).ok_or(ExtractError::InvalidHeader)
        };
        Ok(Self {
            name: text(NAME)?,
            prefix: text(PREFIX)?,
            linkname: read_lossy_str(&block[LINKNAME]),
            mode: u32::try_from(parse_octal(&block[MODE])).unwrap_or(0),
            size: parse_octal(&block[SIZE]),
            mtime: parse_octal(&block[MTIME]),
            checksum: parse_octal(&block[CHECKSUM]),
            typeflag: block[TYPEFLAG],
        })
    }

    /// Encode the header as a 512-byte ustar record with a valid checksum.
    /// Over-long text fields are cut to their field width.
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        write_str(&mut block[NAME], &self.name);
        write_octal(&mut block[MODE], u64::from(self.mode));
        write_octal(&mut block[UID], 0);
        write_octal(&mut block[GID], 0);
        write_octal(&mut block[SIZE], self.size);
        write_octal(&mut block[MTIME], self.mtime);
        block[TYPEFLAG] = self.typeflag;
        write_str(&mut block[LINKNAME], &self.linkname);
        block[MAGIC].copy_from_slice(b"ustar\0");
        block[VERSION].copy_from_slice(b"00");
        write_str(&mut block[PREFIX], &self.prefix);

        let checksum = format!("{:06o}\0 ", calc_checksum(&block));
        block[CHECKSUM].copy_from_slice(&checksum.as_bytes()[..CHECKSUM.len()]);
        block
    }
}

/// Header plus payload, used when building archives
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub header: TarHeader,
    pub data: Vec<u8>,
}

impl TarEntry {
    pub fn new(header: TarHeader, data: Vec<u8>) -> Self {
        Self { header, data }
    }
}

/// Writes entries as a tar stream: each header, its payload padded to the
/// block size, then two zero blocks.
///
/// The header's `size` field is written as-is, so callers can build
/// archives whose declared sizes disagree with their payloads.
pub fn write_tar(entries: &[TarEntry]) -> Vec<u8> {
    let mut tar_data = Vec::new();
    for entry in entries {
        tar_data.extend_from_slice(&entry.header.to_bytes());
        tar_data.extend_from_slice(&entry.data);
        tar_data.resize(tar_data.len() + padding_for(entry.data.len() as u64) as usize, 0);
    }
    tar_data.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
    tar_data
}

/// Bytes needed after a payload of `size` bytes to reach the next block boundary.
pub fn padding_for(size: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    (block - size % block) % block
}

/// Check if a block is all zeros (end of archive)
pub fn is_empty_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Sum of the header bytes, with the checksum field counted as spaces.
pub fn calc_checksum(block: &[u8; BLOCK_SIZE]) -> u64 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if CHECKSUM.contains(&i) {
                u64::from(b' ')
            } else {
                u64::from(b)
            }
        })
        .sum()
}

pub fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> bool {
    calc_checksum(block) == parse_octal(&block[CHECKSUM])
}

/// Parses an octal text field. Leading spaces and NULs are skipped and the
/// digits run up to the first NUL or space. A field that does not parse
/// yields 0.
pub fn parse_octal(field: &[u8]) -> u64 {
    let start = field
        .iter()
        .position(|&b| b != b' ' && b != 0)
        .unwrap_or(field.len());
    let rest = &field[start..];
    let end = rest
        .iter()
        .position(|&b| b == 0 || b == b' ')
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    let octal_len = digits
        .iter()
        .position(|b| !(b'0'..=b'7').contains(b))
        .unwrap_or(digits.len());
    if octal_len == 0 {
        return 0;
    }
    digits[..octal_len]
        .iter()
        .try_fold(0u64, |acc, &d| {
            acc.checked_mul(8)?.checked_add(u64::from(d - b'0'))
        })
        .unwrap_or(0)
}

/// Reads a NUL-terminated text field. Returns `None` when a byte is not
/// printable ASCII (tab excepted) or the text is longer than `max_len`.
pub fn read_safe_str(field: &[u8], max_len: usize) -> Option<String> {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = &field[..len];
    if len > max_len || !text.iter().all(|&b| is_printable(b)) {
        return None;
    }
    // all bytes are ASCII
    Some(text.iter().map(|&b| char::from(b)).collect())
}

/// Reads a NUL-terminated text field, replacing invalid UTF-8.
pub fn read_lossy_str(field: &[u8]) -> String {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}

pub(crate) fn is_printable(b: u8) -> bool {
    b == b'\t' || (0x20..=0x7e).contains(&b)
}

fn write_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

fn write_octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{:0digits$o}", value);
    let bytes = text.as_bytes();
    let len = bytes.len().min(digits);
    field[..len].copy_from_slice(&bytes[bytes.len() - len..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_test() {
        let header = TarHeader::new("test.txt".to_string(), 0o644, 33);
        let block = header.to_bytes();
        assert!(verify_checksum(&block));
        let parsed = TarHeader::from_bytes(&block, 255).unwrap();
        assert_eq!(parsed.checksum, calc_checksum(&block));
    }

    #[test]
    fn header_fields_decode() {
        let mut header = TarHeader::new("hello.txt".to_string(), 0o755, 12345);
        header.prefix = "speedtest-cli".to_string();
        header.mtime = 1_700_000_000;
        let parsed = TarHeader::from_bytes(&header.to_bytes(), 255).unwrap();
        assert_eq!(parsed.name, "hello.txt");
        assert_eq!(parsed.prefix, "speedtest-cli");
        assert_eq!(parsed.full_path(), "speedtest-cli/hello.txt");
        assert_eq!(parsed.mode, 0o755);
        assert_eq!(parsed.size, 12345);
        assert_eq!(parsed.mtime, 1_700_000_000);
        assert_eq!(parsed.kind(), EntryKind::Regular);
    }

    #[test]
    fn entry_kinds() {
        assert_eq!(EntryKind::from_typeflag(b'5'), EntryKind::Directory);
        assert_eq!(EntryKind::from_typeflag(b'0'), EntryKind::Regular);
        assert_eq!(EntryKind::from_typeflag(0), EntryKind::Regular);
        assert_eq!(EntryKind::from_typeflag(b'1'), EntryKind::HardLink);
        assert_eq!(EntryKind::from_typeflag(b'2'), EntryKind::Symlink);
        assert_eq!(EntryKind::from_typeflag(b'3'), EntryKind::Other(b'3'));
        assert_eq!(EntryKind::from_typeflag(b'x'), EntryKind::Other(b'x'));
        assert_eq!(EntryKind::from_typeflag(b'L'), EntryKind::Other(b'L'));
    }

    #[test]
    fn parse_octal_leniency() {
        assert_eq!(parse_octal(b"0000644\0"), 0o644);
        assert_eq!(parse_octal(b"  000017 "), 0o17);
        assert_eq!(parse_octal(b"\0\0\0\0"), 0);
        assert_eq!(parse_octal(b"garbage\0"), 0);
        assert_eq!(parse_octal(b"12x\0"), 0o12);
        assert_eq!(parse_octal(b"-5\0"), 0);
        // 25 octal digits overflow u64
        assert_eq!(parse_octal(b"7777777777777777777777777"), 0);
    }

    #[test]
    fn read_safe_str_rules() {
        assert_eq!(read_safe_str(b"abc\0def", 255).as_deref(), Some("abc"));
        assert_eq!(read_safe_str(b"a\tb\0", 255).as_deref(), Some("a\tb"));
        assert_eq!(read_safe_str(b"\0\0\0", 255).as_deref(), Some(""));
        assert_eq!(read_safe_str(b"bad\x01\0", 255), None);
        assert_eq!(read_safe_str(b"caf\xc3\xa9\0", 255), None);
        assert_eq!(read_safe_str(b"del\x7f\0", 255), None);
        assert_eq!(read_safe_str(b"abcdef\0", 5), None);
        assert_eq!(read_safe_str(b"abcde\0", 5).as_deref(), Some("abcde"));
    }

    #[test]
    fn write_test() {
        let entries = vec![TarEntry::new(
            TarHeader::new("hoge.txt".to_string(), 0o644, 12),
            b"Hello, World".to_vec(),
        )];
        let tar_data = write_tar(&entries);
        // header + one padded data block + two end blocks
        assert_eq!(tar_data.len(), BLOCK_SIZE * 4);
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&tar_data[..BLOCK_SIZE]);
        let header = TarHeader::from_bytes(&block, 255).unwrap();
        assert_eq!(header.name, "hoge.txt");
        assert_eq!(&tar_data[BLOCK_SIZE..BLOCK_SIZE + 12], b"Hello, World");
        assert!(is_empty_block(&tar_data[BLOCK_SIZE * 2..BLOCK_SIZE * 3]));
    }

    #[test]
    fn padding_rounds_to_block() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 511);
        assert_eq!(padding_for(512), 0);
        assert_eq!(padding_for(513), 511);
    }

    #[test]
    fn security_test_invalid_checksum() {
        let mut block = TarHeader::new("test.txt".to_string(), 0o644, 10).to_bytes();
        block[148] = b'9';
        block[149] = b'9';
        assert_eq!(
            TarHeader::from_bytes(&block, 255),
            Err(ExtractError::InvalidChecksum)
        );
    }

    #[test]
    fn security_test_flipped_byte_breaks_checksum() {
        let block = TarHeader::new("data/hello.txt".to_string(), 0o644, 5).to_bytes();
        for i in (0..BLOCK_SIZE).filter(|i| !CHECKSUM.contains(i)) {
            let mut corrupted = block;
            corrupted[i] ^= 0x01;
            assert_eq!(
                TarHeader::from_bytes(&corrupted, 255),
                Err(ExtractError::InvalidChecksum),
                "flip at byte {} went unnoticed",
                i
            );
        }
    }

    #[test]
    fn security_test_non_ascii_name() {
        let mut header = TarHeader::new("x".to_string(), 0o644, 0);
        header.name = "caf\u{e9}".to_string();
        assert_eq!(
            TarHeader::from_bytes(&header.to_bytes(), 255),
            Err(ExtractError::InvalidHeader)
        );
    }

    #[test]
    fn garbage_linkname_is_tolerated() {
        let mut block = TarHeader::new("ok.txt".to_string(), 0o644, 2).to_bytes();
        block[LINKNAME][..3].copy_from_slice(&[0xc3, 0xa9, 0x01]);
        let checksum = format!("{:06o}\0 ", calc_checksum(&block));
        block[CHECKSUM].copy_from_slice(checksum.as_bytes());
        let parsed = TarHeader::from_bytes(&block, 255).unwrap();
        assert_eq!(parsed.name, "ok.txt");
        assert_eq!(parsed.linkname, "\u{e9}\u{1}");
    }

    #[test]
    fn security_test_oversized_name() {
        // 200 bytes are cut to the 100-byte name field
        let header = TarHeader::new("a".repeat(200), 0o644, 10);
        let parsed = TarHeader::from_bytes(&header.to_bytes(), 255).unwrap();
        assert_eq!(parsed.name.len(), 100);
        // the same name is too long for a 64-byte component limit
        assert_eq!(
            TarHeader::from_bytes(&header.to_bytes(), 64),
            Err(ExtractError::InvalidHeader)
        );
    }

    #[test]
    fn security_test_oversized_prefix() {
        let mut header = TarHeader::new("test.txt".to_string(), 0o644, 10);
        header.prefix = "b".repeat(200);
        let parsed = TarHeader::from_bytes(&header.to_bytes(), 255).unwrap();
        assert_eq!(parsed.prefix.len(), 155);
    }

    #[test]
    fn security_test_integer_overflow() {
        let header = TarHeader::new("overflow.txt".to_string(), 0o644, u64::MAX);
        let parsed = TarHeader::from_bytes(&header.to_bytes(), 255).unwrap();
        // only the low 11 octal digits fit in the size field
        assert_eq!(parsed.size, u64::MAX & 0o77777777777);
    }

    #[test]
    fn empty_block_detection() {
        assert!(is_empty_block(&[0u8; BLOCK_SIZE]));
        let mut block = [0u8; BLOCK_SIZE];
        block[511] = 1;
        assert!(!is_empty_block(&block));
    }
}
