//! Zip container structures shared by the verifier and the corruption injector.
//!
//! # Invariants
//! - All sizes and offsets read from the container are untrusted and are
//!   validated against the file length (or the start of the central
//!   directory, for entry data) before anything is read.
//! - The same [`Layout`] offsets are used to *verify* and to *damage* a
//!   container, so an injected fault always lands on a byte the verifier reads.
//!
//! # Supported
//! - Zip32 and Zip64 (EOCD locator + record, per-entry `0x0001` extra field).
//! - Entry data: stored (method 0) and deflate (method 8).
//!
//! # Reported, not verified
//! - Multi-disk archives (open failure).
//! - Encrypted entries and other compression methods (entry failure).

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;

pub const SIG_LFH: u32 = 0x0403_4b50;
pub const SIG_CDFH: u32 = 0x0201_4b50;
pub const SIG_EOCD: u32 = 0x0605_4b50;
pub const SIG_ZIP64_EOCD: u32 = 0x0606_4b50;
pub const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;
pub const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4b50;

pub const EOCD_LEN: usize = 22;
pub const CDFH_LEN: usize = 46;
pub const LFH_LEN: usize = 30;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_LEN: usize = 56;
/// EOCD fixed part plus the largest possible trailing comment.
const EOCD_SEARCH_MAX: usize = EOCD_LEN + u16::MAX as usize;
const ZIP64_EXTRA_ID: u16 = 0x0001;

pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

const READ_BUF: usize = 64 * 1024;

/// Byte positions of individual fields, relative to the start of their record.
pub mod field {
    pub const SIGNATURE: u64 = 0;

    pub const EOCD_ENTRIES_DISK: u64 = 8;
    pub const EOCD_ENTRIES_TOTAL: u64 = 10;
    pub const EOCD_CD_SIZE: u64 = 12;
    pub const EOCD_CD_OFFSET: u64 = 16;
    pub const EOCD_COMMENT_LEN: u64 = 20;

    pub const CDFH_FLAGS: u64 = 8;
    pub const CDFH_CRC32: u64 = 16;
    pub const CDFH_COMPRESSED: u64 = 20;
    pub const CDFH_UNCOMPRESSED: u64 = 24;
    pub const CDFH_LFH_OFFSET: u64 = 42;

    pub const LFH_FLAGS: u64 = 6;
    pub const LFH_CRC32: u64 = 14;
    pub const LFH_COMPRESSED: u64 = 18;
    pub const LFH_UNCOMPRESSED: u64 = 22;
}

/// Why a container could not be opened at all.
#[derive(Debug)]
pub enum OpenFault {
    TooShort { len: u64 },
    NoEndRecord,
    MultiDisk,
    Zip64(String),
    CentralDirectoryOutOfBounds { offset: u64, size: u64, limit: u64 },
    EntryCountImpossible { declared: u64, cd_size: u64 },
    CentralDirectoryTruncated { index: u64 },
    BadCentralSignature { index: u64, offset: u64 },
    CentralDirectorySizeMismatch { declared: u64, parsed: u64 },
    Read(io::Error),
}

impl From<io::Error> for OpenFault {
    fn from(e: io::Error) -> Self {
        Self::Read(e)
    }
}

impl fmt::Display for OpenFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => {
                write!(f, "file is {len} bytes, too short for an end-of-central-directory record")
            }
            Self::NoEndRecord => write!(f, "end-of-central-directory record not found"),
            Self::MultiDisk => write!(f, "multi-disk archives are not supported"),
            Self::Zip64(detail) => write!(f, "zip64 end record: {detail}"),
            Self::CentralDirectoryOutOfBounds { offset, size, limit } => write!(
                f,
                "central directory [{offset:#x}, +{size}) exceeds end of directory at {limit:#x}"
            ),
            Self::EntryCountImpossible { declared, cd_size } => write!(
                f,
                "{declared} entries declared but the central directory holds only {cd_size} bytes"
            ),
            Self::CentralDirectoryTruncated { index } => {
                write!(f, "central directory truncated at entry #{index}")
            }
            Self::BadCentralSignature { index, offset } => {
                write!(f, "bad central directory signature for entry #{index} at {offset:#x}")
            }
            Self::CentralDirectorySizeMismatch { declared, parsed } => write!(
                f,
                "central directory declares {declared} bytes but its entries span {parsed}"
            ),
            Self::Read(e) => write!(f, "read failed: {e}"),
        }
    }
}

/// Why a single entry failed to open, decompress, or match its own metadata.
#[derive(Debug)]
pub enum EntryFault {
    LocalHeaderOutOfBounds { offset: u64 },
    BadLocalSignature { offset: u64 },
    LocalNameMismatch,
    LocalFieldMismatch { field: &'static str, central: u64, local: u64 },
    DataOutOfBounds { start: u64, end: u64, limit: u64 },
    Encrypted,
    UnsupportedMethod(u16),
    StoredSizeMismatch { compressed: u64, uncompressed: u64 },
    Decompress(String),
    CompressedSizeMismatch { declared: u64, consumed: u64 },
    SizeMismatch { declared: u64, actual: u64 },
    CrcMismatch { declared: u32, actual: u32 },
    Read(io::Error),
}

impl fmt::Display for EntryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalHeaderOutOfBounds { offset } => {
                write!(f, "local header at {offset:#x} lies outside the entry data region")
            }
            Self::BadLocalSignature { offset } => {
                write!(f, "bad local header signature at {offset:#x}")
            }
            Self::LocalNameMismatch => {
                write!(f, "local header name disagrees with the central directory")
            }
            Self::LocalFieldMismatch { field, central, local } => write!(
                f,
                "local header {field} {local:#x} disagrees with central directory {central:#x}"
            ),
            Self::DataOutOfBounds { start, end, limit } => {
                write!(f, "entry data [{start:#x}, {end:#x}) runs past {limit:#x}")
            }
            Self::Encrypted => write!(f, "entry is encrypted and cannot be verified"),
            Self::UnsupportedMethod(m) => write!(f, "unsupported compression method {m}"),
            Self::StoredSizeMismatch { compressed, uncompressed } => write!(
                f,
                "stored entry sizes differ (compressed {compressed}, uncompressed {uncompressed})"
            ),
            Self::Decompress(e) => write!(f, "decompression failed: {e}"),
            Self::CompressedSizeMismatch { declared, consumed } => write!(
                f,
                "compressed size {declared} but the deflate stream used {consumed} bytes"
            ),
            Self::SizeMismatch { declared, actual } => write!(
                f,
                "decompressed to {actual} bytes, expected {declared}"
            ),
            Self::CrcMismatch { declared, actual } => {
                write!(f, "crc32 mismatch (stored {declared:08x}, computed {actual:08x})")
            }
            Self::Read(e) => write!(f, "read failed: {e}"),
        }
    }
}

/// One central directory record, with absolute offsets resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralEntry {
    pub index: usize,
    pub name: String,
    pub name_bytes: Vec<u8>,
    pub cdfh_offset: u64,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
    /// At least one size/offset came from a Zip64 extra field.
    pub zip64: bool,
}

impl CentralEntry {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    #[inline]
    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    #[inline]
    pub fn method_supported(&self) -> bool {
        self.method == METHOD_STORED || self.method == METHOD_DEFLATE
    }

    /// Absolute offset of a `field::CDFH_*` field of this record.
    #[inline]
    pub fn central_field(&self, rel: u64) -> u64 {
        self.cdfh_offset + rel
    }

    /// Absolute offset of a `field::LFH_*` field of this entry's local header.
    #[inline]
    pub fn local_field(&self, rel: u64) -> u64 {
        self.lfh_offset + rel
    }
}

/// Local file header as found at `CentralEntry::lfh_offset`.
#[derive(Clone, Debug)]
pub struct LocalHeader {
    pub offset: u64,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub name_bytes: Vec<u8>,
    pub extra_len: u16,
    pub data_offset: u64,
}

impl LocalHeader {
    #[inline]
    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// Outcome of a successful layer-(b) check of one entry.
#[derive(Clone, Debug)]
pub struct CheckedEntry {
    pub local: LocalHeader,
    pub crc32: u32,
    pub size: u64,
}

/// Parsed container structure: end records plus every central directory entry.
#[derive(Clone, Debug)]
pub struct Layout {
    pub file_len: u64,
    pub eocd_offset: u64,
    /// Fixed record plus trailing comment.
    pub eocd_len: u64,
    pub zip64_eocd_offset: Option<u64>,
    pub cd_offset: u64,
    pub cd_size: u64,
    pub entries: Vec<CentralEntry>,
}

impl Layout {
    /// Locate the end record and parse the whole central directory.
    pub fn read<R: Read + Seek>(r: &mut R) -> Result<Self, OpenFault> {
        let file_len = r.seek(SeekFrom::End(0))?;
        if file_len < EOCD_LEN as u64 {
            return Err(OpenFault::TooShort { len: file_len });
        }

        let win_len = file_len.min(EOCD_SEARCH_MAX as u64) as usize;
        let win_off = file_len - win_len as u64;
        let mut win = vec![0u8; win_len];
        read_at(r, win_off, &mut win)?;

        // Scan backward; a candidate that fails validation may be a signature
        // inside a comment, so keep looking but report the latest failure.
        let mut first_fault = None;
        let mut i = win_len - EOCD_LEN;
        loop {
            if le_u32(&win[i..]) == SIG_EOCD {
                let comment_len = le_u16(&win[i + 20..]) as usize;
                if i + EOCD_LEN + comment_len <= win_len {
                    let eocd = &win[i..i + EOCD_LEN];
                    match Self::from_end_record(r, file_len, win_off + i as u64, eocd) {
                        Ok(layout) => return Ok(layout),
                        Err(fault) => {
                            first_fault.get_or_insert(fault);
                        }
                    }
                }
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }
        Err(first_fault.unwrap_or(OpenFault::NoEndRecord))
    }

    fn from_end_record<R: Read + Seek>(
        r: &mut R,
        file_len: u64,
        eocd_offset: u64,
        eocd: &[u8],
    ) -> Result<Self, OpenFault> {
        let disk_no = le_u16(&eocd[4..]);
        let cd_disk = le_u16(&eocd[6..]);
        let entries_disk = le_u16(&eocd[field::EOCD_ENTRIES_DISK as usize..]);
        let entries_total16 = le_u16(&eocd[field::EOCD_ENTRIES_TOTAL as usize..]);
        let cd_size32 = le_u32(&eocd[field::EOCD_CD_SIZE as usize..]);
        let cd_off32 = le_u32(&eocd[field::EOCD_CD_OFFSET as usize..]);
        let comment_len = le_u16(&eocd[field::EOCD_COMMENT_LEN as usize..]) as u64;

        if disk_no != 0 || cd_disk != 0 || entries_disk != entries_total16 {
            return Err(OpenFault::MultiDisk);
        }

        let mut entries_total = entries_total16 as u64;
        let mut cd_size = cd_size32 as u64;
        let mut cd_offset = cd_off32 as u64;
        let mut zip64_eocd_offset = None;

        if entries_total16 == u16::MAX || cd_size32 == u32::MAX || cd_off32 == u32::MAX {
            let loc_off = eocd_offset
                .checked_sub(ZIP64_LOCATOR_LEN as u64)
                .ok_or_else(|| OpenFault::Zip64("locator missing".into()))?;
            let mut loc = [0u8; ZIP64_LOCATOR_LEN];
            read_at(r, loc_off, &mut loc)?;
            if le_u32(&loc) != SIG_ZIP64_LOCATOR {
                return Err(OpenFault::Zip64("locator missing".into()));
            }
            if le_u32(&loc[16..]) != 1 {
                return Err(OpenFault::MultiDisk);
            }
            let rec_off = le_u64(&loc[8..]);
            if rec_off.saturating_add(ZIP64_EOCD_LEN as u64) > loc_off {
                return Err(OpenFault::Zip64(format!("record at {rec_off:#x} out of bounds")));
            }
            let mut rec = [0u8; ZIP64_EOCD_LEN];
            read_at(r, rec_off, &mut rec)?;
            if le_u32(&rec) != SIG_ZIP64_EOCD {
                return Err(OpenFault::Zip64(format!("bad signature at {rec_off:#x}")));
            }
            if le_u32(&rec[16..]) != 0 || le_u32(&rec[20..]) != 0 {
                return Err(OpenFault::MultiDisk);
            }
            entries_total = le_u64(&rec[32..]);
            cd_size = le_u64(&rec[40..]);
            cd_offset = le_u64(&rec[48..]);
            zip64_eocd_offset = Some(rec_off);
        }

        let limit = zip64_eocd_offset.unwrap_or(eocd_offset);
        match cd_offset.checked_add(cd_size) {
            Some(end) if end <= limit => {}
            _ => {
                return Err(OpenFault::CentralDirectoryOutOfBounds {
                    offset: cd_offset,
                    size: cd_size,
                    limit,
                })
            }
        }
        if entries_total > cd_size / CDFH_LEN as u64 {
            return Err(OpenFault::EntryCountImpossible { declared: entries_total, cd_size });
        }

        let mut cd = vec![0u8; cd_size as usize];
        read_at(r, cd_offset, &mut cd)?;
        let entries = parse_central_directory(&cd, cd_offset, entries_total)?;

        Ok(Self {
            file_len,
            eocd_offset,
            eocd_len: EOCD_LEN as u64 + comment_len,
            zip64_eocd_offset,
            cd_offset,
            cd_size,
            entries,
        })
    }

    /// Entry data must end before the first central directory byte.
    #[inline]
    pub fn data_limit(&self) -> u64 {
        self.cd_offset
    }

    pub fn entry(&self, name: &str) -> Option<&CentralEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read and validate an entry's local header against its central record.
    pub fn read_local_header<R: Read + Seek>(
        &self,
        r: &mut R,
        entry: &CentralEntry,
    ) -> Result<LocalHeader, EntryFault> {
        let limit = self.data_limit();
        if entry.lfh_offset.saturating_add(LFH_LEN as u64) > limit {
            return Err(EntryFault::LocalHeaderOutOfBounds { offset: entry.lfh_offset });
        }
        let mut hdr = [0u8; LFH_LEN];
        read_at(r, entry.lfh_offset, &mut hdr).map_err(EntryFault::Read)?;
        if le_u32(&hdr) != SIG_LFH {
            return Err(EntryFault::BadLocalSignature { offset: entry.lfh_offset });
        }

        let name_len = le_u16(&hdr[26..]) as u64;
        let extra_len = le_u16(&hdr[28..]);
        let data_offset = entry.lfh_offset + LFH_LEN as u64 + name_len + extra_len as u64;
        if data_offset > limit {
            return Err(EntryFault::LocalHeaderOutOfBounds { offset: entry.lfh_offset });
        }
        let mut var = vec![0u8; (name_len + extra_len as u64) as usize];
        read_at(r, entry.lfh_offset + LFH_LEN as u64, &mut var).map_err(EntryFault::Read)?;
        let (name, extra) = var.split_at(name_len as usize);

        let mut compressed_size = le_u32(&hdr[18..]) as u64;
        let mut uncompressed_size = le_u32(&hdr[22..]) as u64;
        if compressed_size == u32::MAX as u64 || uncompressed_size == u32::MAX as u64 {
            // Local Zip64 extra carries both sizes, uncompressed first.
            if let Some(mut z) = zip64_extra(extra).map(Zip64Fields::new) {
                if let (Some(u), Some(c)) = (z.next_u64(), z.next_u64()) {
                    uncompressed_size = u;
                    compressed_size = c;
                }
            }
        }

        let local = LocalHeader {
            offset: entry.lfh_offset,
            flags: le_u16(&hdr[6..]),
            method: le_u16(&hdr[8..]),
            crc32: le_u32(&hdr[14..]),
            compressed_size,
            uncompressed_size,
            name_bytes: name.to_vec(),
            extra_len,
            data_offset,
        };
        check_agreement(entry, &local)?;
        Ok(local)
    }

    /// Structural check of one entry: local header, bounds, decompression,
    /// declared size and stored CRC-32. Decompressed bytes are fed to `sink`
    /// as they are produced.
    pub fn check_entry<R: Read + Seek>(
        &self,
        r: &mut R,
        entry: &CentralEntry,
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<CheckedEntry, EntryFault> {
        let local = self.read_local_header(r, entry)?;
        if entry.is_encrypted() || local.flags & FLAG_ENCRYPTED != 0 {
            return Err(EntryFault::Encrypted);
        }
        if !entry.method_supported() {
            return Err(EntryFault::UnsupportedMethod(entry.method));
        }
        let start = local.data_offset;
        let limit = self.data_limit();
        let end = match start.checked_add(entry.compressed_size) {
            Some(end) if end <= limit => end,
            _ => {
                return Err(EntryFault::DataOutOfBounds {
                    start,
                    end: start.saturating_add(entry.compressed_size),
                    limit,
                })
            }
        };
        if entry.method == METHOD_STORED && entry.compressed_size != entry.uncompressed_size {
            return Err(EntryFault::StoredSizeMismatch {
                compressed: entry.compressed_size,
                uncompressed: entry.uncompressed_size,
            });
        }

        r.seek(SeekFrom::Start(start)).map_err(EntryFault::Read)?;
        let take = Read::take(&mut *r, end - start);
        let mut crc = Crc32::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; READ_BUF];

        let consumed = if entry.method == METHOD_DEFLATE {
            let mut dec = DeflateDecoder::new(take);
            pump(&mut dec, &mut buf, entry.uncompressed_size, &mut crc, &mut size, sink)
                .map_err(|e| EntryFault::Decompress(e.to_string()))?;
            dec.total_in()
        } else {
            let mut take = take;
            pump(&mut take, &mut buf, entry.uncompressed_size, &mut crc, &mut size, sink)
                .map_err(EntryFault::Read)?;
            (end - start) - take.limit()
        };

        if size != entry.uncompressed_size {
            return Err(EntryFault::SizeMismatch { declared: entry.uncompressed_size, actual: size });
        }
        if consumed != entry.compressed_size {
            return Err(EntryFault::CompressedSizeMismatch {
                declared: entry.compressed_size,
                consumed,
            });
        }
        let actual = crc.finalize();
        if actual != entry.crc32 {
            return Err(EntryFault::CrcMismatch { declared: entry.crc32, actual });
        }
        Ok(CheckedEntry { local, crc32: actual, size })
    }
}

/// Copy decompressed bytes into the CRC and sink. Stops one byte past the
/// declared size so an inflating entry cannot run unbounded.
fn pump<R: Read>(
    src: &mut R,
    buf: &mut [u8],
    declared: u64,
    crc: &mut Crc32,
    size: &mut u64,
    sink: &mut dyn FnMut(&[u8]),
) -> io::Result<()> {
    loop {
        let n = match src.read(buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        crc.update(&buf[..n]);
        sink(&buf[..n]);
        *size += n as u64;
        if *size > declared {
            return Ok(());
        }
    }
}

fn check_agreement(entry: &CentralEntry, local: &LocalHeader) -> Result<(), EntryFault> {
    if local.name_bytes != entry.name_bytes {
        return Err(EntryFault::LocalNameMismatch);
    }
    if local.method != entry.method {
        return Err(EntryFault::LocalFieldMismatch {
            field: "compression method",
            central: entry.method as u64,
            local: local.method as u64,
        });
    }
    // With a trailing data descriptor the local CRC and sizes may be zero.
    if local.uses_data_descriptor() {
        return Ok(());
    }
    let pairs = [
        ("crc32", entry.crc32 as u64, local.crc32 as u64),
        ("compressed size", entry.compressed_size, local.compressed_size),
        ("uncompressed size", entry.uncompressed_size, local.uncompressed_size),
    ];
    for (field, central, local) in pairs {
        if central != local {
            return Err(EntryFault::LocalFieldMismatch { field, central, local });
        }
    }
    Ok(())
}

fn parse_central_directory(
    cd: &[u8],
    cd_offset: u64,
    entries_total: u64,
) -> Result<Vec<CentralEntry>, OpenFault> {
    let mut entries = Vec::with_capacity(entries_total as usize);
    let mut pos = 0usize;
    for index in 0..entries_total {
        if pos + CDFH_LEN > cd.len() {
            return Err(OpenFault::CentralDirectoryTruncated { index });
        }
        let hdr = &cd[pos..pos + CDFH_LEN];
        if le_u32(hdr) != SIG_CDFH {
            return Err(OpenFault::BadCentralSignature { index, offset: cd_offset + pos as u64 });
        }
        let name_len = le_u16(&hdr[28..]) as usize;
        let extra_len = le_u16(&hdr[30..]) as usize;
        let comment_len = le_u16(&hdr[32..]) as usize;
        let rec_len = CDFH_LEN + name_len + extra_len + comment_len;
        if pos + rec_len > cd.len() {
            return Err(OpenFault::CentralDirectoryTruncated { index });
        }
        let name_bytes = cd[pos + CDFH_LEN..pos + CDFH_LEN + name_len].to_vec();
        let extra = &cd[pos + CDFH_LEN + name_len..pos + CDFH_LEN + name_len + extra_len];

        let comp32 = le_u32(&hdr[20..]);
        let uncomp32 = le_u32(&hdr[24..]);
        let lfh32 = le_u32(&hdr[42..]);
        let mut uncompressed_size = uncomp32 as u64;
        let mut compressed_size = comp32 as u64;
        let mut lfh_offset = lfh32 as u64;
        let zip64 = uncomp32 == u32::MAX || comp32 == u32::MAX || lfh32 == u32::MAX;
        if zip64 {
            let missing = || OpenFault::Zip64(format!("entry #{index} lacks its zip64 extra field"));
            let mut z = zip64_extra(extra).map(Zip64Fields::new).ok_or_else(missing)?;
            if uncomp32 == u32::MAX {
                uncompressed_size = z.next_u64().ok_or_else(missing)?;
            }
            if comp32 == u32::MAX {
                compressed_size = z.next_u64().ok_or_else(missing)?;
            }
            if lfh32 == u32::MAX {
                lfh_offset = z.next_u64().ok_or_else(missing)?;
            }
        }

        entries.push(CentralEntry {
            index: index as usize,
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
            name_bytes,
            cdfh_offset: cd_offset + pos as u64,
            flags: le_u16(&hdr[8..]),
            method: le_u16(&hdr[10..]),
            crc32: le_u32(&hdr[16..]),
            compressed_size,
            uncompressed_size,
            lfh_offset,
            zip64,
        });
        pos += rec_len;
    }
    if pos != cd.len() {
        return Err(OpenFault::CentralDirectorySizeMismatch {
            declared: cd.len() as u64,
            parsed: pos as u64,
        });
    }
    Ok(entries)
}

fn zip64_extra(extra: &[u8]) -> Option<&[u8]> {
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let id = le_u16(&extra[i..]);
        let len = le_u16(&extra[i + 2..]) as usize;
        let body = i + 4;
        if body + len > extra.len() {
            return None;
        }
        if id == ZIP64_EXTRA_ID {
            return Some(&extra[body..body + len]);
        }
        i = body + len;
    }
    None
}

struct Zip64Fields<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Zip64Fields<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    fn next_u64(&mut self) -> Option<u64> {
        let v = self.body.get(self.pos..self.pos + 8).map(le_u64)?;
        self.pos += 8;
        Some(v)
    }
}

pub(crate) fn read_at<R: Read + Seek>(r: &mut R, off: u64, dst: &mut [u8]) -> io::Result<()> {
    r.seek(SeekFrom::Start(off))?;
    r.read_exact(dst)
}

#[inline(always)]
pub(crate) fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline(always)]
pub(crate) fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline(always)]
pub(crate) fn le_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_le_bytes(a)
}
