//! Deterministic, single-fault corruption of archive copies.
//!
//! Every injection parses the source with the same [`Layout`] the verifier
//! uses, applies exactly one fault of the requested [`CorruptionType`] to a
//! copy, and describes what it altered in a [`CorruptionSpec`]. All random
//! choices come from one `fastrand::Rng` seeded with the caller's seed and are
//! drawn in a fixed order, so `(source bytes, kind, seed)` fully determines the
//! output bytes.
//!
//! Only entries that pass the structural check in the pristine source are
//! eligible targets, so the injected fault is the cause of whatever the
//! verifier reports for them.

mod rebuild;

use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fastrand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::container::{
    field, le_u32, CentralEntry, Layout, LocalHeader, METHOD_DEFLATE, SIG_EOCD, SIG_LFH,
};
use crate::error::{Error, Result};
use crate::status::VerificationStatus;

/// Verifier stage expected to report a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionLayer {
    ContainerOpen,
    EntryOpen,
    EntryIntegrity,
    ExternalDigest,
}

impl DetectionLayer {
    pub fn label(self) -> &'static str {
        match self {
            Self::ContainerOpen => "container open",
            Self::EntryOpen => "entry open",
            Self::EntryIntegrity => "entry integrity",
            Self::ExternalDigest => "external digest",
        }
    }
}

impl fmt::Display for DetectionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorruptionType {
    /// Cut the file short, removing at least the end-of-central-directory record.
    Truncation,
    /// Damage the end-of-central-directory record.
    EndOfDirectory,
    /// Alter a size or offset in one central directory header.
    CentralDirectoryEntry,
    /// Alter the signature or compressed size in one local header.
    LocalHeader,
    /// Alter one entry's stored CRC-32, leaving its data untouched.
    StoredChecksum,
    /// Flip bits in a few contiguous bytes of compressed entry data.
    PayloadBytes,
    /// Zero a short run of bytes in a region the verifier reads.
    ZeroFill,
    /// Change entry content and rewrite all metadata to match.
    ContentSubstitution,
}

impl CorruptionType {
    pub const ALL: [CorruptionType; 8] = [
        Self::Truncation,
        Self::EndOfDirectory,
        Self::CentralDirectoryEntry,
        Self::LocalHeader,
        Self::StoredChecksum,
        Self::PayloadBytes,
        Self::ZeroFill,
        Self::ContentSubstitution,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Truncation => "truncation",
            Self::EndOfDirectory => "end-of-directory",
            Self::CentralDirectoryEntry => "central-directory-entry",
            Self::LocalHeader => "local-header",
            Self::StoredChecksum => "stored-checksum",
            Self::PayloadBytes => "payload-bytes",
            Self::ZeroFill => "zero-fill",
            Self::ContentSubstitution => "content-substitution",
        }
    }

    /// Nominal layer. `ZeroFill` is resolved per injection from the region hit.
    pub fn expected_layer(self) -> DetectionLayer {
        match self {
            Self::Truncation | Self::EndOfDirectory => DetectionLayer::ContainerOpen,
            Self::CentralDirectoryEntry | Self::LocalHeader => DetectionLayer::EntryOpen,
            Self::StoredChecksum | Self::PayloadBytes | Self::ZeroFill => {
                DetectionLayer::EntryIntegrity
            }
            Self::ContentSubstitution => DetectionLayer::ExternalDigest,
        }
    }
}

impl fmt::Display for CorruptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CorruptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|k| k.label() == norm)
            .ok_or_else(|| Error::injection("corruption", format!("unknown corruption type {s:?}")))
    }
}

/// What one injection altered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CorruptionSpec {
    pub kind: CorruptionType,
    /// First altered byte in the corrupted copy (new length for truncation).
    pub target_offset: u64,
    pub seed: u64,
    pub description: String,
    pub target_entry: Option<String>,
    pub expected_layer: DetectionLayer,
    /// Bytes altered, or removed for truncation.
    pub length: u64,
}

impl CorruptionSpec {
    /// Whether `status` reports this fault at the layer it was aimed at.
    ///
    /// Entry open and entry integrity are both reported as `entry <name>: ...`
    /// structural findings and are accepted interchangeably.
    pub fn is_explained_by(&self, status: &VerificationStatus) -> bool {
        let target = self.target_entry.as_deref();
        match self.expected_layer {
            DetectionLayer::ContainerOpen => status.has_container_error(),
            DetectionLayer::EntryOpen | DetectionLayer::EntryIntegrity => {
                !status.has_container_error()
                    && target.is_some_and(|name| {
                        status
                            .errors()
                            .iter()
                            .filter_map(|e| entry_finding(e, name))
                            .any(|rest| !is_digest_finding(rest))
                    })
            }
            DetectionLayer::ExternalDigest => {
                status.has_checksums()
                    && !status.has_container_error()
                    && target.is_some_and(|name| {
                        status
                            .errors()
                            .iter()
                            .filter_map(|e| entry_finding(e, name))
                            .any(|rest| rest.starts_with("mismatched"))
                    })
            }
        }
    }
}

fn entry_finding<'a>(finding: &'a str, name: &str) -> Option<&'a str> {
    finding.strip_prefix("entry ")?.strip_prefix(name)?.strip_prefix(": ")
}

fn is_digest_finding(rest: &str) -> bool {
    rest == "missing" || rest.starts_with("mismatched") || rest.starts_with("unexpected")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptedArchiveResult {
    pub path: PathBuf,
    pub spec: CorruptionSpec,
}

/// Outcome of one handler, before the seed and kind are attached.
struct Mutation {
    target_offset: u64,
    length: u64,
    target_entry: Option<String>,
    expected_layer: DetectionLayer,
    description: String,
}

/// An entry that passed its structural check in the source.
struct Sound<'a> {
    entry: &'a CentralEntry,
    local: LocalHeader,
}

/// Copy `source` to `dest` with exactly one fault of `kind` applied.
///
/// `source` is never written. Fails with [`Error::Injection`] when `kind`
/// has no eligible target in this archive.
pub fn inject(
    source: &Path,
    dest: &Path,
    kind: CorruptionType,
    seed: u64,
) -> Result<CorruptedArchiveResult> {
    if same_file(source, dest) {
        return Err(Error::injection(kind.label(), "destination is the source archive"));
    }
    let bytes = fs::read(source).map_err(|e| Error::io(source, e))?;
    let (bytes, m) = corrupt_bytes(bytes, kind, seed)?;
    fs::write(dest, &bytes).map_err(|e| Error::io(dest, e))?;

    info!(
        kind = kind.label(),
        seed,
        offset = m.target_offset,
        entry = m.target_entry.as_deref().unwrap_or("-"),
        dest = %dest.display(),
        "corruption injected"
    );
    Ok(CorruptedArchiveResult {
        path: dest.to_path_buf(),
        spec: CorruptionSpec {
            kind,
            target_offset: m.target_offset,
            seed,
            description: m.description,
            target_entry: m.target_entry,
            expected_layer: m.expected_layer,
            length: m.length,
        },
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// In-memory form of [`inject`]; returns the corrupted bytes.
fn corrupt_bytes(mut bytes: Vec<u8>, kind: CorruptionType, seed: u64) -> Result<(Vec<u8>, Mutation)> {
    let layout = Layout::read(&mut Cursor::new(bytes.as_slice()))
        .map_err(|f| Error::injection(kind.label(), format!("source is not a readable container: {f}")))?;
    let mut rng = Rng::with_seed(seed);

    let m = match kind {
        CorruptionType::Truncation => truncation(&mut bytes, &layout, &mut rng),
        CorruptionType::EndOfDirectory => end_of_directory(&mut bytes, &layout, &mut rng),
        CorruptionType::CentralDirectoryEntry => central_directory_entry(&mut bytes, &layout, &mut rng)?,
        CorruptionType::LocalHeader => local_header(&mut bytes, &layout, &mut rng)?,
        CorruptionType::StoredChecksum => stored_checksum(&mut bytes, &layout, &mut rng)?,
        CorruptionType::PayloadBytes => payload_bytes(&mut bytes, &layout, &mut rng)?,
        CorruptionType::ZeroFill => zero_fill(&mut bytes, &layout, &mut rng)?,
        CorruptionType::ContentSubstitution => {
            let (out, m) = rebuild::substitute_content(&bytes, &layout, &mut rng)?;
            bytes = out;
            m
        }
    };
    debug!(kind = kind.label(), seed, description = %m.description, "mutation applied");
    Ok((bytes, m))
}

fn sound_entries<'a>(bytes: &[u8], layout: &'a Layout) -> Vec<Sound<'a>> {
    let mut cur = Cursor::new(bytes);
    layout
        .entries
        .iter()
        .filter_map(|entry| {
            layout
                .check_entry(&mut cur, entry, &mut |_| {})
                .ok()
                .map(|checked| Sound { entry, local: checked.local })
        })
        .collect()
}

fn pick<'s, T>(rng: &mut Rng, items: &'s [T], kind: CorruptionType, what: &str) -> Result<&'s T> {
    if items.is_empty() {
        return Err(Error::injection(kind.label(), format!("no {what} in archive")));
    }
    Ok(&items[rng.usize(..items.len())])
}

/// A different value that is not the Zip64 sentinel.
fn altered_u32(rng: &mut Rng, old: u32) -> u32 {
    loop {
        let new = old ^ rng.u32(1..);
        if new != u32::MAX {
            return new;
        }
    }
}

fn put_u32(bytes: &mut [u8], at: u64, v: u32) {
    let at = at as usize;
    bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u32(bytes: &[u8], at: u64) -> u32 {
    le_u32(&bytes[at as usize..])
}

fn truncation(bytes: &mut Vec<u8>, layout: &Layout, rng: &mut Rng) -> Mutation {
    let old_len = bytes.len() as u64;
    let new_len = rng.u64(0..=layout.eocd_offset);
    bytes.truncate(new_len as usize);
    Mutation {
        target_offset: new_len,
        length: old_len - new_len,
        target_entry: None,
        expected_layer: DetectionLayer::ContainerOpen,
        description: format!("truncated from {old_len} to {new_len} bytes"),
    }
}

fn end_of_directory(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Mutation {
    let at = layout.eocd_offset;
    let sig = loop {
        let s = rng.u32(..);
        if s != SIG_EOCD {
            break s;
        }
    };
    put_u32(bytes, at, sig);
    let fields = (at + field::EOCD_ENTRIES_TOTAL) as usize..(at + field::EOCD_COMMENT_LEN) as usize;
    for b in &mut bytes[fields] {
        *b = rng.u8(..);
    }
    Mutation {
        target_offset: at,
        length: 4 + (field::EOCD_COMMENT_LEN - field::EOCD_ENTRIES_TOTAL),
        target_entry: None,
        expected_layer: DetectionLayer::ContainerOpen,
        description: format!(
            "end-of-central-directory record at {at:#x}: signature set to {sig:#010x}, count/size/offset fields randomized"
        ),
    }
}

fn central_directory_entry(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Result<Mutation> {
    let kind = CorruptionType::CentralDirectoryEntry;
    let sound = sound_entries(bytes, layout);
    let eligible: Vec<&Sound> = sound.iter().filter(|s| !s.entry.zip64).collect();
    let target = pick(rng, &eligible, kind, "zip32 entry")?.entry;

    let (name, rel) = match rng.usize(..3) {
        0 => ("compressed size", field::CDFH_COMPRESSED),
        1 => ("uncompressed size", field::CDFH_UNCOMPRESSED),
        _ => ("local header offset", field::CDFH_LFH_OFFSET),
    };
    let at = target.central_field(rel);
    let old = get_u32(bytes, at);
    let new = altered_u32(rng, old);
    put_u32(bytes, at, new);
    Ok(Mutation {
        target_offset: at,
        length: 4,
        target_entry: Some(target.name.clone()),
        expected_layer: DetectionLayer::EntryOpen,
        description: format!("central directory {name} of {} changed from {old} to {new}", target.name),
    })
}

fn local_header(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Result<Mutation> {
    let kind = CorruptionType::LocalHeader;
    let sound = sound_entries(bytes, layout);
    let target = pick(rng, &sound, kind, "readable entry")?;
    let entry = target.entry;

    // Sizes are not compared when a data descriptor or zip64 extra carries them.
    let size_usable = !target.local.uses_data_descriptor()
        && get_u32(bytes, entry.local_field(field::LFH_COMPRESSED)) != u32::MAX;
    let alter_size = size_usable && rng.bool();

    let (name, at) = if alter_size {
        ("compressed size", entry.local_field(field::LFH_COMPRESSED))
    } else {
        ("signature", entry.local_field(field::SIGNATURE))
    };
    let old = get_u32(bytes, at);
    let new = if alter_size {
        altered_u32(rng, old)
    } else {
        loop {
            let s = rng.u32(..);
            if s != SIG_LFH {
                break s;
            }
        }
    };
    put_u32(bytes, at, new);
    Ok(Mutation {
        target_offset: at,
        length: 4,
        target_entry: Some(entry.name.clone()),
        expected_layer: DetectionLayer::EntryOpen,
        description: format!("local header {name} of {} changed from {old:#x} to {new:#x}", entry.name),
    })
}

fn stored_checksum(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Result<Mutation> {
    let kind = CorruptionType::StoredChecksum;
    let sound = sound_entries(bytes, layout);
    let files: Vec<&Sound> = sound.iter().filter(|s| !s.entry.is_dir()).collect();
    let target = pick(rng, &files, kind, "file entry")?;
    let entry = target.entry;

    let old = entry.crc32;
    let new = old ^ rng.u32(1..);
    let central = entry.central_field(field::CDFH_CRC32);
    put_u32(bytes, central, new);
    let mut length = 4;
    if target.local.crc32 == old {
        put_u32(bytes, entry.local_field(field::LFH_CRC32), new);
        length += 4;
    }
    Ok(Mutation {
        target_offset: central,
        length,
        target_entry: Some(entry.name.clone()),
        expected_layer: DetectionLayer::EntryIntegrity,
        description: format!("stored crc32 of {} changed from {old:08x} to {new:08x}", entry.name),
    })
}

/// Compressed data span whose every byte influences the decoded output.
/// The last byte of a deflate stream may hold padding bits, so it is excluded.
fn sensitive_span(s: &Sound) -> Option<(u64, u64)> {
    let len = if s.entry.method == METHOD_DEFLATE {
        s.entry.compressed_size.saturating_sub(1)
    } else {
        s.entry.compressed_size
    };
    (len > 0).then_some((s.local.data_offset, len))
}

fn payload_bytes(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Result<Mutation> {
    let kind = CorruptionType::PayloadBytes;
    let sound = sound_entries(bytes, layout);
    let spans: Vec<(&Sound, (u64, u64))> =
        sound.iter().filter_map(|s| sensitive_span(s).map(|span| (s, span))).collect();
    let &(target, (start, span)) = pick(rng, &spans, kind, "entry with data")?;

    let len = rng.u64(1..=span.min(4));
    let at = start + rng.u64(0..=span - len);
    for b in &mut bytes[at as usize..(at + len) as usize] {
        *b ^= rng.u8(1..);
    }
    Ok(Mutation {
        target_offset: at,
        length: len,
        target_entry: Some(target.entry.name.clone()),
        expected_layer: DetectionLayer::EntryIntegrity,
        description: format!(
            "{len} byte(s) of compressed data of {} flipped at {at:#x}",
            target.entry.name
        ),
    })
}

struct Region {
    start: u64,
    len: u64,
    entry: Option<String>,
    layer: DetectionLayer,
    what: &'static str,
}

fn zero_fill(bytes: &mut [u8], layout: &Layout, rng: &mut Rng) -> Result<Mutation> {
    let kind = CorruptionType::ZeroFill;
    let sound = sound_entries(bytes, layout);

    let mut regions = Vec::new();
    for s in &sound {
        if let Some((start, len)) = sensitive_span(s) {
            regions.push(Region {
                start,
                len,
                entry: Some(s.entry.name.clone()),
                layer: DetectionLayer::EntryIntegrity,
                what: "entry data",
            });
        }
    }
    for s in &sound {
        regions.push(Region {
            start: s.entry.lfh_offset,
            len: 4,
            entry: Some(s.entry.name.clone()),
            layer: DetectionLayer::EntryOpen,
            what: "local header signature",
        });
    }
    for e in &layout.entries {
        regions.push(Region {
            start: e.cdfh_offset,
            len: 4,
            entry: None,
            layer: DetectionLayer::ContainerOpen,
            what: "central directory signature",
        });
    }
    regions.push(Region {
        start: layout.eocd_offset,
        len: 4,
        entry: None,
        layer: DetectionLayer::ContainerOpen,
        what: "end-of-central-directory signature",
    });
    regions.retain(|r| bytes[r.start as usize..(r.start + r.len) as usize].iter().any(|&b| b != 0));

    let region = pick(rng, &regions, kind, "non-zero region")?;
    let nonzero: Vec<u64> = (region.start..region.start + region.len)
        .filter(|&i| bytes[i as usize] != 0)
        .collect();
    let at = nonzero[rng.usize(..nonzero.len())];
    let end = (at + rng.u64(1..=32)).min(region.start + region.len);
    bytes[at as usize..end as usize].fill(0);

    let target = region.entry.as_deref().map(|n| format!(" of {n}")).unwrap_or_default();
    Ok(Mutation {
        target_offset: at,
        length: end - at,
        target_entry: region.entry.clone(),
        expected_layer: region.layer,
        description: format!("{} byte(s) of {}{target} zeroed at {at:#x}", end - at, region.what),
    })
}
