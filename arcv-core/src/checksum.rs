//! Content digests for archive entries.
//!
//! A [`ChecksumManifest`] maps logical entry names to the hex digest of the
//! entry's uncompressed bytes. It is produced from the source files at
//! archive creation time, or on demand from an existing, structurally sound
//! container.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, info};

use crate::container::Layout;
use crate::error::{Error, Result};
use crate::merkle;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [Self::Sha256, Self::Sha512, Self::Blake3];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    pub fn digester(self) -> Digester {
        match self {
            Self::Sha256 => Digester::Sha256(Sha256::new()),
            Self::Sha512 => Digester::Sha512(Sha512::new()),
            Self::Blake3 => Digester::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// One-shot digest of `data` as lowercase hex.
    pub fn hex_digest(self, data: &[u8]) -> String {
        let mut d = self.digester();
        d.update(data);
        d.finalize_hex()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == norm)
            .ok_or_else(|| Error::UnsupportedAlgorithm { requested: s.to_string() })
    }
}

/// Streaming hasher for any supported algorithm.
pub enum Digester {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumManifest {
    pub algorithm: HashAlgorithm,
    pub entries: BTreeMap<String, String>,
    /// BLAKE3 Merkle root over the sorted `(name, digest)` pairs.
    pub root_hex: String,
}

impl ChecksumManifest {
    pub fn new(algorithm: HashAlgorithm, entries: BTreeMap<String, String>) -> Self {
        let root_hex = merkle::manifest_root(&entries).to_hex().to_string();
        Self { algorithm, entries, root_hex }
    }

    /// False when the entry map was edited after the root was computed.
    pub fn root_matches(&self) -> bool {
        merkle::manifest_root(&self.entries).to_hex().to_string() == self.root_hex
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn digest(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }
}

fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let f = File::open(path)?;
    let meta = f.metadata()?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    // Mapping a zero-length file fails on some platforms.
    if meta.len() == 0 {
        return Ok(algorithm.hex_digest(&[]));
    }
    let mmap = unsafe { Mmap::map(&f)? };
    Ok(algorithm.hex_digest(&mmap))
}

/// Hash every source file in `file_map` (logical name → path on disk).
///
/// The first unreadable source, in name order, aborts the whole call with
/// [`Error::Checksum`]; no partial manifest is returned.
pub fn generate_checksums(
    file_map: &BTreeMap<String, PathBuf>,
    algorithm: HashAlgorithm,
) -> Result<ChecksumManifest> {
    let hashed: Vec<(&String, &PathBuf, io::Result<String>)> = file_map
        .par_iter()
        .map(|(name, path)| (name, path, hash_file(path, algorithm)))
        .collect();

    let mut entries = BTreeMap::new();
    for (name, path, digest) in hashed {
        let digest = digest.map_err(|source| Error::Checksum {
            entry: name.clone(),
            path: path.clone(),
            source,
        })?;
        debug!(entry = %name, %algorithm, "hashed source file");
        entries.insert(name.clone(), digest);
    }
    info!(entries = entries.len(), %algorithm, "checksum manifest generated");
    Ok(ChecksumManifest::new(algorithm, entries))
}

/// Digest the decompressed entries of an existing container.
///
/// Directory entries are skipped. A container that cannot be opened, or an
/// entry that fails its structural check, aborts with [`Error::Checksum`]
/// since its digest would be meaningless.
pub fn generate_checksums_from_archive(
    path: &Path,
    algorithm: HashAlgorithm,
) -> Result<ChecksumManifest> {
    let mut f = File::open(path).map_err(|e| Error::io(path, e))?;
    let layout = Layout::read(&mut f).map_err(|fault| Error::Checksum {
        entry: "container".into(),
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, fault.to_string()),
    })?;

    let mut entries = BTreeMap::new();
    for entry in layout.entries.iter().filter(|e| !e.is_dir()) {
        let mut d = algorithm.digester();
        layout
            .check_entry(&mut f, entry, &mut |chunk| d.update(chunk))
            .map_err(|fault| Error::Checksum {
                entry: entry.name.clone(),
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, fault.to_string()),
            })?;
        entries.entry(entry.name.clone()).or_insert_with(|| d.finalize_hex());
    }
    info!(archive = %path.display(), entries = entries.len(), %algorithm, "checksums derived from archive");
    Ok(ChecksumManifest::new(algorithm, entries))
}
