//! Sidecar persistence for checksum manifests and verification status.
//!
//! Each archive owns up to two JSON documents:
//!
//! ```text
//! { "format": "arcv.checksums", "version": 1, "archive": "<abs path>", "record": ChecksumManifest }
//! { "format": "arcv.status",    "version": 1, "archive": "<abs path>", "record": VerificationStatus }
//! ```
//!
//! With [`StoreLayout::Adjacent`] they live next to the archive as
//! `<archive>.arcv-checksums.json` / `<archive>.arcv-status.json`. With
//! [`StoreLayout::Directory`] they live under one root, named by a BLAKE3 key
//! of the absolute archive path. Writes go to a temp file in the target
//! directory and are renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::ChecksumManifest;
use crate::error::{Error, Result};
use crate::status::VerificationStatus;

pub const FORMAT_VERSION: u32 = 1;
const CHECKSUMS_FORMAT: &str = "arcv.checksums";
const STATUS_FORMAT: &str = "arcv.status";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLayout {
    Adjacent,
    Directory(PathBuf),
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    format: &'a str,
    version: u32,
    archive: String,
    record: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    format: String,
    version: u32,
    record: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct SidecarStore {
    layout: StoreLayout,
}

impl Default for SidecarStore {
    fn default() -> Self {
        Self::adjacent()
    }
}

impl SidecarStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn adjacent() -> Self {
        Self::new(StoreLayout::Adjacent)
    }

    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self::new(StoreLayout::Directory(root.into()))
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn checksums_path(&self, archive: &Path) -> Result<PathBuf> {
        self.sidecar_path(archive, "checksums")
    }

    pub fn status_path(&self, archive: &Path) -> Result<PathBuf> {
        self.sidecar_path(archive, "status")
    }

    fn sidecar_path(&self, archive: &Path, what: &str) -> Result<PathBuf> {
        match &self.layout {
            StoreLayout::Adjacent => {
                let mut name = archive
                    .file_name()
                    .ok_or_else(|| Error::persistence(archive, "archive path has no file name"))?
                    .to_os_string();
                name.push(format!(".arcv-{what}.json"));
                Ok(archive.with_file_name(name))
            }
            StoreLayout::Directory(root) => {
                let key = archive_key(archive).map_err(|e| Error::persistence(archive, e))?;
                Ok(root.join(format!("{key}.{what}.json")))
            }
        }
    }

    /// Overwrites any previous manifest. The container is never touched.
    pub fn store_checksums(&self, archive: &Path, manifest: &ChecksumManifest) -> Result<()> {
        let path = self.checksums_path(archive)?;
        write_record(&path, archive, CHECKSUMS_FORMAT, manifest)
    }

    pub fn load_checksums(&self, archive: &Path) -> Result<Option<ChecksumManifest>> {
        let path = self.checksums_path(archive)?;
        read_record(&path, CHECKSUMS_FORMAT)
    }

    pub fn store_status(&self, archive: &Path, status: &VerificationStatus) -> Result<()> {
        let path = self.status_path(archive)?;
        write_record(&path, archive, STATUS_FORMAT, status)
    }

    /// `Ok(None)` means the archive has never been verified.
    pub fn load_status(&self, archive: &Path) -> Result<Option<VerificationStatus>> {
        let path = self.status_path(archive)?;
        let status: Option<VerificationStatus> = read_record(&path, STATUS_FORMAT)?;
        match status {
            Some(s) if !s.is_consistent() => {
                Err(Error::persistence(&path, "verified flag disagrees with recorded errors"))
            }
            other => Ok(other),
        }
    }

    /// Remove both sidecars; missing files are not an error.
    pub fn clear(&self, archive: &Path) -> Result<()> {
        for path in [self.checksums_path(archive)?, self.status_path(archive)?] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(sidecar = %path.display(), "removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::persistence(&path, e)),
            }
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

fn archive_key(archive: &Path) -> io::Result<String> {
    let abs = absolute(archive)?;
    let hash = blake3::hash(abs.to_string_lossy().as_bytes());
    Ok(hash.to_hex().as_str()[..32].to_string())
}

fn write_record<T: Serialize>(path: &Path, archive: &Path, format: &str, record: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::persistence(path, e))?;

    let archive = absolute(archive).unwrap_or_else(|_| archive.to_path_buf());
    let env = EnvelopeOut {
        format,
        version: FORMAT_VERSION,
        archive: archive.to_string_lossy().into_owned(),
        record,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| Error::persistence(path, e))?;
    serde_json::to_writer_pretty(&mut tmp, &env).map_err(|e| Error::persistence(path, e))?;
    tmp.write_all(b"\n").map_err(|e| Error::persistence(path, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::persistence(path, e))?;
    tmp.persist(path).map_err(|e| Error::persistence(path, e.error))?;
    debug!(sidecar = %path.display(), format, "record written");
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Path, format: &str) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::persistence(path, e)),
    };
    let env: EnvelopeIn = serde_json::from_slice(&bytes).map_err(|e| Error::persistence(path, e))?;
    if env.format != format {
        return Err(Error::persistence(
            path,
            format!("expected format {format:?}, found {:?}", env.format),
        ));
    }
    if env.version != FORMAT_VERSION {
        return Err(Error::persistence(path, format!("unsupported version {}", env.version)));
    }
    let record = serde_json::from_value(env.record).map_err(|e| Error::persistence(path, e))?;
    Ok(Some(record))
}
