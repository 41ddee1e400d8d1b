//! Typed call failures for the integrity core.
//!
//! A damaged archive is never one of these: corruption is reported as a
//! finding inside [`crate::status::VerificationStatus`]. `Error` is reserved
//! for conditions that stop the call itself (unreadable paths, bad caller
//! input, sidecar I/O, inapplicable injections).

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The archive path could not be opened or read at all.
    Io { path: PathBuf, source: io::Error },
    /// The hash algorithm identifier is not in the supported set.
    UnsupportedAlgorithm { requested: String },
    /// A source file could not be hashed; manifest generation was aborted.
    Checksum { entry: String, path: PathBuf, source: io::Error },
    /// A sidecar record could not be written or read back.
    Persistence { path: PathBuf, detail: String },
    /// The requested corruption cannot be applied to this archive.
    Injection { kind: &'static str, reason: String },
    /// A configuration file could not be parsed.
    Config { path: PathBuf, detail: String },
    /// Verification was interrupted through its cancel flag.
    Cancelled,
}

impl Error {
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    #[inline]
    pub fn persistence(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        Self::Persistence { path: path.into(), detail: detail.to_string() }
    }

    #[inline]
    pub fn injection(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Injection { kind, reason: reason.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::UnsupportedAlgorithm { requested } => {
                write!(f, "unsupported checksum algorithm {requested:?} (expected sha256, sha512 or blake3)")
            }
            Self::Checksum { entry, path, source } => {
                write!(f, "cannot checksum {entry} from {}: {source}", path.display())
            }
            Self::Persistence { path, detail } => {
                write!(f, "sidecar record {}: {detail}", path.display())
            }
            Self::Injection { kind, reason } => write!(f, "cannot inject {kind}: {reason}"),
            Self::Config { path, detail } => write!(f, "config {}: {detail}", path.display()),
            Self::Cancelled => write!(f, "verification cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Checksum { source, .. } => Some(source),
            _ => None,
        }
    }
}
