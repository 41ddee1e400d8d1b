pub mod archive;
pub mod checksum;
pub mod config;
pub mod container;
pub mod corrupt;
pub mod error;
pub mod lifecycle;
pub mod merkle;
pub mod progress;
pub mod status;
pub mod store;
pub mod verify;

pub use archive::Archive;
pub use checksum::{generate_checksums, generate_checksums_from_archive, ChecksumManifest, HashAlgorithm};
pub use config::IntegrityConfig;
pub use corrupt::{inject, CorruptedArchiveResult, CorruptionSpec, CorruptionType, DetectionLayer};
pub use error::{Error, Result};
pub use status::{DisplayState, VerificationStatus};
pub use store::{SidecarStore, StoreLayout};
pub use verify::{verify_against, verify_archive, verify_archive_with, verify_checksums, verify_checksums_with, VerifyOptions};

/// Persist a verification outcome for `archive`.
pub fn store_verification_status(store: &SidecarStore, archive: &Archive, status: &VerificationStatus) -> Result<()> {
    store.store_status(&archive.path, status)
}

/// Last recorded outcome for `archive`, if any.
pub fn load_verification_status(store: &SidecarStore, archive: &Archive) -> Result<Option<VerificationStatus>> {
    store.load_status(&archive.path)
}

/// Persist a checksum manifest for `archive`.
pub fn store_checksums(store: &SidecarStore, archive: &Archive, manifest: &ChecksumManifest) -> Result<()> {
    store.store_checksums(&archive.path, manifest)
}
