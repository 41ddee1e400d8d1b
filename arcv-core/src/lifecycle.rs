//! Archive lifecycle hooks: what happens to sidecars when an archive is
//! created, re-checked, or removed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::archive::Archive;
use crate::checksum::generate_checksums;
use crate::config::IntegrityConfig;
use crate::error::Result;
use crate::status::VerificationStatus;
use crate::store::SidecarStore;
use crate::verify::{verify_against, verify_checksums_with, VerifyOptions};

/// Hash the sources of a freshly written archive and store the manifest.
/// With `verify_on_create`, also verify the container against it and store
/// the resulting status.
pub fn record_new_archive(
    store: &SidecarStore,
    archive: &Archive,
    file_map: &BTreeMap<String, PathBuf>,
    cfg: &IntegrityConfig,
) -> Result<Option<VerificationStatus>> {
    let manifest = generate_checksums(file_map, cfg.algorithm)?;
    store.store_checksums(&archive.path, &manifest)?;
    if !cfg.verify_on_create {
        info!(archive = %archive.name, entries = manifest.len(), "checksums recorded");
        return Ok(None);
    }
    let status = verify_against(&archive.path, &manifest, &cfg.verify_options())?;
    store.store_status(&archive.path, &status)?;
    info!(archive = %archive.name, state = status.display_state().label(), "archive recorded");
    Ok(Some(status))
}

/// Verify with whatever manifest is on record and store the new status.
pub fn reverify(
    store: &SidecarStore,
    archive: &Archive,
    opts: &VerifyOptions,
) -> Result<VerificationStatus> {
    let status = verify_checksums_with(store, &archive.path, opts)?;
    store.store_status(&archive.path, &status)?;
    Ok(status)
}

/// Drop all records for an archive that was deleted or replaced.
pub fn forget(store: &SidecarStore, archive: &Archive) -> Result<()> {
    store.clear(&archive.path)
}
