//! Structural and digest verification of a stored container.
//!
//! Detection layers, each a superset of the previous:
//! - container open: end record and central directory parse;
//! - entry open / integrity: local header, bounds, decompression, size, CRC-32;
//! - external digest: decompressed bytes against a stored [`ChecksumManifest`].
//!
//! Damage is reported as findings in the returned [`VerificationStatus`].
//! `Err` is reserved for an unreadable path or cancellation.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::checksum::{ChecksumManifest, HashAlgorithm};
use crate::container::{CentralEntry, Layout};
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::status::VerificationStatus;
use crate::store::SidecarStore;

#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Per-entry worker threads; `0` uses the global rayon pool, `1` runs inline.
    pub workers: usize,
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<Progress>,
}

impl VerifyOptions {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers, ..Self::default() }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

struct EntryOutcome {
    fault: Option<String>,
    digest: Option<String>,
}

/// Layers (a) and (b). Never consults or writes sidecars.
pub fn verify_archive(path: &Path) -> Result<VerificationStatus> {
    verify_archive_with(path, &VerifyOptions::default())
}

pub fn verify_archive_with(path: &Path, opts: &VerifyOptions) -> Result<VerificationStatus> {
    run(path, None, opts)
}

/// Layers (a), (b) and (c) when `store` holds a manifest for `path`;
/// otherwise identical to [`verify_archive`].
pub fn verify_checksums(store: &SidecarStore, path: &Path) -> Result<VerificationStatus> {
    verify_checksums_with(store, path, &VerifyOptions::default())
}

pub fn verify_checksums_with(
    store: &SidecarStore,
    path: &Path,
    opts: &VerifyOptions,
) -> Result<VerificationStatus> {
    match store.load_checksums(path)? {
        Some(manifest) => verify_against(path, &manifest, opts),
        None => {
            debug!(archive = %path.display(), "no checksum manifest; structural check only");
            run(path, None, opts)
        }
    }
}

/// Full verification against a caller-supplied manifest.
pub fn verify_against(
    path: &Path,
    manifest: &ChecksumManifest,
    opts: &VerifyOptions,
) -> Result<VerificationStatus> {
    run(path, Some(manifest), opts)
}

fn open_regular(path: &Path) -> Result<File> {
    let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    if !meta.is_file() {
        return Err(Error::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    File::open(path).map_err(|e| Error::io(path, e))
}

fn run(
    path: &Path,
    manifest: Option<&ChecksumManifest>,
    opts: &VerifyOptions,
) -> Result<VerificationStatus> {
    let algorithm = manifest.map(|m| m.algorithm);
    let has_checksums = manifest.is_some();
    let mut file = open_regular(path)?;

    let layout = match Layout::read(&mut file) {
        Ok(layout) => layout,
        Err(fault) => {
            let finding = format!("container: {fault}");
            warn!(archive = %path.display(), %finding);
            let mut errors = vec![finding];
            if let Some(m) = manifest {
                errors.extend(manifest_finding(m));
            }
            return Ok(VerificationStatus::new(has_checksums, errors, algorithm, 0));
        }
    };
    drop(file);

    if let Some(p) = &opts.progress {
        p.set_stage("Verifying");
        // Declared sizes are untrusted and may overflow.
        let bytes =
            layout.entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.uncompressed_size));
        p.begin(layout.entries.len() as u64, bytes);
    }

    let outcomes = check_entries(path, &layout, algorithm, opts)?;
    if opts.cancelled() {
        return Err(Error::Cancelled);
    }

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (entry, outcome) in layout.entries.iter().zip(&outcomes) {
        let first = seen.insert(entry.name.as_str());
        if !first {
            errors.push(format!("entry {}: duplicate name in central directory", entry.name));
        }
        if let Some(fault) = &outcome.fault {
            errors.push(format!("entry {}: {fault}", entry.name));
            continue;
        }
        let Some(m) = manifest else { continue };
        match (m.digest(&entry.name), &outcome.digest) {
            (Some(expected), Some(got)) if first && expected != got.as_str() => errors.push(format!(
                "entry {}: mismatched (expected {expected}, got {got})",
                entry.name
            )),
            (None, _) if first && !entry.is_dir() => {
                errors.push(format!("entry {}: unexpected (not in manifest)", entry.name))
            }
            _ => {}
        }
    }
    if let Some(m) = manifest {
        for name in m.entries.keys() {
            if !seen.contains(name.as_str()) {
                errors.push(format!("entry {name}: missing"));
            }
        }
        errors.extend(manifest_finding(m));
    }

    for finding in &errors {
        warn!(archive = %path.display(), %finding);
    }
    info!(
        archive = %path.display(),
        entries = layout.entries.len(),
        findings = errors.len(),
        has_checksums,
        "verification finished"
    );
    Ok(VerificationStatus::new(has_checksums, errors, algorithm, layout.entries.len() as u64))
}

fn manifest_finding(m: &ChecksumManifest) -> Option<String> {
    (!m.root_matches()).then(|| "manifest: root digest mismatch".to_string())
}

fn check_entries(
    path: &Path,
    layout: &Layout,
    algorithm: Option<HashAlgorithm>,
    opts: &VerifyOptions,
) -> Result<Vec<EntryOutcome>> {
    let job = || -> Result<Vec<EntryOutcome>> {
        layout
            .entries
            .par_iter()
            .map_init(
                || File::open(path),
                |file, entry| match file {
                    Ok(f) => Ok(check_one(f, layout, entry, algorithm, opts)),
                    Err(e) => Err(Error::io(path, io::Error::new(e.kind(), e.to_string()))),
                },
            )
            .collect()
    };

    match opts.workers {
        0 => job(),
        1 => {
            let mut f = File::open(path).map_err(|e| Error::io(path, e))?;
            Ok(layout.entries.iter().map(|e| check_one(&mut f, layout, e, algorithm, opts)).collect())
        }
        n => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
            Ok(pool) => pool.install(job),
            Err(e) => {
                warn!(workers = n, error = %e, "worker pool unavailable; using global pool");
                job()
            }
        },
    }
}

fn check_one(
    f: &mut File,
    layout: &Layout,
    entry: &CentralEntry,
    algorithm: Option<HashAlgorithm>,
    opts: &VerifyOptions,
) -> EntryOutcome {
    if opts.cancelled() {
        return EntryOutcome { fault: None, digest: None };
    }
    let mut digester = algorithm.map(HashAlgorithm::digester);
    let progress = opts.progress.as_ref();
    let result = layout.check_entry(f, entry, &mut |chunk| {
        if let Some(d) = digester.as_mut() {
            d.update(chunk);
        }
        if let Some(p) = progress {
            p.add_bytes(chunk.len() as u64);
        }
    });
    if let Some(p) = progress {
        p.inc_entry();
    }
    match result {
        Ok(checked) => {
            debug!(entry = %entry.name, size = checked.size, crc32 = checked.crc32, "entry ok");
            EntryOutcome { fault: None, digest: digester.map(|d| d.finalize_hex()) }
        }
        Err(fault) => EntryOutcome { fault: Some(fault.to_string()), digest: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::build_zip;
    use crate::container::{field, CDFH_LEN};
    use std::collections::BTreeMap;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let p = dir.join(name);
        fs::write(&p, bytes).unwrap();
        p
    }

    fn manifest_for(pairs: &[(&str, &[u8])]) -> ChecksumManifest {
        let entries: BTreeMap<String, String> = pairs
            .iter()
            .map(|(n, d)| (n.to_string(), HashAlgorithm::Sha256.hex_digest(d)))
            .collect();
        ChecksumManifest::new(HashAlgorithm::Sha256, entries)
    }

    #[test]
    fn sound_archive_verifies_with_any_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let entries: Vec<(String, Vec<u8>)> =
            (0..12).map(|i| (format!("f{i:02}.txt"), vec![b'a' + i as u8; 100 * i + 1])).collect();
        let spec: Vec<(&str, &[u8], bool)> =
            entries.iter().map(|(n, d)| (n.as_str(), d.as_slice(), d.len() % 2 == 0)).collect();
        let p = write(dir.path(), "many.zip", &build_zip(&spec));
        for workers in [0, 1, 3] {
            let st = verify_archive_with(&p, &VerifyOptions::with_workers(workers)).unwrap();
            assert!(st.is_verified(), "{:?}", st.errors());
            assert_eq!(st.entries_checked(), 12);
            assert!(!st.has_checksums());
        }
    }

    #[test]
    fn findings_follow_container_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = build_zip(&[("a.txt", b"aaaa", false), ("b.txt", b"bbbb", false), ("c.txt", b"cccc", false)]);
        let layout = Layout::read(&mut io::Cursor::new(&bytes)).unwrap();
        for e in [&layout.entries[2], &layout.entries[0]] {
            let at = (e.lfh_offset + 30 + e.name_bytes.len() as u64) as usize;
            bytes[at] ^= 0xFF;
        }
        let p = write(dir.path(), "t.zip", &bytes);
        let st = verify_archive_with(&p, &VerifyOptions::with_workers(4)).unwrap();
        assert_eq!(st.errors().len(), 2);
        assert!(st.errors()[0].starts_with("entry a.txt: crc32 mismatch"));
        assert!(st.errors()[1].starts_with("entry c.txt: crc32 mismatch"));
    }

    #[test]
    fn digest_findings() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            dir.path(),
            "t.zip",
            &build_zip(&[("a.txt", b"alpha", true), ("b.txt", b"beta", false), ("dir/", b"", false)]),
        );
        let m = manifest_for(&[("a.txt", b"alpha"), ("b.txt", b"BETA"), ("c.txt", b"gamma")]);
        let st = verify_against(&p, &m, &VerifyOptions::default()).unwrap();
        assert!(st.has_checksums());
        assert_eq!(st.algorithm(), Some(HashAlgorithm::Sha256));
        let errs = st.errors();
        assert_eq!(errs.len(), 2, "{errs:?}");
        assert!(errs[0].starts_with("entry b.txt: mismatched (expected "));
        assert_eq!(errs[1], "entry c.txt: missing");

        let m = manifest_for(&[("a.txt", b"alpha")]);
        let st = verify_against(&p, &m, &VerifyOptions::default()).unwrap();
        assert_eq!(st.errors(), ["entry b.txt: unexpected (not in manifest)"]);
    }

    #[test]
    fn tampered_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "t.zip", &build_zip(&[("a.txt", b"alpha", false)]));
        let mut m = manifest_for(&[("a.txt", b"alpha")]);
        m.root_hex = "00".repeat(32);
        let st = verify_against(&p, &m, &VerifyOptions::default()).unwrap();
        assert_eq!(st.errors(), ["manifest: root digest mismatch"]);
    }

    /// Rewrite every central record of `bytes` to take its uncompressed size
    /// from a Zip64 extra field holding the matching value in `sizes`.
    fn claim_uncompressed_sizes(bytes: &[u8], sizes: &[u64]) -> Vec<u8> {
        let layout = Layout::read(&mut io::Cursor::new(bytes)).unwrap();
        let mut out = bytes[..layout.cd_offset as usize].to_vec();
        let cd_start = out.len();
        for (e, size) in layout.entries.iter().zip(sizes) {
            let at = e.cdfh_offset as usize;
            let mut hdr = bytes[at..at + CDFH_LEN].to_vec();
            let uncompressed = field::CDFH_UNCOMPRESSED as usize;
            hdr[uncompressed..uncompressed + 4].copy_from_slice(&u32::MAX.to_le_bytes());
            hdr[30..32].copy_from_slice(&12u16.to_le_bytes());
            out.extend_from_slice(&hdr);
            out.extend_from_slice(&e.name_bytes);
            out.extend_from_slice(&0x0001u16.to_le_bytes());
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        let cd_len = (out.len() - cd_start) as u32;
        let mut eocd = bytes[layout.eocd_offset as usize..].to_vec();
        let (size_at, off_at) = (field::EOCD_CD_SIZE as usize, field::EOCD_CD_OFFSET as usize);
        eocd[size_at..size_at + 4].copy_from_slice(&cd_len.to_le_bytes());
        eocd[off_at..off_at + 4].copy_from_slice(&(cd_start as u32).to_le_bytes());
        out.extend_from_slice(&eocd);
        out
    }

    #[test]
    fn huge_declared_sizes_are_findings_with_progress_attached() {
        let dir = tempfile::tempdir().unwrap();
        let base = build_zip(&[("a.txt", b"alpha", false), ("b.txt", b"beta", false)]);
        let p = write(dir.path(), "huge.zip", &claim_uncompressed_sizes(&base, &[u64::MAX, u64::MAX - 1]));

        let layout = Layout::read(&mut io::Cursor::new(fs::read(&p).unwrap())).unwrap();
        assert!(layout.entries.iter().all(|e| e.zip64));

        let progress = Progress::new(false);
        let opts = VerifyOptions { progress: Some(progress.clone()), ..VerifyOptions::default() };
        let st = verify_archive_with(&p, &opts).unwrap();
        assert_eq!(st.errors().len(), 2, "{:?}", st.errors());
        assert!(st.errors()[0].starts_with("entry a.txt: "));
        assert!(st.errors()[1].starts_with("entry b.txt: "));
        let (_, entries_total, _, bytes_total) = progress.snapshot();
        assert_eq!(entries_total, 2);
        assert_eq!(bytes_total, u64::MAX);
    }

    #[test]
    fn unreadable_paths_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(verify_archive(&dir.path().join("nope.zip")), Err(Error::Io { .. })));
        assert!(matches!(verify_archive(dir.path()), Err(Error::Io { .. })));
    }

    #[test]
    fn cancel_flag_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "t.zip", &build_zip(&[("a.txt", b"alpha", false)]));
        let opts = VerifyOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..VerifyOptions::default()
        };
        assert!(matches!(verify_archive_with(&p, &opts), Err(Error::Cancelled)));
    }

    #[test]
    fn progress_counts_entries_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "t.zip", &build_zip(&[("a.txt", b"alpha", false), ("b.txt", b"beta", true)]));
        let prog = Progress::new(false);
        let opts = VerifyOptions { progress: Some(prog.clone()), ..VerifyOptions::default() };
        verify_archive_with(&p, &opts).unwrap();
        assert_eq!(prog.snapshot(), (2, 2, 9, 9));
    }
}
