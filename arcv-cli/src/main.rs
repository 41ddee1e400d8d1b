use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use arcv_core::progress::Progress;
use arcv_core::{
    generate_checksums, generate_checksums_from_archive, inject, lifecycle, verify_archive_with,
    verify_checksums_with, Archive, CorruptionType, DisplayState, HashAlgorithm, IntegrityConfig,
    SidecarStore, VerifyOptions,
};

mod localize;
use localize::FluentLoc;

#[derive(Parser)]
#[command(name = "arcv", version, about = "Zip archive integrity verification and corruption testing")]
struct Cli {
    /// Keep sidecar records under this directory instead of next to each archive
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,
    /// JSON integrity config (algorithm, verify_on_create, workers)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "en-GB")]
    lang: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Check container structure, and stored checksums with --checksums
    Verify {
        archive: PathBuf,
        #[arg(long, default_value_t = false)]
        checksums: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
        #[arg(long, default_value_t = false)]
        progress: bool,
        #[arg(long)]
        workers: Option<usize>,
        /// Do not store the outcome as the archive's status
        #[arg(long, default_value_t = false)]
        no_record: bool,
    },
    /// Generate and store a checksum manifest
    Checksum {
        archive: PathBuf,
        /// Directory holding the files the archive was built from
        #[arg(long, conflicts_with = "from_archive", required_unless_present = "from_archive")]
        source: Option<PathBuf>,
        /// Derive checksums from the archive's own entries
        #[arg(long, default_value_t = false)]
        from_archive: bool,
        #[arg(long)]
        algorithm: Option<HashAlgorithm>,
    },
    /// Show the recorded verification state of archives
    Status { archives: Vec<PathBuf> },
    /// Write a copy of an archive with one deterministic fault injected
    Corrupt {
        archive: PathBuf,
        #[arg(long)]
        kind: CorruptionType,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Record a freshly created archive: checksums, then verification if enabled
    Record {
        archive: PathBuf,
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        algorithm: Option<HashAlgorithm>,
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Remove all sidecar records for an archive
    Forget { archive: PathBuf },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARCV_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let loc = FluentLoc::builtin(&cli.lang)?;
    let store = match &cli.store_dir {
        Some(dir) => SidecarStore::in_dir(dir),
        None => SidecarStore::adjacent(),
    };
    let cfg = match &cli.config {
        Some(p) => IntegrityConfig::load(p).with_context(|| format!("load {}", p.display()))?,
        None => IntegrityConfig::default(),
    };

    match cli.cmd {
        Cmd::Verify { archive, checksums, json, progress, workers, no_record } => {
            verify(&loc, &store, &cfg, &archive, checksums, json, progress, workers, no_record)
        }
        Cmd::Checksum { archive, source, from_archive: _, algorithm } => {
            checksum(&loc, &store, &archive, source.as_deref(), algorithm.unwrap_or(cfg.algorithm))
        }
        Cmd::Status { archives } => status(&loc, &store, &archives),
        Cmd::Corrupt { archive, kind, seed, out, json } => corrupt(&loc, &archive, kind, seed, &out, json),
        Cmd::Record { archive, source, algorithm, no_verify } => {
            let cfg = IntegrityConfig {
                algorithm: algorithm.unwrap_or(cfg.algorithm),
                verify_on_create: cfg.verify_on_create && !no_verify,
                ..cfg
            };
            record(&loc, &store, &cfg, &archive, &source)
        }
        Cmd::Forget { archive } => {
            lifecycle::forget(&store, &Archive::at(&archive))
                .with_context(|| format!("forget {}", archive.display()))?;
            println!("{}", loc.msg("forget-done", &[("archive", &archive.display().to_string())]));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logical name → path for every regular file under `root`, names relative
/// to `root` with `/` separators.
fn source_map(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let md = std::fs::metadata(root).with_context(|| format!("stat {}", root.display()))?;
    if !md.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let mut map = BTreeMap::new();
    for e in WalkDir::new(root).follow_links(false) {
        let e = e.with_context(|| format!("walk {}", root.display()))?;
        if !e.file_type().is_file() {
            continue;
        }
        let path = e.path();
        let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
        map.insert(rel.to_string_lossy().replace('\\', "/"), path.to_path_buf());
    }
    debug!(root = %root.display(), files = map.len(), "source files collected");
    Ok(map)
}

#[allow(clippy::too_many_arguments)]
fn verify(
    loc: &FluentLoc,
    store: &SidecarStore,
    cfg: &IntegrityConfig,
    archive: &Path,
    checksums: bool,
    json: bool,
    show_progress: bool,
    workers: Option<usize>,
    no_record: bool,
) -> Result<ExitCode> {
    let prog = Progress::new(show_progress);
    let opts = VerifyOptions {
        workers: workers.unwrap_or(cfg.workers),
        cancel: None,
        progress: Some(prog.clone()),
    };
    prog.start(Duration::from_secs(5));
    let outcome = if checksums {
        verify_checksums_with(store, archive, &opts)
    } else {
        verify_archive_with(archive, &opts)
    };
    prog.stop();
    let st = outcome.with_context(|| format!("verify {}", archive.display()))?;

    if !no_record {
        store.store_status(archive, &st).context("record verification status")?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
    } else {
        for e in st.errors() {
            eprintln!("  {e}");
        }
        if let Some(alg) = st.algorithm() {
            eprintln!("{}", loc.msg("verify-digest-note", &[("algorithm", alg.as_str())]));
        }
        println!(
            "{}",
            loc.msg(
                "verify-summary",
                &[
                    ("archive", &archive.display().to_string()),
                    ("state", &loc.state(st.display_state())),
                    ("entries", &st.entries_checked().to_string()),
                    ("findings", &st.errors().len().to_string()),
                ],
            )
        );
    }
    Ok(if st.is_verified() { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn checksum(
    loc: &FluentLoc,
    store: &SidecarStore,
    archive: &Path,
    source: Option<&Path>,
    algorithm: HashAlgorithm,
) -> Result<ExitCode> {
    let manifest = match source {
        Some(dir) => generate_checksums(&source_map(dir)?, algorithm)?,
        None => generate_checksums_from_archive(archive, algorithm)?,
    };
    store
        .store_checksums(archive, &manifest)
        .with_context(|| format!("store checksums for {}", archive.display()))?;
    println!(
        "{}",
        loc.msg(
            "checksum-written",
            &[
                ("count", &manifest.len().to_string()),
                ("algorithm", algorithm.as_str()),
                ("archive", &archive.display().to_string()),
            ],
        )
    );
    Ok(ExitCode::SUCCESS)
}

fn status(loc: &FluentLoc, store: &SidecarStore, archives: &[PathBuf]) -> Result<ExitCode> {
    let mut any_failed = false;
    for archive in archives {
        let st = store
            .load_status(archive)
            .with_context(|| format!("load status for {}", archive.display()))?;
        let state = DisplayState::from(st.as_ref());
        any_failed |= state == DisplayState::Failed;
        let name = archive.display().to_string();
        let line = match &st {
            Some(s) => loc.msg(
                "status-line-checked",
                &[("archive", &name), ("state", &loc.state(state)), ("when", &s.checked_at().to_rfc3339())],
            ),
            None => loc.msg("status-line", &[("archive", &name), ("state", &loc.state(state))]),
        };
        println!("{line}");
    }
    Ok(if any_failed { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

fn corrupt(
    loc: &FluentLoc,
    archive: &Path,
    kind: CorruptionType,
    seed: u64,
    out: &Path,
    json: bool,
) -> Result<ExitCode> {
    let res = inject(archive, out, kind, seed)
        .with_context(|| format!("corrupt {}", archive.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&res.spec)?);
    } else {
        eprintln!("{}", res.spec.description);
        println!(
            "{}",
            loc.msg(
                "corrupt-written",
                &[
                    ("dest", &res.path.display().to_string()),
                    ("kind", kind.label()),
                    ("offset", &res.spec.target_offset.to_string()),
                    ("seed", &seed.to_string()),
                    ("layer", res.spec.expected_layer.label()),
                ],
            )
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn record(
    loc: &FluentLoc,
    store: &SidecarStore,
    cfg: &IntegrityConfig,
    archive: &Path,
    source: &Path,
) -> Result<ExitCode> {
    let map = source_map(source)?;
    let arc = Archive::at(archive);
    let outcome = lifecycle::record_new_archive(store, &arc, &map, cfg)
        .with_context(|| format!("record {}", archive.display()))?;
    let name = archive.display().to_string();
    match outcome {
        None => {
            println!("{}", loc.msg("record-checksums", &[("archive", &name)]));
            Ok(ExitCode::SUCCESS)
        }
        Some(st) => {
            for e in st.errors() {
                eprintln!("  {e}");
            }
            println!(
                "{}",
                loc.msg("record-verified", &[("archive", &name), ("state", &loc.state(st.display_state()))])
            );
            Ok(if st.is_verified() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}
