use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::io::Write;
use std::path::Path;
use std::process::Command;

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// Writes `files` both as loose sources under `src` and as a zip at `zip_path`.
fn build_fixture(src: &Path, zip_path: &Path, files: &[(&str, Vec<u8>)]) {
    let mut zw = zip::ZipWriter::new(std::fs::File::create(zip_path).unwrap());
    for (i, (name, data)) in files.iter().enumerate() {
        let method = if i % 2 == 0 {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        zw.start_file(*name, zip::write::FileOptions::default().compression_method(method))
            .unwrap();
        zw.write_all(data).unwrap();
        let p = src.join(name);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, data).unwrap();
    }
    zw.finish().unwrap();
}

fn fixture(td: &assert_fs::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let src = td.child("src");
    src.create_dir_all().unwrap();
    let zip_path = td.child("bundle.zip").path().to_path_buf();
    let text = b"plain text that deflates nicely ".repeat(40);
    build_fixture(
        src.path(),
        &zip_path,
        &[
            ("notes.txt", text),
            ("blob.bin", random_bytes(3000, 1)),
            ("nested/deep.txt", b"nested entry\n".to_vec()),
        ],
    );
    (src.path().to_path_buf(), zip_path)
}

fn arcv() -> Command {
    let mut cmd = Command::cargo_bin("arcv").unwrap();
    cmd.env_remove("ARCV_LOG");
    cmd
}

#[test]
fn verify_clean_archive_prints_verified_and_records_status() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);

    arcv()
        .arg("verify")
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("VERIFIED").and(predicate::str::contains("3 entries checked")));

    td.child("bundle.zip.arcv-status.json").assert(predicate::path::exists());
    arcv()
        .arg("status")
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains(": VERIFIED (checked "));
}

#[test]
fn never_verified_archive_is_unverified() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    arcv()
        .arg("status")
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::ends_with("bundle.zip: UNVERIFIED\n"));
}

#[test]
fn non_zip_fails_with_container_finding() {
    let td = assert_fs::TempDir::new().unwrap();
    let bad = td.child("test.zip");
    bad.write_binary(b"not a zip file").unwrap();

    arcv()
        .arg("verify")
        .arg(bad.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("container: "));

    arcv()
        .args(["status"])
        .arg(bad.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn missing_archive_is_an_error_not_a_failure() {
    let td = assert_fs::TempDir::new().unwrap();
    arcv()
        .arg("verify")
        .arg(td.child("absent.zip").path())
        .assert()
        .code(2)
        .stderr(predicate::str::starts_with("error: "));
}

#[test]
fn checksum_then_verify_detects_changed_source() {
    let td = assert_fs::TempDir::new().unwrap();
    let (src, zip_path) = fixture(&td);
    let records = td.child("records");

    arcv()
        .arg("--store-dir")
        .arg(records.path())
        .args(["checksum", "--algorithm", "blake3", "--source"])
        .arg(&src)
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 3 blake3 checksums"));

    arcv()
        .arg("--store-dir")
        .arg(records.path())
        .args(["verify", "--checksums", "--json"])
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_verified\": true"));

    // Rebuild the archive with one file changed; the stored manifest still
    // describes the old sources.
    let other = td.child("src2");
    other.create_dir_all().unwrap();
    build_fixture(
        other.path(),
        &zip_path,
        &[
            ("notes.txt", b"different text".to_vec()),
            ("blob.bin", random_bytes(3000, 1)),
            ("nested/deep.txt", b"nested entry\n".to_vec()),
        ],
    );
    arcv()
        .arg("--store-dir")
        .arg(records.path())
        .args(["verify", "--checksums"])
        .arg(&zip_path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("entry notes.txt: mismatched"));
}

#[test]
fn checksum_needs_a_source_or_from_archive() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    arcv().arg("checksum").arg(&zip_path).assert().failure();
    arcv()
        .args(["checksum", "--from-archive"])
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 3 sha256 checksums"));
    td.child("bundle.zip.arcv-checksums.json").assert(predicate::str::contains("arcv.checksums"));
}

#[test]
fn unknown_algorithm_is_rejected() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    arcv()
        .args(["checksum", "--from-archive", "--algorithm", "crc64"])
        .arg(&zip_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("crc64"));
}

#[test]
fn corrupt_is_deterministic_and_detected() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    let a = td.child("a.zip");
    let b = td.child("b.zip");

    for out in [&a, &b] {
        arcv()
            .args(["corrupt", "--kind", "payload-bytes", "--seed", "7", "--out"])
            .arg(out.path())
            .arg(&zip_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("payload-bytes").and(predicate::str::contains("seed 7")));
    }
    assert_eq!(std::fs::read(a.path()).unwrap(), std::fs::read(b.path()).unwrap());

    arcv()
        .args(["verify", "--no-record"])
        .arg(a.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("entry "));
    td.child("a.zip.arcv-status.json").assert(predicate::path::missing());

    arcv().arg("verify").arg(&zip_path).assert().success();
}

#[test]
fn corrupt_json_reports_the_spec() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    arcv()
        .args(["corrupt", "--kind", "truncation", "--seed", "3", "--json", "--out"])
        .arg(td.child("t.zip").path())
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"seed\": 3")
                .and(predicate::str::contains("\"expected_layer\": \"container-open\"")),
        );
}

#[test]
fn corrupt_refuses_to_overwrite_source() {
    let td = assert_fs::TempDir::new().unwrap();
    let (_, zip_path) = fixture(&td);
    let before = std::fs::read(&zip_path).unwrap();
    arcv()
        .args(["corrupt", "--kind", "zero-fill", "--out"])
        .arg(&zip_path)
        .arg(&zip_path)
        .assert()
        .code(2);
    assert_eq!(std::fs::read(&zip_path).unwrap(), before);
}

#[test]
fn record_then_forget() {
    let td = assert_fs::TempDir::new().unwrap();
    let (src, zip_path) = fixture(&td);

    arcv()
        .arg("record")
        .arg(&zip_path)
        .arg("--source")
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("VERIFIED"));
    td.child("bundle.zip.arcv-checksums.json").assert(predicate::path::exists());
    td.child("bundle.zip.arcv-status.json").assert(predicate::path::exists());

    arcv().arg("forget").arg(&zip_path).assert().success();
    td.child("bundle.zip.arcv-checksums.json").assert(predicate::path::missing());
    td.child("bundle.zip.arcv-status.json").assert(predicate::path::missing());
    arcv()
        .arg("status")
        .arg(&zip_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("UNVERIFIED"));
}

#[test]
fn config_can_disable_verify_on_create() {
    let td = assert_fs::TempDir::new().unwrap();
    let (src, zip_path) = fixture(&td);
    let cfg = td.child("arcv.json");
    cfg.write_str(r#"{ "algorithm": "sha512", "verify_on_create": false }"#).unwrap();

    arcv()
        .arg("--config")
        .arg(cfg.path())
        .arg("record")
        .arg(&zip_path)
        .arg("--source")
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded checksums"));
    td.child("bundle.zip.arcv-checksums.json").assert(predicate::str::contains("sha512"));
    td.child("bundle.zip.arcv-status.json").assert(predicate::path::missing());

    cfg.write_str(r#"{ "colour": "blue" }"#).unwrap();
    arcv()
        .arg("--config")
        .arg(cfg.path())
        .arg("status")
        .arg(&zip_path)
        .assert()
        .code(2);
}
