//! End-to-end pipeline coverage without a container engine: archives are
//! produced by the real packager from staged build output, then
//! checksummed, signed, revalidated and published through a mock remote.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use shipwright::config::ReleaseConfig;
use shipwright::container::BuildOutput;
use shipwright::integrity;
use shipwright::manifest::{ReleaseEntry, ReleaseManifest};
use shipwright::package::Packager;
use shipwright::pipeline::{Pipeline, PipelineError};
use shipwright::publish::MockRemote;
use shipwright::signal::CancelFlag;
use shipwright::version::resolve_revision;

const VERSION: &str = "2.1.0";
const TARGETS: [&str; 2] = ["t1", "t2"];

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.org")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.org")
        .env("GIT_AUTHOR_DATE", "2024-03-01T12:00:00+00:00")
        .env("GIT_COMMITTER_DATE", "2024-03-01T12:00:00+00:00")
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn tagged_repo(dir: &Path) -> PathBuf {
    let repo = dir.join("repo");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet"]);
    fs::write(repo.join("main.rs"), "fn main() {}\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "initial"]);
    git(&repo, &["tag", &format!("v{}", VERSION)]);
    repo
}

fn pipeline_config(dir: &Path, repo: PathBuf) -> ReleaseConfig {
    let mut config = ReleaseConfig::default();
    config.product = "product".to_string();
    config.targets = TARGETS.iter().map(|t| t.to_string()).collect();
    config.repo = repo;
    config.output_root = dir.join("artifacts");
    config.signing_key = dir.join("keys/release.key").to_string_lossy().into_owned();
    config.public_key = dir.join("keys/release.pub").to_string_lossy().into_owned();
    config
}

/// Stage a complete local release the way `build` would leave it, using
/// the real packager and integrity steps over fabricated build output
fn stage_release(config: &ReleaseConfig) -> PathBuf {
    let key = integrity::generate_keypair();
    integrity::write_keypair(
        &key,
        &config.signing_key_path(),
        &config.public_key_path(),
    )
    .unwrap();

    let revision = resolve_revision(&config.repo).unwrap();
    let out_dir = config.output_root.join(VERSION);
    let stage_dir = out_dir.join("build");

    let packager = Packager::new(&config.product, VERSION, revision.commit_time);
    let mut manifest = ReleaseManifest::new(&config.product, VERSION, &revision);

    for target in TARGETS {
        let root = stage_dir.join(target);
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/app"), format!("binary for {}", target)).unwrap();

        let output = BuildOutput {
            target: target.to_string(),
            root,
        };
        let archive = packager.package(&output, &out_dir).unwrap();
        let (record, _) = integrity::write_checksum(&archive).unwrap();
        let signature = integrity::sign_archive(&archive, &key).unwrap();

        manifest.push(ReleaseEntry {
            target: target.to_string(),
            artifact: record.file_name.clone(),
            sha256: record.sha256,
            signature: signature
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
        });
    }

    manifest.write_to_dir(&out_dir).unwrap();
    out_dir
}

#[cfg(unix)]
#[test]
fn upload_publishes_versioned_layout_and_aliases() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = pipeline_config(dir.path(), tagged_repo(dir.path()));
    let out_dir = stage_release(&config);

    let remote = MockRemote::new(dir.path().join("store"));
    let pipeline = Pipeline::new(config, CancelFlag::new());
    let release = pipeline.upload_to(&remote).unwrap();

    assert_eq!(release.version, VERSION);
    assert_eq!(release.artifacts.len(), TARGETS.len());

    let store = remote.root();
    for target in TARGETS {
        let archive = format!("product-{}-{}.tar.xz", VERSION, target);

        // Versioned files
        let versioned = store.join(VERSION).join(&archive);
        assert!(versioned.is_file());
        assert!(store
            .join(VERSION)
            .join(format!("{}.sha256", archive))
            .is_file());
        assert!(store.join(VERSION).join(format!("{}.sig", archive)).is_file());

        // The per-target alias resolves to the exact versioned bytes
        let alias = store.join(format!("product-{}.tar.xz", target));
        assert_eq!(fs::read(&alias).unwrap(), fs::read(&versioned).unwrap());
    }

    // latest resolves to the versioned directory
    assert_eq!(
        fs::read_link(store.join("latest")).unwrap(),
        Path::new(VERSION)
    );
    assert!(store.join("latest/release.json").is_file());

    // Published checksums match a digest recomputed locally
    for artifact in &release.artifacts {
        let recomputed = integrity::checksum(&artifact.archive).unwrap();
        assert_eq!(recomputed, artifact.checksum);
    }

    // And the locally staged release is untouched
    assert!(out_dir.join("release.json").is_file());
}

#[cfg(unix)]
#[test]
fn failed_upload_leaves_previous_latest() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = pipeline_config(dir.path(), tagged_repo(dir.path()));
    stage_release(&config);

    // Seed a previous release as the current head
    let store = dir.path().join("store");
    fs::create_dir_all(store.join("2.0.0")).unwrap();
    {
        use shipwright::publish::Remote;
        let seed = MockRemote::new(store.clone());
        seed.symlink_atomic("2.0.0", "latest").unwrap();
    }

    let remote = MockRemote::failing_after(store.clone(), 3);
    let pipeline = Pipeline::new(config, CancelFlag::new());
    let result = pipeline.upload_to(&remote);

    assert!(matches!(result, Err(PipelineError::Publish(_))));
    assert_eq!(
        fs::read_link(store.join("latest")).unwrap(),
        Path::new("2.0.0")
    );
    // No alias points at the partial upload
    assert!(store
        .join("product-t1.tar.xz")
        .symlink_metadata()
        .is_err());
}

#[test]
fn tampered_local_release_is_never_published() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = pipeline_config(dir.path(), tagged_repo(dir.path()));
    let out_dir = stage_release(&config);

    // Corrupt one staged archive after signing
    let archive = out_dir.join(format!("product-{}-t2.tar.xz", VERSION));
    let mut bytes = fs::read(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&archive, &bytes).unwrap();

    let remote = MockRemote::new(dir.path().join("store"));
    let pipeline = Pipeline::new(config, CancelFlag::new());
    let result = pipeline.upload_to(&remote);

    assert!(matches!(result, Err(PipelineError::Integrity(_))));
    assert_eq!(remote.upload_count(), 0);
}

#[test]
fn staged_release_is_reproducible() {
    let dir_a = tempfile::TempDir::new().unwrap();
    let dir_b = tempfile::TempDir::new().unwrap();

    // Two independent stagings of the same inputs; the repos carry the
    // same pinned commit date, so the packaged bytes must agree
    let config_a = pipeline_config(dir_a.path(), tagged_repo(dir_a.path()));
    let config_b = pipeline_config(dir_b.path(), tagged_repo(dir_b.path()));
    let out_a = stage_release(&config_a);
    let out_b = stage_release(&config_b);

    for target in TARGETS {
        let name = format!("product-{}-{}.tar.xz", VERSION, target);
        assert_eq!(
            fs::read(out_a.join(&name)).unwrap(),
            fs::read(out_b.join(&name)).unwrap(),
            "archive bytes differ for {}",
            target
        );
        // Identical bytes, identical checksum records
        assert_eq!(
            fs::read_to_string(out_a.join(format!("{}.sha256", name))).unwrap(),
            fs::read_to_string(out_b.join(format!("{}.sha256", name))).unwrap()
        );
    }
}

#[test]
fn signatures_verify_against_public_key() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = pipeline_config(dir.path(), tagged_repo(dir.path()));
    let out_dir = stage_release(&config);

    let public = integrity::load_verifying_key(&config.public_key_path()).unwrap();
    for target in TARGETS {
        let archive = out_dir.join(format!("product-{}-{}.tar.xz", VERSION, target));
        let sig = integrity::companion_path(&archive, "sig");
        assert!(integrity::verify_archive(&archive, &sig, &public).unwrap());
    }
}

#[test]
fn cancelled_pipeline_stops_before_publishing() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = pipeline_config(dir.path(), tagged_repo(dir.path()));
    stage_release(&config);

    let cancel: Arc<CancelFlag> = CancelFlag::new();
    cancel.handle_signal();

    let remote = MockRemote::new(dir.path().join("store"));
    let pipeline = Pipeline::new(config, cancel);
    let result = pipeline.upload_to(&remote);

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(remote.upload_count(), 0);
}
