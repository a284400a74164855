//! Shipwright CLI
//!
//! Entry point for the `shipwright` command-line tool.

use clap::{Parser, Subcommand};
use shipwright::config::ReleaseConfig;
use shipwright::integrity;
use shipwright::pipeline::{BuiltRelease, Pipeline, PipelineError};
use shipwright::signal::{self, CancelFlag};
use shipwright::version::{self, VersionMode};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(about = "Reproducible build and release-signing pipeline", version)]
struct Cli {
    /// Path to config file (default: .shipwright.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Verbose progress on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, package, checksum and sign every configured target
    Build {
        /// Fail instead of synthesizing a version when no release tag exists
        #[arg(long)]
        strict: bool,
    },

    /// Publish the tagged release and promote the aliases
    Upload,

    /// Verify an archive against its checksum record and signature
    Verify {
        /// Archive to verify
        archive: PathBuf,
    },

    /// Print the version that a build would resolve
    Version {
        /// Fail instead of synthesizing a version when no release tag exists
        #[arg(long)]
        strict: bool,
    },

    /// Generate the release signing keypair at the configured paths
    Keygen {
        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = match ReleaseConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    config.verbose = cli.verbose;

    match cli.command {
        Commands::Build { strict } => run_build(config, strict),
        Commands::Upload => run_upload(config),
        Commands::Verify { archive } => run_verify(config, &archive),
        Commands::Version { strict } => run_version(config, strict),
        Commands::Keygen { force } => run_keygen(config, force),
    }
}

fn version_mode(strict: bool) -> VersionMode {
    if strict {
        VersionMode::Strict
    } else {
        VersionMode::Permissive
    }
}

fn install_cancel_handler() -> std::sync::Arc<CancelFlag> {
    let cancel = CancelFlag::new();
    if let Err(e) = signal::install(&cancel) {
        eprintln!("warning: could not install interrupt handler: {}", e);
    }
    cancel
}

/// Print every produced artifact's checksum for manual cross-verification
fn print_checksums(release: &BuiltRelease) {
    for artifact in &release.artifacts {
        println!("{}", artifact.checksum.to_line().trim_end());
    }
}

fn fail(error: PipelineError) -> ! {
    eprintln!("error: {}", error);
    process::exit(error.exit_code());
}

fn run_build(config: ReleaseConfig, strict: bool) {
    let cancel = install_cancel_handler();
    let pipeline = Pipeline::new(config, cancel);

    match pipeline.build(version_mode(strict)) {
        Ok(release) => {
            print_checksums(&release);
            eprintln!(
                "release {} ready in {}",
                release.version,
                release.output_dir.display()
            );
        }
        Err(e) => fail(e),
    }
}

fn run_upload(config: ReleaseConfig) {
    let host = config.remote.host.clone();
    let cancel = install_cancel_handler();
    let pipeline = Pipeline::new(config, cancel);

    match pipeline.upload() {
        Ok(release) => {
            print_checksums(&release);
            eprintln!("release {} published to {}", release.version, host);
        }
        Err(e) => fail(e),
    }
}

fn run_verify(config: ReleaseConfig, archive: &PathBuf) {
    let result = (|| -> Result<(), PipelineError> {
        let record = integrity::verify_checksum(archive)?;
        let public = integrity::load_verifying_key(&config.public_key_path())?;
        let sig_path = integrity::companion_path(archive, "sig");
        if !integrity::verify_archive(archive, &sig_path, &public)? {
            return Err(PipelineError::Integrity(
                integrity::IntegrityError::InvalidSignature(format!(
                    "signature does not verify for {}",
                    archive.display()
                )),
            ));
        }
        println!("{}", record.to_line().trim_end());
        println!("signature OK ({})", sig_path.display());
        Ok(())
    })();

    if let Err(e) = result {
        fail(e);
    }
}

fn run_version(config: ReleaseConfig, strict: bool) {
    let result = (|| -> Result<String, PipelineError> {
        let revision = version::resolve_revision(&config.repo)?;
        Ok(version::resolve_version(
            &config.repo,
            &revision,
            version_mode(strict),
        )?)
    })();

    match result {
        Ok(version) => println!("{}", version),
        Err(e) => fail(e),
    }
}

fn run_keygen(config: ReleaseConfig, force: bool) {
    let signing_path = config.signing_key_path();
    let public_path = config.public_key_path();

    if !force && (signing_path.exists() || public_path.exists()) {
        eprintln!(
            "error: refusing to overwrite existing keys at {} (use --force)",
            signing_path.display()
        );
        process::exit(1);
    }

    let key = integrity::generate_keypair();
    if let Err(e) = integrity::write_keypair(&key, &signing_path, &public_path) {
        fail(PipelineError::Integrity(e));
    }

    let public = key.verifying_key();
    println!("signing key: {}", signing_path.display());
    println!("public key:  {}", public_path.display());
    println!("public key ({}): {}", integrity::SIGNATURE_ALGORITHM, integrity::encode_verifying_key(&public));
    println!("fingerprint: {}", integrity::key_fingerprint(&public));
}
