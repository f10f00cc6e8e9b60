//! `ua` - release fingerprinting, CI gate and audit log tooling
//!
//! # Commands
//!
//! - `audit-fingerprint` - print a candidate's segment and composite hashes
//! - `gate` - fail CI when a candidate carries a REJECT-tier change
//! - `verify-log` - verify an audit log's signatures and chain
//! - `keygen` - write a new maintainer signing seed

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use ua_core::{gate, load_fingerprint, load_segments, PipelineConfig, Release, UpgradeError};
use ua_ledger::{parse_public_key, public_key_hex, verify_entries, JsonlFileStore, KeyProvider, LocalKeyProvider, LogStore};

/// Upgrade fingerprint and consent audit tooling
#[derive(Parser)]
#[command(name = "ua")]
#[command(about = "Upgrade fingerprint and consent audit tooling", long_about = None)]
struct Cli {
    /// Log filter (`RUST_LOG` syntax); `RUST_LOG` wins when set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Pipeline config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint of a candidate's segments as JSON.
    #[command(name = "audit-fingerprint")]
    AuditFingerprint {
        /// Segment directory or single segments file
        #[arg(long)]
        segments: PathBuf,

        /// Version label recorded in the fingerprint
        #[arg(long, default_value = "unversioned")]
        version: String,
    },

    /// Compare a candidate fingerprint with the baseline.
    ///
    /// Exits non-zero and prints the blocking categories to stderr when the
    /// candidate carries a REJECT-tier change.
    Gate {
        /// Candidate fingerprint JSON
        #[arg(long)]
        candidate: PathBuf,

        /// Baseline fingerprint JSON
        #[arg(long)]
        baseline: PathBuf,

        /// Candidate segments, for a structural diff
        #[arg(long, requires = "baseline_segments")]
        candidate_segments: Option<PathBuf>,

        /// Baseline segments, for a structural diff
        #[arg(long, requires = "candidate_segments")]
        baseline_segments: Option<PathBuf>,
    },

    /// Verify every signature and chain link of an audit log.
    #[command(name = "verify-log")]
    VerifyLog {
        /// Log file; defaults to the configured log path
        #[arg(long)]
        path: Option<PathBuf>,

        /// Maintainer public key (hex)
        #[arg(long)]
        public_key: String,
    },

    /// Generate a maintainer signing seed.
    Keygen {
        /// Seed file; defaults to the configured key path
        #[arg(long)]
        out: Option<PathBuf>,

        /// Overwrite an existing seed file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path).map_err(UpgradeError::from)?,
        None => PipelineConfig::new(),
    };
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("rendering output")?);
    Ok(())
}

fn audit_fingerprint(segments: &Path, version: &str) -> Result<ExitCode> {
    let raw = load_segments(segments).map_err(UpgradeError::from)?;
    let release = Release::prepare(version, &raw, chrono::Utc::now().timestamp()).map_err(UpgradeError::from)?;
    info!(version, composite = %release.composite(), "fingerprint computed");
    print_json(&release.fingerprint)?;
    Ok(ExitCode::SUCCESS)
}

fn run_gate(
    candidate: &Path,
    baseline: &Path,
    candidate_segments: Option<&Path>,
    baseline_segments: Option<&Path>,
) -> Result<ExitCode> {
    let candidate = load_fingerprint(candidate).map_err(UpgradeError::from)?;
    let baseline = load_fingerprint(baseline).map_err(UpgradeError::from)?;
    let raw = match (candidate_segments, baseline_segments) {
        (Some(c), Some(b)) => Some((
            load_segments(c).map_err(UpgradeError::from)?,
            load_segments(b).map_err(UpgradeError::from)?,
        )),
        _ => None,
    };

    let report = gate(&candidate, &baseline, raw.as_ref().map(|(c, b)| (c, b)))?;
    print_json(&report)?;
    if report.blocks() {
        eprintln!(
            "{} blocked: {}",
            report.version,
            ua_policy::labels(&report.rejecting()).join(", ")
        );
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}

fn verify_log(path: &Path, public_key: &str) -> Result<ExitCode> {
    let key = parse_public_key(public_key).map_err(UpgradeError::from)?;
    let entries = JsonlFileStore::new(path).read_all().map_err(UpgradeError::from)?;
    let report = verify_entries(&entries, &key).map_err(UpgradeError::from)?;
    info!(entries = report.entries, "audit log verified");
    print_json(&report)?;
    Ok(ExitCode::SUCCESS)
}

fn keygen(out: &Path, force: bool) -> Result<ExitCode> {
    if out.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", out.display());
    }
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let key = LocalKeyProvider::generate();
    key.write_seed_file(out).map_err(UpgradeError::from)?;
    println!("{}", public_key_hex(&key.verifying_key()));
    Ok(ExitCode::SUCCESS)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::AuditFingerprint { segments, version } => audit_fingerprint(&segments, &version),
        Commands::Gate {
            candidate,
            baseline,
            candidate_segments,
            baseline_segments,
        } => run_gate(
            &candidate,
            &baseline,
            candidate_segments.as_deref(),
            baseline_segments.as_deref(),
        ),
        Commands::VerifyLog { path, public_key } => {
            verify_log(path.as_deref().unwrap_or(config.log_path.as_path()), &public_key)
        }
        Commands::Keygen { out, force } => keygen(out.as_deref().unwrap_or(config.key_path.as_path()), force),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            let (body, code) = match err.downcast_ref::<UpgradeError>() {
                Some(e) => (e.to_json(), e.class().exit_code()),
                None => (
                    serde_json::json!({"error": "E_USAGE", "message": format!("{err:#}")}),
                    2,
                ),
            };
            eprintln!("{body}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
