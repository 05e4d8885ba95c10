//! Portvault CLI - encrypted backups of a Bitwarden vault.
//!
//! Drives the `bw` command-line tool to export a vault (attachments
//! included) into a single passphrase-encrypted file, and to decrypt or
//! restore such a file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use portvault_backup::{
    BackupOrchestrator, BackupSettings, DuplicatePolicy, RestoreReport, RestoreStatus,
};
use portvault_bw::{
    BwClient, CredentialChannel, ProcessRunner, SessionManager, DEFAULT_ATTACHMENT_DELAY_MS,
};
use portvault_common::{Passphrase, Session};
use portvault_crypto::KdfParams;

#[derive(Parser)]
#[command(name = "portvault")]
#[command(about = "Portvault - Encrypted Bitwarden vault backups")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the `bw` binary.
    #[arg(long, env = "PORTVAULT_BW", default_value = "bw", global = true)]
    bw: PathBuf,

    /// Delay between attachment downloads and uploads, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ATTACHMENT_DELAY_MS, global = true)]
    sleep_milliseconds: u64,

    /// Stay logged in to `bw` when done.
    #[arg(long, global = true)]
    no_logout: bool,

    /// Backup passphrase; prompted for when absent.
    #[arg(long, env = "PORTVAULT_PASSPHRASE", hide_env_values = true, global = true)]
    passphrase: Option<String>,

    /// Existing `bw` session token.
    #[arg(long = "session", env = "BW_SESSION", hide_env_values = true, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the vault into an encrypted backup file.
    Encrypt {
        /// Backup file to write (".portvault" is added when there is no extension).
        #[arg(short, long)]
        filename: PathBuf,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "interactive")]
        strength: String,
    },

    /// Decrypt a backup file.
    Decrypt {
        /// Backup file to read.
        #[arg(short, long)]
        filename: PathBuf,

        /// Write items, folders and attachments as plain files here.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Restore a backup file into the logged-in vault account.
    Restore {
        /// Backup file to read.
        #[arg(short, long)]
        filename: PathBuf,

        /// Items already in the vault: "create" duplicates or "skip" them.
        #[arg(short, long, value_parser = parse_policy)]
        duplicates: DuplicatePolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let supplied = take_passphrase(&mut cli)?;

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Encrypt { filename, strength } => {
            cmd_encrypt(&cli, supplied, filename, strength).await
        }

        Commands::Decrypt {
            filename,
            output_dir,
        } => cmd_decrypt(&cli, supplied, filename, output_dir.as_deref()).await,

        Commands::Restore {
            filename,
            duplicates,
        } => cmd_restore(&cli, supplied, filename, *duplicates).await,
    }
}

fn parse_policy(s: &str) -> std::result::Result<DuplicatePolicy, String> {
    s.parse().map_err(|e: portvault_common::Error| e.to_string())
}

/// Build the orchestrator for this invocation.
fn orchestrator(cli: &Cli, kdf_params: KdfParams) -> Result<BackupOrchestrator> {
    let runner = ProcessRunner::new(cli.bw.clone(), CredentialChannel::Inherit);
    let client = BwClient::new(Arc::new(runner));

    let env_session = match &cli.session {
        Some(token) => Some(Session::new(token.as_str()).context("Invalid BW_SESSION")?),
        None => None,
    };
    let sessions = SessionManager::new(client, env_session);

    let settings = BackupSettings::new()
        .with_attachment_delay_ms(cli.sleep_milliseconds)
        .with_no_logout(cli.no_logout)
        .with_kdf_params(kdf_params);
    Ok(BackupOrchestrator::new(sessions, settings))
}

/// Move a passphrase given on the command line or in the environment out of
/// the parsed arguments, so no plain copy outlives parsing.
fn take_passphrase(cli: &mut Cli) -> Result<Option<Passphrase>> {
    cli.passphrase
        .take()
        .map(Passphrase::new)
        .transpose()
        .context("Invalid passphrase")
}

/// Use the supplied passphrase or prompt for one securely.
fn passphrase(supplied: Option<Passphrase>, confirm: bool) -> Result<Passphrase> {
    if let Some(passphrase) = supplied {
        return Ok(passphrase);
    }

    let entered = Zeroizing::new(
        rpassword::prompt_password("Backup passphrase: ").context("Failed to read passphrase")?,
    );
    if confirm {
        let again = Zeroizing::new(
            rpassword::prompt_password("Confirm passphrase: ")
                .context("Failed to read passphrase")?,
        );
        if *entered != *again {
            anyhow::bail!("Passphrases do not match");
        }
    }
    Passphrase::new(entered.as_str()).context("Passphrase cannot be empty")
}

/// Export the vault into an encrypted backup.
async fn cmd_encrypt(
    cli: &Cli,
    supplied: Option<Passphrase>,
    filename: &Path,
    strength: &str,
) -> Result<()> {
    let kdf_params = KdfParams::from_strength(strength).ok_or_else(|| {
        anyhow::anyhow!("Invalid strength. Use: interactive, moderate, or sensitive")
    })?;
    let passphrase = passphrase(supplied, true)?;
    let mut orchestrator = orchestrator(cli, kdf_params)?;

    info!("Backing up vault to {}", filename.display());
    let path = orchestrator
        .backup(filename, &passphrase)
        .await
        .map_err(session_hint)
        .context("Backup failed")?;

    println!("Backup created successfully!");
    println!("  File: {}", path.display());
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", kdf_params.memory_cost);
    println!("    Time: {} iterations", kdf_params.time_cost);
    println!("    Parallelism: {}", kdf_params.parallelism);

    Ok(())
}

/// Decrypt a backup, optionally writing a plain export.
async fn cmd_decrypt(
    cli: &Cli,
    supplied: Option<Passphrase>,
    filename: &Path,
    output_dir: Option<&Path>,
) -> Result<()> {
    let passphrase = passphrase(supplied, false)?;
    let orchestrator = orchestrator(cli, KdfParams::default())?;

    let snapshot = match output_dir {
        Some(dir) => orchestrator
            .decrypt_to_dir(filename, &passphrase, dir)
            .await
            .context("Failed to decrypt backup")?,
        None => orchestrator
            .decrypt_only(filename, &passphrase)
            .await
            .context("Failed to decrypt backup")?,
    };

    println!("Backup Information:");
    println!("  File: {}", filename.display());
    println!("  Exported: {}", snapshot.exported_at);
    println!("  Items: {}", snapshot.items.len());
    println!("  Folders: {}", snapshot.folders.len());
    println!("  Attachments: {}", snapshot.attachments.len());
    if let Some(dir) = output_dir {
        println!("  Written to: {}", dir.display());
    }

    Ok(())
}

/// Restore a backup into the vault.
async fn cmd_restore(
    cli: &Cli,
    supplied: Option<Passphrase>,
    filename: &Path,
    duplicates: DuplicatePolicy,
) -> Result<()> {
    let passphrase = passphrase(supplied, false)?;
    let mut orchestrator = orchestrator(cli, KdfParams::default())?;

    info!("Restoring {} ({:?})", filename.display(), duplicates);
    let report = orchestrator
        .restore_from_file(filename, &passphrase, duplicates)
        .await
        .map_err(session_hint)
        .context("Restore failed")?;

    print_report(&report);
    if !report.is_complete() {
        anyhow::bail!("Restore finished with {} failures", report.failed());
    }
    Ok(())
}

/// Point the user at `bw` when no session could be obtained.
fn session_hint(err: portvault_common::Error) -> anyhow::Error {
    if err.is_session_failure() {
        anyhow::anyhow!("{} (check `bw status`, or pass a fresh BW_SESSION)", err)
    } else {
        err.into()
    }
}

fn print_report(report: &RestoreReport) {
    println!("Restore summary:");
    println!("  Created: {}", report.created());
    println!("  Skipped: {}", report.skipped());
    println!("  Failed: {}", report.failed());

    let skipped: Vec<_> = report
        .entries
        .iter()
        .filter(|e| matches!(e.status, RestoreStatus::Skipped { .. }))
        .collect();
    if !skipped.is_empty() {
        println!("\nSkipped:");
        for entry in skipped {
            println!("  [{}] {}: {}", entry.kind, entry.label, entry.status);
        }
    }

    if !report.is_complete() {
        println!("\nFailures:");
        for entry in report.failures() {
            println!("  [{}] {}: {}", entry.kind, entry.label, entry.status);
        }
    }
}
