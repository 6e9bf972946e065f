//! Ghost CLI - Command-line interface for the Ghost Shell vault
//!
//! `split` encrypts a payload and shards its key across three devices;
//! `assemble` proves presence, recombines two attested shares and holds the
//! decrypted payload in ephemeral storage until the operator releases it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ghost_vault::{
    write_root_key, PresenceDetector, PresenceEvent, Vault, VaultConfig, VaultSession,
};

#[derive(Parser)]
#[command(name = "ghost")]
#[command(about = "Presence-gated 2-of-3 threshold vault", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $GHOST_CONFIG or the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate, reconstruct the key and decrypt the payload
    Assemble {
        /// Seconds to wait for the presence signal
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,

        /// Accept shares without verifying device attestation
        #[arg(long)]
        no_attestation: bool,
    },

    /// Encrypt a payload and split its key across three device directories
    Split {
        /// Payload file to protect
        #[arg(short, long)]
        payload: PathBuf,

        /// Directory receiving payload.enc and bat1..bat3
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Listen for the presence tone without touching any share
    Detect {
        /// Seconds to listen
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },

    /// Generate the root attestation key
    Keygen {
        /// Replace an existing key (invalidates every signed manifest)
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghost_vault=info,ghost_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(VaultConfig::default_path);
    let config = VaultConfig::load_or_create(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    match cli.command {
        Commands::Assemble {
            timeout,
            no_attestation,
        } => handle_assemble(config, Duration::from_secs(timeout), no_attestation).await,
        Commands::Split { payload, output } => handle_split(config, payload, output),
        Commands::Detect { timeout } => handle_detect(config, Duration::from_secs(timeout)).await,
        Commands::Keygen { force } => handle_keygen(config, force),
    }
}

async fn handle_assemble(mut config: VaultConfig, timeout: Duration, no_attestation: bool) -> Result<()> {
    if no_attestation {
        warn!("Device attestation disabled for this run");
        config.verify_attestation = false;
    }
    config.ensure_directories()?;

    let mut vault = Vault::from_config(config)?;
    println!("Waiting up to {}s for presence signal...", timeout.as_secs());

    // Presence detection and disk I/O block
    let session = tokio::task::spawn_blocking(move || vault.assemble(timeout))
        .await
        .context("assemble task panicked")??;

    println!("✓ Vault assembled");
    println!("  Plaintext: {}", session.plaintext_path().display());
    println!("  Size: {} bytes", session.plaintext_len());
    println!("  Key fingerprint: {}", session.key_fingerprint());
    println!("  Shares used: {:?}", session.shares_used());
    println!("\nPress Enter or Ctrl-C to wipe and exit.");

    hold(&session).await;
    session.wipe()?;
    println!("✓ Plaintext wiped");
    Ok(())
}

/// Block until the operator releases the session
async fn hold(session: &VaultSession) {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    // Detached so a pending read never holds up shutdown
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, wiping session {}", session.key_fingerprint());
        }
        _ = terminate() => {
            info!("Terminated, wiping session {}", session.key_fingerprint());
        }
        _ = rx => {
            info!("Released, wiping session {}", session.key_fingerprint());
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

fn handle_split(config: VaultConfig, payload: PathBuf, output: PathBuf) -> Result<()> {
    let vault = Vault::from_config(config)?;
    let report = vault
        .split(&payload, &output)
        .with_context(|| format!("splitting {}", payload.display()))?;

    println!("✓ Payload split successfully!");
    println!("  Encrypted payload: {}", report.payload_path.display());
    for dir in &report.device_dirs {
        println!("  Device: {}", dir.display());
    }
    println!("  Key fingerprint: {}", report.key_fingerprint);
    println!("  Payload SHA-256: {}", report.payload_hash);
    println!("\nCopy each bat* directory to its own device; any two unlock the payload.");
    Ok(())
}

async fn handle_detect(config: VaultConfig, timeout: Duration) -> Result<()> {
    let mut detector = PresenceDetector::from_config(&config.presence);
    println!(
        "Listening for {}s ({} backend)...",
        timeout.as_secs(),
        detector.backend_type()
    );

    let detected = tokio::task::spawn_blocking(move || {
        detector.detect_with(timeout, &mut |event| {
            if let PresenceEvent::ToneChunk {
                energy,
                frequency,
                consecutive,
            } = event
            {
                println!(
                    "  tone {:.0} Hz, energy {:.2e} ({} consecutive)",
                    frequency, energy, consecutive
                );
            }
        })
    })
    .await
    .context("detection task panicked")??;

    if !detected {
        anyhow::bail!("no presence signal within {}s", timeout.as_secs());
    }
    println!("✓ Presence detected");
    Ok(())
}

fn handle_keygen(config: VaultConfig, force: bool) -> Result<()> {
    let key = write_root_key(&config.root_key_path, force)?;
    println!("✓ Root attestation key written");
    println!("  Path: {}", config.root_key_path.display());
    println!("  Fingerprint: {}", key.fingerprint());
    Ok(())
}
