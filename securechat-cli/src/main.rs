//! SecureChat CLI
//!
//! Key generation and encrypted backups of the local message store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use securechat_core::backup::{BackupCodec, BackupService, BackupStage, FsBlobStorage};
use securechat_core::crypto::IdentityKeyPair;
use securechat_core::models::input::{BackupRequest, RestoreRequest};
use securechat_core::store::{shared, LocalStore, MemoryStore, SqliteStore};
use securechat_core::{logging, BackupError, ChatContext, Config};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "securechat")]
#[command(version, about = "End-to-end encrypted chat: keys and backups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database with the local message history
    #[arg(long, global = true, env = "SECURECHAT_DB_PATH")]
    db: Option<PathBuf>,

    /// Directory holding backup files
    #[arg(long, global = true, env = "SECURECHAT_BACKUP_DIR")]
    backup_dir: Option<PathBuf>,

    /// Seconds before a backup upload/download is abandoned
    #[arg(long, global = true, env = "SECURECHAT_STORAGE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Write daily log files into this directory
    #[arg(long, global = true, env = "SECURECHAT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity key pair and print its public half
    Keygen,

    /// Create, list and restore encrypted backups
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Show what the local store holds
    Stats,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Encrypt the whole local store and save it as a backup file
    Create {
        /// Account the backup belongs to
        #[arg(long)]
        user: String,

        /// Backup password
        #[arg(long, env = "SECURECHAT_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// List backup files, newest first
    List,

    /// Decrypt a backup file and merge it into the local store
    Restore {
        /// Backup file id as shown by `backup list`
        file_id: String,

        /// Account restoring the backup
        #[arg(long)]
        user: String,

        /// Backup password
        #[arg(long, env = "SECURECHAT_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

struct Settings {
    db_path: PathBuf,
    backup_dir: PathBuf,
    storage_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads .env as well, so clap's env fallbacks see it
    let config = Config::from_env().context("invalid environment configuration")?;
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    let _log_guard = logging::init(&config.log_filter, log_dir.as_deref());

    let settings = Settings {
        db_path: cli.db.unwrap_or(config.db_path),
        backup_dir: cli.backup_dir.unwrap_or(config.backup_dir),
        storage_timeout: cli
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(config.storage_timeout),
    };

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::Backup(command) => backup(command, &settings).await,
        Commands::Stats => stats(&settings),
    }
}

fn keygen() -> Result<()> {
    let identity = IdentityKeyPair::generate().context("failed to generate identity key")?;
    println!("Public key:  {}", identity.export_public());
    println!("Fingerprint: {}", identity.fingerprint());
    Ok(())
}

async fn backup(command: BackupCommands, settings: &Settings) -> Result<()> {
    let storage = Arc::new(FsBlobStorage::new(&settings.backup_dir));

    match command {
        BackupCommands::Create { user, password } => {
            let context = open_context(&user, settings)?;
            let (tx, progress) = watch_progress();
            let file = context
                .backups(storage)
                .with_timeout(settings.storage_timeout)
                .with_progress(tx)
                .create_backup(BackupRequest {
                    user_id: user,
                    password,
                })
                .await
                .map_err(explain)?;
            let _ = progress.await;

            println!("Backup saved: {} ({} bytes)", file.name, file.size);
        }
        BackupCommands::List => {
            // Listing never touches history
            let store = shared(MemoryStore::new());
            let service = BackupService::new(store, storage, BackupCodec::new())
                .with_timeout(settings.storage_timeout);
            let files = service.list_backups().await.map_err(explain)?;

            if files.is_empty() {
                println!("No backups in {}", settings.backup_dir.display());
            }
            for file in files {
                let created = DateTime::from_timestamp_millis(file.created_at)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!("{}  {:>10} bytes  {}", file.id, file.size, created);
            }
        }
        BackupCommands::Restore {
            file_id,
            user,
            password,
        } => {
            let context = open_context(&user, settings)?;
            let (tx, progress) = watch_progress();
            let summary = context
                .backups(storage)
                .with_timeout(settings.storage_timeout)
                .with_progress(tx)
                .restore_backup(RestoreRequest {
                    user_id: user,
                    password,
                    file_id,
                })
                .await
                .map_err(explain)?;
            let _ = progress.await;

            println!(
                "Restored {} messages in {} conversations and {} contacts",
                summary.message_count, summary.conversation_count, summary.contact_count
            );
        }
    }

    Ok(())
}

fn stats(settings: &Settings) -> Result<()> {
    let store = SqliteStore::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;

    let conversations = store.list_keys()?;
    let mut messages = 0;
    for conversation_id in &conversations {
        messages += store.get(conversation_id)?.len();
    }
    let contacts = store.contacts()?.len();

    let report = json!({
        "database": settings.db_path.display().to_string(),
        "conversations": conversations.len(),
        "messages": messages,
        "contacts": contacts,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_context(user: &str, settings: &Settings) -> Result<ChatContext<SqliteStore>> {
    let store = SqliteStore::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    Ok(ChatContext::new(user, shared(store)))
}

/// Print stages as they happen; the task ends when the service is dropped.
fn watch_progress() -> (
    mpsc::UnboundedSender<BackupStage>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(stage) = rx.recv().await {
            debug!(?stage, "Backup progress");
            eprintln!("{}", stage_label(stage));
        }
    });
    (tx, handle)
}

fn stage_label(stage: BackupStage) -> &'static str {
    match stage {
        BackupStage::Exporting => "Exporting local messages...",
        BackupStage::Encrypting => "Encrypting (this takes a moment)...",
        BackupStage::Uploading => "Saving backup file...",
        BackupStage::Downloading => "Reading backup file...",
        BackupStage::Decrypting => "Decrypting...",
        BackupStage::Restoring => "Writing messages to the local store...",
        BackupStage::Done => "Done.",
    }
}

fn explain(err: BackupError) -> anyhow::Error {
    let hint = match &err {
        BackupError::InvalidPassword => Some("check the password; the file may also be damaged"),
        BackupError::UnsupportedBackupVersion(_) => Some("this backup was made by a newer version"),
        BackupError::Timeout(_) => Some("raise --timeout-secs and try again"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow!("{} ({})", err, hint),
        None => anyhow::Error::new(err),
    }
}
