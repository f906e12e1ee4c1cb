//! CLI command implementations.

pub mod backup;
pub mod catalog;
pub mod conflicts;
pub mod import;
pub mod order;
pub mod sync;
pub mod watch;

use clap::Args;
use posy_core::{LocalStore, RecordId, StoreConfig, SystemClock, Timestamp};
use posy_storage::FileBackend;
use posy_sync_engine::{
    DirectoryRemote, DriveRemote, NoCredentials, OAuthProvider, ReconciliationEngine,
    RemoteSyncClient, SyncConfig, SyncStateStore, TokenStore, UreqClient, TOKEN_FILE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors in command-line input.
#[derive(Debug, Error)]
pub enum CliError {
    /// Both remote kinds were selected.
    #[error("choose either --remote-dir or --drive, not both")]
    ConflictingRemotes,

    /// `--drive` without a credential file.
    #[error("--drive needs --credentials <client-secrets.json>")]
    MissingCredentials,

    /// A restore was not confirmed.
    #[error("restore replaces all current data; re-run with --yes to confirm")]
    RestoreNotConfirmed,

    /// A malformed `key=value` attribute.
    #[error("invalid attribute '{0}', expected key=value")]
    InvalidAttribute(String),

    /// A malformed order line.
    #[error("invalid line '{0}', expected catalog_id:quantity:unit_price")]
    InvalidLine(String),
}

/// Remote selection flags.
#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    /// Sync with a snapshot kept in this directory (e.g. a mounted share)
    #[arg(global = true, long)]
    pub remote_dir: Option<PathBuf>,

    /// Sync with Google Drive
    #[arg(global = true, long)]
    pub drive: bool,

    /// OAuth client-secrets or authorized-user file for Google Drive
    #[arg(global = true, long)]
    pub credentials: Option<PathBuf>,

    /// Where to keep the OAuth token (default: <data-dir>/token.json)
    #[arg(global = true, long)]
    pub token: Option<PathBuf>,
}

/// An opened data directory plus the remote selected on the command line.
pub struct Context {
    /// The local store.
    pub local: LocalStore,
    remote: RemoteArgs,
}

impl Context {
    /// Opens (creating if needed) the data directory.
    pub fn open(data_dir: &Path, remote: RemoteArgs) -> Result<Self, Box<dyn std::error::Error>> {
        if remote.remote_dir.is_some() && remote.drive {
            return Err(CliError::ConflictingRemotes.into());
        }
        let local = LocalStore::open(StoreConfig::new(data_dir))?;
        Ok(Self { local, remote })
    }

    /// Sync configuration derived from the store configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new().with_retention(Some(self.local.config().retention))
    }

    /// Builds the reconciliation engine, with a remote if one was selected.
    pub fn engine(&self, config: SyncConfig) -> Result<ReconciliationEngine, Box<dyn std::error::Error>> {
        let sync_state = SyncStateStore::open(self.local.backend())?;
        let client = self.client(&config)?;
        let engine = ReconciliationEngine::new(
            Arc::clone(self.local.store()),
            Arc::clone(self.local.backups()),
            sync_state,
            config,
        );
        Ok(match client {
            Some(client) => engine.with_client(client),
            None => engine,
        })
    }

    fn client(&self, config: &SyncConfig) -> Result<Option<RemoteSyncClient>, Box<dyn std::error::Error>> {
        if let Some(dir) = &self.remote.remote_dir {
            let remote = DirectoryRemote::new(dir, &config.folder_name, &config.remote_file);
            return Ok(Some(RemoteSyncClient::new(
                Arc::new(remote),
                Arc::new(NoCredentials),
                config.retry.clone(),
            )));
        }
        if !self.remote.drive {
            return Ok(None);
        }

        let credentials = self
            .remote
            .credentials
            .clone()
            .ok_or(CliError::MissingCredentials)?;
        let token_path = self
            .remote
            .token
            .clone()
            .unwrap_or_else(|| self.local.dir().path().join(TOKEN_FILE));
        let tokens = token_store(&token_path)?;
        let provider = OAuthProvider::new(
            credentials,
            tokens,
            UreqClient::new(config.timeout),
            Arc::new(SystemClock),
        )
        .with_refresh_skew(config.refresh_skew);
        let remote = DriveRemote::new(
            UreqClient::new(config.timeout),
            &config.folder_name,
            &config.remote_file,
        );
        Ok(Some(RemoteSyncClient::new(
            Arc::new(remote),
            Arc::new(provider),
            config.retry.clone(),
        )))
    }
}

fn token_store(path: &Path) -> Result<TokenStore, Box<dyn std::error::Error>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(TOKEN_FILE);
    Ok(TokenStore::new(Arc::new(FileBackend::open(dir)?), name))
}

/// Parses a record id argument.
pub fn record_id(s: &str) -> Result<RecordId, Box<dyn std::error::Error>> {
    Ok(RecordId::new(s)?)
}

/// Formats a timestamp as UTC `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(t: Timestamp) -> String {
    let secs = t.as_millis() / 1000;
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        rem / 3600,
        (rem / 60) % 60,
        rem % 60
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
