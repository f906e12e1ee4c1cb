//! # Posy Sync Engine
//!
//! Keeps a Posy store in step with a remote copy.
//!
//! The remote holds one snapshot bundle. Each sync cycle takes a local
//! backup, pulls the remote snapshot if it changed, merges record by record
//! against the last synced state, commits the result locally in one step
//! and pushes it back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ReconciliationEngine           │
//! │  (state machine, merge, SyncState)       │
//! ├──────────────────────────────────────────┤
//! │            RemoteSyncClient              │
//! │  (retries, token refresh on 401)         │
//! ├─────────────────────┬────────────────────┤
//! │ CredentialProvider  │    RemoteStore     │
//! │ (OAuth, static)     │ (Drive, dir, mem)  │
//! ├─────────────────────┴────────────────────┤
//! │       HttpClient (ureq / scripted)       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Sync is optional
//!
//! Missing credentials, revoked tokens, outages and quota problems end the
//! cycle with a [`CycleOutcome`]; they never touch local data. Only local
//! storage failures are returned as errors.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod credentials;
mod engine;
mod error;
mod http;
mod merge;
pub mod remote;
mod state;
mod worker;

pub use client::{PulledSnapshot, RemoteSyncClient};
pub use config::{RetryConfig, SyncConfig, DEFAULT_FOLDER, DEFAULT_REMOTE_FILE};
pub use credentials::{
    AccessToken, CredentialProvider, NoCredentials, OAuthCredentials, OAuthProvider,
    StaticCredentials, StoredToken, TokenStore, GOOGLE_TOKEN_URI, TOKEN_FILE,
};
pub use engine::{
    CycleOutcome, CycleReport, CycleTrigger, EngineState, EngineStats, ReconciliationEngine,
    Resolution, SyncStatus,
};
pub use error::{SyncError, SyncResult};
pub use http::{
    form_encode, urlencode, HttpClient, HttpRequest, HttpResponse, Method, ScriptedClient,
    UreqClient,
};
pub use merge::{merge, MergeConflict, MergeOutcome};
pub use remote::{DirectoryRemote, DriveRemote, MemoryRemote, RemoteFault, RemoteMarker, RemoteStore};
pub use state::{SyncState, SyncStateStore, SYNC_STATE_FILE};
pub use worker::SyncWorker;
