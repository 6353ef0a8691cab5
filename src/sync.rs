//! One fetch-then-reconcile cycle

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::fetcher::KeyFetcher;
use crate::updater::{update_authorized_keys, WriteMode};

/// Summary of a finished cycle
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub user: String,
    pub path: PathBuf,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub written: bool,
    pub dry_run: bool,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    /// Format the report for display
    pub fn display(&self) -> String {
        let mut out = format!(
            "Synced keys for {} into {}:\n  Added: {}\n  Removed: {}",
            self.user,
            self.path.display(),
            self.added.len(),
            self.removed.len()
        );
        for key in &self.added {
            out.push_str(&format!("\n  + {}", key));
        }
        for key in &self.removed {
            out.push_str(&format!("\n  - {}", key));
        }
        if self.dry_run {
            out.push_str("\n  (dry run, file not modified)");
        }
        out
    }
}

/// Keeps one authorized_keys file in sync with one user's keys
pub struct KeySync<F> {
    fetcher: F,
    user: String,
    path: PathBuf,
    mode: WriteMode,
}

impl<F: KeyFetcher> KeySync<F> {
    pub fn new(fetcher: F, user: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            user: user.into(),
            path: path.into(),
            mode: WriteMode::Write,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Fetch the user's keys and reconcile them into the file
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        debug!(user = %self.user, path = %self.path.display(), "Starting sync cycle");

        let keys = self.fetcher.fetch(&self.user).await?;
        if keys.is_empty() {
            warn!(user = %self.user, "Remote returned no keys, all managed keys will be removed");
        }

        // file I/O is blocking, keep it off the runtime threads
        let path = self.path.clone();
        let mode = self.mode;
        let outcome = tokio::task::spawn_blocking(move || update_authorized_keys(&path, &keys, mode))
            .await
            .map_err(|e| SyncError::io("update", &self.path, std::io::Error::other(e)))??;
        let dry_run = self.mode == WriteMode::DryRun;

        for key in &outcome.added {
            info!(key = %key, dry_run, "adding key");
        }
        for key in &outcome.removed {
            info!(key = %key, dry_run, "removing key");
        }
        if outcome.is_unchanged() {
            debug!(user = %self.user, "No key changes");
        }

        Ok(SyncReport {
            user: self.user.clone(),
            path: self.path.clone(),
            added: outcome.added,
            removed: outcome.removed,
            written: outcome.written,
            dry_run,
            synced_at: Utc::now(),
        })
    }
}
