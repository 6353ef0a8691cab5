//! GitHub Key Sync Library
//!
//! Keeps the keys a user publishes on GitHub in an authorized_keys file,
//! without touching lines the user maintains by hand.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod reconcile;
pub mod scheduler;
pub mod sync;
pub mod updater;

pub use error::{ErrorKind, SyncError};
pub use fetcher::{GithubKeyFetcher, KeyFetcher};
pub use reconcile::{reconcile, Reconciliation, KEY_MARKER};
pub use sync::{KeySync, SyncReport};
pub use updater::{update_authorized_keys, UpdateOutcome, WriteMode};
