//! In-place authorized_keys rewrite
//!
//! The file is opened read-write without truncation, read whole, reconciled in
//! memory and only then overwritten from offset zero and truncated to the new
//! length. A failed read or reconcile never touches the file.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::SyncError;
use crate::reconcile::reconcile;

/// Whether an update may modify the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Write,
    /// Compute the changes but leave the file alone
    DryRun,
}

/// What an update changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// False for dry runs and for runs that produced identical contents
    pub written: bool,
}

impl UpdateOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reconcile `keys` into the authorized_keys file at `path`
pub fn update_authorized_keys<S: AsRef<str>>(
    path: &Path,
    keys: &[S],
    mode: WriteMode,
) -> Result<UpdateOutcome, SyncError> {
    let writable = mode == WriteMode::Write;
    let mut file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|e| SyncError::io("open", path, e))?;

    let mut current = Vec::new();
    file.read_to_end(&mut current)
        .map_err(|e| SyncError::io("read", path, e))?;

    let reconciliation = reconcile(keys, &current)?;
    let rendered = reconciliation.render();
    let mut outcome = UpdateOutcome {
        added: reconciliation.added,
        removed: reconciliation.removed,
        written: false,
    };

    if !writable {
        return Ok(outcome);
    }
    if rendered == current {
        debug!(path = %path.display(), "authorized keys already up to date");
        return Ok(outcome);
    }

    file.seek(SeekFrom::Start(0))
        .map_err(|e| SyncError::io("seek", path, e))?;
    file.write_all(&rendered)
        .map_err(|e| SyncError::io("write", path, e))?;
    file.set_len(rendered.len() as u64)
        .map_err(|e| SyncError::io("truncate", path, e))?;
    file.sync_all()
        .map_err(|e| SyncError::io("sync", path, e))?;

    debug!(path = %path.display(), bytes = rendered.len(), "authorized keys written");
    outcome.written = true;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use tempfile::tempdir;

    const MANAGED_A: &str = "ssh-rsa AAA synced from github\n";

    #[test]
    fn test_appends_and_removes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, format!("{}ssh-ed25519 USER me@host\n", MANAGED_A)).unwrap();

        let outcome = update_authorized_keys(&path, &["ssh-rsa BBB"], WriteMode::Write).unwrap();

        assert!(outcome.written);
        assert_eq!(outcome.added, vec!["ssh-rsa BBB"]);
        assert_eq!(outcome.removed, vec!["ssh-rsa AAA"]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ssh-ed25519 USER me@host\nssh-rsa BBB synced from github\n"
        );
    }

    #[test]
    fn test_non_utf8_comment_survives_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let latin1 = b"ssh-ed25519 USER caf\xe9@host\n";
        let mut original = latin1.to_vec();
        original.extend_from_slice(MANAGED_A.as_bytes());
        fs::write(&path, &original).unwrap();

        let outcome = update_authorized_keys(&path, &["ssh-rsa BBB"], WriteMode::Write).unwrap();

        assert!(outcome.written);
        assert_eq!(outcome.added, vec!["ssh-rsa BBB"]);
        assert_eq!(outcome.removed, vec!["ssh-rsa AAA"]);
        let mut expected = latin1.to_vec();
        expected.extend_from_slice(b"ssh-rsa BBB synced from github\n");
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn test_truncates_shorter_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let long = "ssh-rsa LONGLONGLONGLONGLONGLONGLONGLONGLONGLONG synced from github\n";
        fs::write(&path, format!("# keep\n{}", long)).unwrap();

        update_authorized_keys::<&str>(&path, &[], WriteMode::Write).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "# keep\n");
    }

    #[test]
    fn test_unchanged_file_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, MANAGED_A).unwrap();

        let outcome = update_authorized_keys(&path, &["ssh-rsa AAA"], WriteMode::Write).unwrap();

        assert!(!outcome.written);
        assert!(outcome.is_unchanged());
        assert_eq!(fs::read_to_string(&path).unwrap(), MANAGED_A);
    }

    #[test]
    fn test_malformed_file_left_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let original = format!("{}lonely-token\n", MANAGED_A);
        fs::write(&path, &original).unwrap();

        let err = update_authorized_keys(&path, &["ssh-rsa BBB"], WriteMode::Write).unwrap_err();

        assert!(matches!(err, SyncError::MalformedLine { line: 2 }));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist");

        let err = update_authorized_keys(&path, &["ssh-rsa AAA"], WriteMode::Write).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().starts_with("could not open authorized keys file"));
        assert!(!path.exists());
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, MANAGED_A).unwrap();

        let outcome = update_authorized_keys(&path, &["ssh-rsa BBB"], WriteMode::DryRun).unwrap();

        assert!(!outcome.written);
        assert_eq!(outcome.added, vec!["ssh-rsa BBB"]);
        assert_eq!(outcome.removed, vec!["ssh-rsa AAA"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), MANAGED_A);
    }
}
