//! authorized_keys reconciliation
//!
//! Merges a freshly fetched key set into the current contents of an
//! authorized_keys file. Lines that do not carry [`KEY_MARKER`] are never
//! touched. Managed lines whose key is still fetched are rewritten in place,
//! managed lines whose key disappeared are dropped, and keys that are not yet
//! in the file are appended in fetch order.
//!
//! The file is handled as bytes. Only the parts needed for matching have to
//! be valid text, so a comment in another encoding passes through unchanged.
//! A trailing `\r` is ignored when parsing a line but kept on lines that are
//! passed through.
//!
//! Fetched keys are matched by their whole raw line, while file lines are
//! matched by `<algorithm> <material>` only. A remote key that carries its own
//! comment therefore never matches an existing line and is appended again on
//! every cycle.

use std::collections::HashSet;

use crate::error::SyncError;

/// Annotation written after every key this tool manages
pub const KEY_MARKER: &str = "synced from github";

/// A credential line split into its identity and trailing annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLine<'a> {
    pub algorithm: &'a [u8],
    pub material: &'a [u8],
    pub annotation: Option<&'a [u8]>,
}

impl KeyLine<'_> {
    /// `<algorithm> <material>`, the part used to match keys
    pub fn identity(&self) -> Vec<u8> {
        let mut identity = Vec::with_capacity(self.algorithm.len() + self.material.len() + 1);
        identity.extend_from_slice(self.algorithm);
        identity.push(b' ');
        identity.extend_from_slice(self.material);
        identity
    }

    /// Whether this line was written by us
    pub fn is_managed(&self) -> bool {
        self.annotation == Some(KEY_MARKER.as_bytes())
    }
}

fn split_whitespace_once(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = bytes.iter().position(u8::is_ascii_whitespace)?;
    Some((&bytes[..at], &bytes[at + 1..]))
}

/// Split a line into at most three whitespace separated parts.
///
/// Returns `None` when the line has fewer than two parts.
pub fn split_line(line: &[u8]) -> Option<KeyLine<'_>> {
    let (algorithm, rest) = split_whitespace_once(line.trim_ascii_start())?;
    let rest = rest.trim_ascii_start();
    let (material, annotation) = match split_whitespace_once(rest) {
        Some((material, annotation)) => (material, Some(annotation)),
        None => (rest, None),
    };

    if algorithm.is_empty() || material.is_empty() {
        return None;
    }

    Some(KeyLine {
        algorithm,
        material,
        annotation,
    })
}

/// Format a key the way managed lines are written out
pub fn managed_line(key: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(key.len() + KEY_MARKER.len() + 1);
    line.extend_from_slice(key);
    line.push(b' ');
    line.extend_from_slice(KEY_MARKER.as_bytes());
    line
}

/// Result of reconciling a key set against a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// New file contents, one entry per line, without terminators
    pub lines: Vec<Vec<u8>>,
    /// Keys appended by this run, in fetch order
    pub added: Vec<String>,
    /// Managed keys dropped because they are no longer fetched
    pub removed: Vec<String>,
}

impl Reconciliation {
    /// File contents with every line newline terminated
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        out
    }
}

/// Fetched keys that have not been placed in the output yet
struct PendingKeys<'a> {
    order: Vec<&'a str>,
    fetched: HashSet<&'a [u8]>,
    remaining: HashSet<&'a [u8]>,
}

impl<'a> PendingKeys<'a> {
    fn new<S: AsRef<str>>(keys: &'a [S]) -> Self {
        let mut order = Vec::with_capacity(keys.len());
        let mut fetched = HashSet::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if fetched.insert(key.as_bytes()) {
                order.push(key);
            }
        }
        let remaining = fetched.clone();
        Self {
            order,
            fetched,
            remaining,
        }
    }

    /// Mark `key` as placed. Returns false if it was not pending.
    fn take(&mut self, key: &[u8]) -> bool {
        self.remaining.remove(key)
    }

    fn was_fetched(&self, key: &[u8]) -> bool {
        self.fetched.contains(key)
    }

    fn into_remaining(self) -> Vec<String> {
        let remaining = self.remaining;
        self.order
            .into_iter()
            .filter(|key| remaining.contains(key.as_bytes()))
            .map(str::to_string)
            .collect()
    }
}

/// Reconcile `new_keys` against the current file contents.
///
/// Fails with [`SyncError::MalformedLine`] (1-based) on the first line that
/// has fewer than two whitespace separated parts; no partial result is
/// returned in that case.
pub fn reconcile<S, C>(new_keys: &[S], current: &C) -> Result<Reconciliation, SyncError>
where
    S: AsRef<str>,
    C: AsRef<[u8]> + ?Sized,
{
    let mut pending = PendingKeys::new(new_keys);
    let mut result = Reconciliation::default();

    for (index, raw) in current.as_ref().split_inclusive(|&b| b == b'\n').enumerate() {
        let line = raw.strip_suffix(b"\n").unwrap_or(raw);
        let content = line.strip_suffix(b"\r").unwrap_or(line);
        let parsed = split_line(content).ok_or(SyncError::MalformedLine { line: index + 1 })?;
        let key = parsed.identity();

        if !parsed.is_managed() {
            // already present as a user line, don't add it a second time
            pending.take(&key);
            result.lines.push(line.to_vec());
            continue;
        }

        if pending.take(&key) {
            result.lines.push(managed_line(&key));
        } else if pending.was_fetched(&key) {
            tracing::debug!(
                key = %String::from_utf8_lossy(&key),
                line = index + 1,
                "dropping duplicate managed key"
            );
        } else {
            result.removed.push(String::from_utf8_lossy(&key).into_owned());
        }
    }

    result.added = pending.into_remaining();
    result
        .lines
        .extend(result.added.iter().map(|key| managed_line(key.as_bytes())));

    Ok(result)
}
