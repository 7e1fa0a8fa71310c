use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Seen-set store errors.
///
/// A missing file is never an error; only a file that exists but cannot be
/// read, or an append that cannot be made durable, is reported.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file exists but could not be read or written.
    #[error("Seen-set store '{path}' unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The identifier cannot be stored in the one-per-line format.
    #[error("Identifier cannot be recorded (contains a line break): {0:?}")]
    InvalidIdentifier(String),
}

// ============================================================================
// SeenSet
// ============================================================================

/// In-memory set of identifiers already submitted.
///
/// Grows monotonically during a process lifetime; the only way to shrink it
/// is [`SeenStore::reset`] followed by a fresh [`SeenStore::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.ids.contains(identifier)
    }

    /// Returns true if the identifier was not already present.
    pub fn insert(&mut self, identifier: impl Into<String>) -> bool {
        self.ids.insert(identifier.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_superset(&self, other: &SeenSet) -> bool {
        self.ids.is_superset(&other.ids)
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// SeenStore
// ============================================================================

/// File-backed, append-only seen-set persistence.
///
/// Only the poll orchestrator writes through this type, so no locking is
/// performed. Each append is a complete line followed by an fsync.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every persisted identifier.
    ///
    /// - Missing file → empty set
    /// - Blank lines are skipped, trailing `\r` is stripped
    /// - Unreadable file → [`StoreError::Unavailable`]
    pub fn load(&self) -> Result<SeenSet, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No seen-set file, starting empty");
                return Ok(SeenSet::new());
            }
            Err(e) => return Err(self.unavailable(e)),
        };

        let set: SeenSet = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .collect();

        tracing::info!(path = %self.path.display(), entries = set.len(), "Loaded seen-set");
        Ok(set)
    }

    /// Durably append one identifier.
    ///
    /// The parent directory is created on first use. The write is synced to
    /// disk before returning so a successful return means the record survives
    /// a crash.
    pub fn record(&self, identifier: &str) -> Result<(), StoreError> {
        if identifier.contains('\n') || identifier.contains('\r') {
            return Err(StoreError::InvalidIdentifier(identifier.to_string()));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
            }
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.unavailable(e))?;

        // One write call per record keeps each line whole under O_APPEND
        let line = format!("{identifier}\n");
        file.write_all(line.as_bytes())
            .map_err(|e| self.unavailable(e))?;
        file.sync_all().map_err(|e| self.unavailable(e))?;

        tracing::trace!(path = %self.path.display(), entry = %identifier, "Recorded seen entry");
        Ok(())
    }

    /// Remove every persisted identifier. Clearing an absent store is a no-op.
    pub fn reset(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cleared seen-set");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn unavailable(&self, source: std::io::Error) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            source,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
