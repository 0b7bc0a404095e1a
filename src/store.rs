//! File-backed snapshot store
//!
//! Each snapshot is one pretty-printed JSON file under
//! `<base>/cache/{inspector|profiler}/`, named by its token. Tokens sort
//! lexicographically in creation order, so listing is a directory read plus a
//! reverse sort.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::error::{InspectorError, Result};
use crate::snapshot::{Snapshot, StoredSnapshot};

/// Token that resolves to the most recent snapshot
pub const LATEST: &str = "latest";

/// Which cache directory the store lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Inspector,
    Profiler,
}

impl StoreKind {
    /// Directory relative to the base path
    pub fn cache_dir(&self) -> &'static str {
        match self {
            Self::Inspector => "cache/inspector",
            Self::Profiler => "cache/profiler",
        }
    }
}

/// Resolves the application base directory
pub trait BasePath: Send + Sync {
    fn base_path(&self) -> PathBuf;
}

/// Base path given explicitly (config, CLI flag, tests)
#[derive(Debug, Clone)]
pub struct FixedBasePath(pub PathBuf);

impl BasePath for FixedBasePath {
    fn base_path(&self) -> PathBuf {
        self.0.clone()
    }
}

/// Parent of the working directory, for apps started from their `public/` dir
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackBasePath;

impl BasePath for FallbackBasePath {
    fn base_path(&self) -> PathBuf {
        PathBuf::from("..")
    }
}

/// Time-derived snapshot identifier: `<unix seconds>_<1/10000 s ordinal>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(String);

impl Token {
    /// Token for the current wall-clock time
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::from_parts(now.timestamp(), now.timestamp_subsec_nanos())
    }

    /// Token for a point in time given as seconds plus nanoseconds
    pub fn from_parts(secs: i64, nanos: u32) -> Self {
        let ordinal = (nanos / 100_000).min(9_999);
        Self(format!("{}_{:04}", secs, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` is `<digits>_<4 digits>`, optionally followed by a
    /// `_<n>` disambiguation suffix
    pub fn is_well_formed(value: &str) -> bool {
        let mut parts = value.split('_');
        let secs = parts.next().unwrap_or_default();
        let ordinal = parts.next().unwrap_or_default();
        let suffix = parts.next();

        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        digits(secs)
            && ordinal.len() == 4
            && digits(ordinal)
            && suffix.map_or(true, digits)
            && parts.next().is_none()
    }

    /// Read a token back as fractional epoch seconds
    pub fn to_epoch_seconds(value: &str) -> Option<f64> {
        let mut parts = value.split('_');
        let secs = parts.next()?;
        let ordinal = parts.next()?;
        format!("{secs}.{ordinal}").parse().ok()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Suffix `_<n>` onto a token that already has a file instead of
    /// overwriting it
    pub unique_tokens: bool,
}

/// Snapshot persistence and lookup
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    options: StoreOptions,
    /// Directory listing, computed once per store instance
    listing: Mutex<Option<Vec<String>>>,
}

impl SnapshotStore {
    /// Open the store, creating its directory when missing
    pub fn open(base: &dyn BasePath, kind: StoreKind) -> Result<Self> {
        Self::with_options(base, kind, StoreOptions::default())
    }

    pub fn with_options(base: &dyn BasePath, kind: StoreKind, options: StoreOptions) -> Result<Self> {
        let dir = base.base_path().join(kind.cache_dir());
        ensure_storage_ready(&dir)?;

        Ok(Self {
            dir,
            options,
            listing: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot under a fresh token.
    ///
    /// The file is written to a temporary name in the same directory and
    /// renamed into place, so readers never see a partial snapshot.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<Token> {
        let token = Token::now();

        let mut file = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
            snapshot.serialize(&mut serializer)?;
            writer.flush()?;
        }

        let token = if self.options.unique_tokens {
            self.persist_unique(file, token)?
        } else {
            file.persist(self.dir.join(token.as_str()))
                .map_err(|e| e.error)?;
            token
        };

        tracing::debug!(token = %token, dir = %self.dir.display(), "Snapshot persisted");
        Ok(token)
    }

    fn persist_unique(&self, mut file: NamedTempFile, token: Token) -> Result<Token> {
        let mut candidate = token.0.clone();
        let mut attempt = 0u32;

        loop {
            match file.persist_noclobber(self.dir.join(&candidate)) {
                Ok(_) => return Ok(Token(candidate)),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    file = e.file;
                    attempt += 1;
                    // Zero-padded so suffixes keep sorting in write order
                    candidate = format!("{}_{:03}", token, attempt);
                }
                Err(e) => return Err(e.error.into()),
            }
        }
    }

    /// Stored tokens, newest first. Cached for the lifetime of the store.
    pub fn list_tokens(&self) -> Result<Vec<String>> {
        let mut listing = self
            .listing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(tokens) = listing.as_ref() {
            return Ok(tokens.clone());
        }

        let tokens = self.scan()?;
        *listing = Some(tokens.clone());
        Ok(tokens)
    }

    /// Drop the cached listing so the next call re-reads the directory
    pub fn refresh(&self) {
        *self
            .listing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn latest_token(&self) -> Result<Option<String>> {
        Ok(self.list_tokens()?.into_iter().next())
    }

    /// Load a snapshot by token, or the newest one for `latest`
    pub fn resolve(&self, token: &str) -> Result<StoredSnapshot> {
        let token = if token == LATEST {
            self.latest_token()?
                .ok_or_else(|| InspectorError::SnapshotNotFound(self.dir.join(LATEST)))?
        } else {
            token.to_string()
        };

        // Only the final path component is used
        let name = Path::new(&token)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = self.dir.join(&name);

        if name.is_empty() || !path.is_file() {
            return Err(InspectorError::SnapshotNotFound(path));
        }

        let data = fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&data).map_err(|source| {
            InspectorError::MalformedSnapshotFile {
                token: name.clone(),
                source,
            }
        })?;

        Ok(StoredSnapshot {
            snapshot,
            timestamp: name,
        })
    }

    /// The newest `last` snapshots, newest first; `0` loads everything.
    ///
    /// Files that fail to parse (or vanish between listing and reading) are
    /// logged and left out, so one bad file does not hide the rest.
    pub fn recent(&self, last: usize) -> Result<Vec<StoredSnapshot>> {
        let tokens = self.list_tokens()?;
        let take = if last == 0 { tokens.len() } else { last };

        let mut snapshots = Vec::with_capacity(take.min(tokens.len()));
        for token in tokens.iter().take(take) {
            match self.resolve(token) {
                Ok(stored) => snapshots.push(stored),
                Err(e @ InspectorError::MalformedSnapshotFile { .. })
                | Err(e @ InspectorError::SnapshotNotFound(_)) => {
                    tracing::warn!(token = %token, error = %e, "Skipping unreadable snapshot");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshots)
    }

    fn scan(&self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // Temporary files of in-flight writes
            if name.starts_with('.') {
                continue;
            }
            tokens.push(name);
        }

        tokens.sort_unstable_by(|a, b| b.cmp(a));
        Ok(tokens)
    }
}

/// Create the storage directory (and parents) if it does not exist.
///
/// A failed creation is only fatal when the directory is still missing
/// afterwards, since another process may have created it concurrently.
fn ensure_storage_ready(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }

    if let Err(source) = builder.create(dir) {
        if !dir.is_dir() {
            return Err(InspectorError::StorageDirectoryCreationFailed {
                path: dir.to_path_buf(),
                source,
            });
        }
    }

    tracing::info!(dir = %dir.display(), "Snapshot storage ready");
    Ok(())
}
