//! Token pair persistence
//!
//! The pair lives in one JSON file. Writes go to a sibling temp file that is
//! renamed over the target, so concurrent readers see the old pair or the new
//! one and never a partial write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::ClientError;
use crate::token::TokenPair;

/// On-disk home of the current [`TokenPair`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the pair. Absent and unreadable files both mean "no token".
    pub fn load(&self) -> Option<TokenPair> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str::<TokenPair>(&content) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unparseable token file");
                None
            }
        }
    }

    /// Replace the stored pair.
    pub fn save(&self, pair: &TokenPair) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ClientError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(pair)
            .map_err(|e| ClientError::Storage(format!("Failed to serialize token: {e}")))?;

        let tmp = self.tmp_path();
        write_private(&tmp, content.as_bytes())
            .map_err(|e| ClientError::Storage(format!("Failed to write token file: {e}")))?;

        fs::rename(&tmp, &self.path)
            .map_err(|e| ClientError::Storage(format!("Failed to replace token file: {e}")))?;

        debug!(path = %self.path.display(), expires_at = pair.expires_at, "Saved token");
        Ok(())
    }

    /// Delete the stored pair. Best effort: failures are logged, not returned.
    ///
    /// Returns `true` if a file was removed.
    pub fn delete(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted stored token");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to delete token file");
                false
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Write `bytes` to a freshly created file readable by the owner only.
///
/// A leftover file at `path` is removed first so the mode applies at creation
/// and the content is never readable under the default umask.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
