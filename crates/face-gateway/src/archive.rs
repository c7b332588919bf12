use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Route the archive directory is served under
pub const ARCHIVE_ROUTE: &str = "/unknown_faces";

/// Directory of reported unknown-face captures
#[derive(Debug, Clone)]
pub struct UnknownFaceArchive {
    dir: PathBuf,
}

impl UnknownFaceArchive {
    /// Create the archive, making the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create unknown faces directory {}", dir.display()))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `unknown_<YYYYmmdd_HHMMSS>_<8 hex>.jpg`
    pub fn file_name(at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("unknown_{}_{}.jpg", at.format("%Y%m%d_%H%M%S"), &suffix[..8])
    }

    /// Path a client appends to the gateway URL to fetch an archived capture
    pub fn public_path(file: &Path) -> String {
        let name = file.file_name().unwrap_or_default().to_string_lossy();
        format!("{}/{}", ARCHIVE_ROUTE.trim_start_matches('/'), name)
    }

    /// Write the upload under a fresh name and return its path
    pub async fn store(&self, bytes: &[u8], at: DateTime<Utc>) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(at));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "unknown face archived");
        Ok(path)
    }

    /// Remove a capture whose database rows never made it
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned unknown face");
        }
    }
}
