//! Shared directory of user-submitted files.
//!
//! Resolution by recency assumes a single writer per in-flight turn: two
//! concurrent turns racing on "the newest file" may see each other's uploads.
//! Callers that know which file they mean pass it explicitly.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::error::AnalyticsError;

#[derive(Debug, Clone)]
pub struct UploadArea {
    root: PathBuf,
}

impl UploadArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Newest regular file by modification time.
    pub async fn latest(&self) -> std::io::Result<Option<PathBuf>> {
        Ok(self.latest_n(1, None).await?.into_iter().next())
    }

    /// Up to `n` regular files, newest first. Files with equal modification
    /// times are ordered by file name. `extensions` filters case-insensitively.
    pub async fn latest_n(
        &self,
        n: usize,
        extensions: Option<&[&str]>,
    ) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(allowed) = extensions {
                let ext = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .unwrap_or_default();
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
                    continue;
                }
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.file_name().cmp(&b.1.file_name())));
        files.truncate(n);
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    /// Explicit reference when given, otherwise the newest file. Explicit
    /// references are resolved inside the area and may not leave it.
    pub async fn resolve(&self, explicit: Option<&Path>) -> Result<PathBuf, AnalyticsError> {
        if let Some(path) = explicit {
            let candidate = self.confine(path).await?;
            debug!("Using explicit upload reference: {}", candidate.display());
            return Ok(candidate);
        }

        match self.latest().await {
            Ok(Some(path)) => {
                debug!("Resolved newest upload: {}", path.display());
                Ok(path)
            }
            Ok(None) => Err(AnalyticsError::NoUploadedFile(self.root.clone())),
            Err(e) => Err(AnalyticsError::DatasetParse(format!(
                "could not list {}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    /// Canonical path of `reference` joined onto the root. Absolute paths and
    /// `..` segments that land outside the canonical root are rejected.
    async fn confine(&self, reference: &Path) -> Result<PathBuf, AnalyticsError> {
        let root = match tokio::fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalyticsError::NoUploadedFile(self.root.clone()))
            }
            Err(e) => {
                return Err(AnalyticsError::DatasetParse(format!(
                    "could not open {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let joined = root.join(reference);
        let resolved = match tokio::fs::canonicalize(&joined).await {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A missing target is still rejected first when its lexical
                // form points outside the area.
                if !lexically_inside(&root, &joined) {
                    warn!("Rejected upload reference outside {}: {}", root.display(), reference.display());
                    return Err(AnalyticsError::OutsideUploadArea(reference.to_path_buf()));
                }
                return Err(AnalyticsError::DatasetParse(format!(
                    "could not open {}: {}",
                    reference.display(),
                    e
                )));
            }
            Err(e) => {
                return Err(AnalyticsError::DatasetParse(format!(
                    "could not open {}: {}",
                    reference.display(),
                    e
                )))
            }
        };

        if resolved == root || !resolved.starts_with(&root) {
            warn!("Rejected upload reference outside {}: {}", root.display(), reference.display());
            return Err(AnalyticsError::OutsideUploadArea(reference.to_path_buf()));
        }
        Ok(resolved)
    }
}

fn lexically_inside(root: &Path, path: &Path) -> bool {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return false;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root) && normalized != root
}
