//! On-disk cache for rendered documents
//!
//! Files live at `{root}/{type}_{id}_{token}.pdf` where `token` is the
//! entity's mutation timestamp. A write to the entity changes its token, so
//! stale files are simply never looked up again; `invalidate` sweeps every
//! token of an entity when another entity's write makes its artifacts stale.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::AppResult;

/// Lot label sheet, one label per packaging unit
pub const LOT_LABELS: &str = "lot_labels";
pub const LOT_QC_REPORT: &str = "lot_qc_report";
pub const SAMPLE_QC_REPORT: &str = "sample_qc_report";

const MAX_COMPONENT_LEN: usize = 80;
const HASHED_COMPONENT_LEN: usize = 32;
const TOKEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

/// Map a key component to `[A-Za-z0-9_-]`, hashing it when too long
pub fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = mapped.trim_matches('_');

    if cleaned.len() > MAX_COMPONENT_LEN {
        let digest = Sha256::digest(raw.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        return hex[..HASHED_COMPONENT_LEN].to_string();
    }
    if cleaned.is_empty() {
        return "unknown".to_string();
    }
    cleaned.to_string()
}

fn token(mutation_token: DateTime<Utc>) -> String {
    sanitize(&mutation_token.format(TOKEN_FORMAT).to_string())
}

fn prefix(entity_type: &str, entity_id: &str) -> String {
    format!("{}_{}_", sanitize(entity_type), sanitize(entity_id))
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the artifact for one `(type, id, token)` triple
    pub fn path_for(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutation_token: DateTime<Utc>,
    ) -> PathBuf {
        self.root.join(format!(
            "{}{}.pdf",
            prefix(entity_type, entity_id),
            token(mutation_token)
        ))
    }

    /// Cached bytes, if an artifact exists for exactly this token
    pub async fn get(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutation_token: DateTime<Utc>,
    ) -> AppResult<Option<Vec<u8>>> {
        let path = self.path_for(entity_type, entity_id, mutation_token);
        match fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "Artifact cache hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Artifact cache miss");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store bytes under the derived key
    ///
    /// The content is written to a unique temp file in the cache root and
    /// renamed into place, so readers never observe a partial file.
    pub async fn put(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutation_token: DateTime<Utc>,
        bytes: &[u8],
    ) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(entity_type, entity_id, mutation_token);
        let temp = self
            .root
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        fs::write(&temp, bytes).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), size = bytes.len(), "Artifact stored");
        Ok(path)
    }

    /// Delete every artifact of an entity regardless of token
    ///
    /// Returns the number of files removed. A file that cannot be removed is
    /// logged and skipped.
    pub async fn invalidate(&self, entity_type: &str, entity_id: &str) -> AppResult<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let prefix = prefix(entity_type, entity_id);
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || !name.ends_with(".pdf") {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(file = name, error = %e, "Could not remove cached artifact")
                }
            }
        }

        if removed > 0 {
            tracing::debug!(entity_type, entity_id, removed, "Artifacts invalidated");
        }
        Ok(removed)
    }

    /// Cached bytes, rendering and storing them on a miss
    pub async fn get_or_render<F, Fut>(
        &self,
        entity_type: &str,
        entity_id: &str,
        mutation_token: DateTime<Utc>,
        render: F,
    ) -> AppResult<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Vec<u8>>>,
    {
        if let Some(bytes) = self.get(entity_type, entity_id, mutation_token).await? {
            return Ok(bytes);
        }
        let bytes = render().await?;
        self.put(entity_type, entity_id, mutation_token, &bytes)
            .await?;
        Ok(bytes)
    }
}
