//! Content-hash cache for uploaded audio
//!
//! Maps the SHA-256 of the raw upload to a transcript file and a suggestion
//! list on disk. Transcript files are write-once: once `<hash>.txt` exists it
//! is reused for every later upload of the same bytes.

use crate::transcription::Suggestion;
use anyhow::{Context, Result};
use axum::body::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of looking up an upload in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    /// Hex-encoded SHA-256 of the raw bytes
    pub hash: String,
    /// Whether a transcript already exists for this hash
    pub cached: bool,
    /// Where the transcript lives (or will live once transcribed)
    pub transcript_path: PathBuf,
}

pub struct ContentHashCache {
    transcripts_dir: PathBuf,
    suggestions_dir: PathBuf,
}

impl ContentHashCache {
    pub fn new(transcripts_dir: impl Into<PathBuf>, suggestions_dir: impl Into<PathBuf>) -> Self {
        Self {
            transcripts_dir: transcripts_dir.into(),
            suggestions_dir: suggestions_dir.into(),
        }
    }

    /// Stable fingerprint of the raw upload
    pub fn fingerprint(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    pub fn transcript_path(&self, hash: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{}.txt", hash))
    }

    pub fn suggestions_path(&self, hash: &str) -> PathBuf {
        self.suggestions_dir.join(format!("{}.json", hash))
    }

    /// Hash the upload and check whether its transcript is already materialized.
    ///
    /// Never invokes transcription; on a miss the caller schedules it.
    pub async fn resolve(&self, bytes: Bytes) -> Result<CacheLookup> {
        let hash = tokio::task::spawn_blocking(move || Self::fingerprint(&bytes))
            .await
            .context("Hashing task panicked")?;

        let transcript_path = self.transcript_path(&hash);
        let cached = tokio::fs::try_exists(&transcript_path)
            .await
            .with_context(|| format!("Failed to stat {}", transcript_path.display()))?;

        debug!("Cache lookup for {}: cached={}", hash, cached);

        Ok(CacheLookup {
            hash,
            cached,
            transcript_path,
        })
    }

    pub async fn read_transcript(&self, hash: &str) -> Result<String> {
        let path = self.transcript_path(hash);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read cached transcript {}", path.display()))
    }

    /// Materialize the transcript for `hash`.
    ///
    /// An existing file is left untouched and its path returned.
    pub async fn store_transcript(&self, hash: &str, transcript: &str) -> Result<PathBuf> {
        let path = self.transcript_path(hash);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("Transcript for {} already cached, keeping existing file", hash);
            return Ok(path);
        }

        write_atomically(&path, transcript.as_bytes()).await?;
        info!("Cached transcript for {} at {}", hash, path.display());
        Ok(path)
    }

    /// Suggestions cached for `hash`, or `None` when absent or empty
    pub async fn load_suggestions(&self, hash: &str) -> Result<Option<Vec<Suggestion>>> {
        let path = self.suggestions_path(hash);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let suggestions: Vec<Suggestion> = serde_json::from_slice(&raw)
            .with_context(|| format!("Corrupt suggestions file {}", path.display()))?;
        Ok((!suggestions.is_empty()).then_some(suggestions))
    }

    pub async fn store_suggestions(&self, hash: &str, suggestions: &[Suggestion]) -> Result<()> {
        let payload = serde_json::to_vec(suggestions)?;
        write_atomically(&self.suggestions_path(hash), &payload).await
    }

    /// Remove every cached transcript and suggestion list
    pub async fn clear(&self) -> Result<()> {
        for dir in [&self.transcripts_dir, &self.suggestions_dir] {
            clear_dir(dir).await?;
        }
        info!("Content-hash cache cleared");
        Ok(())
    }
}

/// Write to a sibling temp file and rename so readers never see a partial file
pub(crate) async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Delete every regular file in `dir`, keeping the directory itself
pub(crate) async fn clear_dir(dir: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path())
                .await
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}
