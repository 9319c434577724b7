//! JSON-file cache of fetched papers and knowledge-base update statistics.
//!
//! The file is read once at startup and rewritten in full after each update.
//! Entries are never purged, only treated as stale once older than the TTL.
//! Two processes sharing one data directory will overwrite each other's
//! updates; only a single writer process is supported.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apis::Paper;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPaper {
    #[serde(flatten)]
    pub paper: Paper,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_papers: u64,
    #[serde(default)]
    pub categories: BTreeMap<String, u64>,
    #[serde(default)]
    pub papers: HashMap<String, CachedPaper>,
}

#[derive(Debug)]
pub struct KnowledgeCache {
    path: PathBuf,
    doc: CacheDocument,
}

impl KnowledgeCache {
    /// Read the cache file. A missing or unreadable file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let doc = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<CacheDocument>(&raw) {
                Ok(doc) => {
                    tracing::info!(papers = doc.papers.len(), path = %path.display(), "Loaded knowledge cache");
                    doc
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), "Failed to parse knowledge cache: {}", e);
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => {
                tracing::error!(path = %path.display(), "Failed to read knowledge cache: {}", e);
                CacheDocument::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            doc,
        }
    }

    /// Rewrite the whole file atomically (temp file in the same directory, then rename).
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).context("Failed to create cache directory")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).context("Failed to create temp cache file")?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), &self.doc)
            .context("Failed to serialize knowledge cache")?;
        tmp.as_file_mut().flush().context("Failed to flush knowledge cache")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// A cached copy younger than `ttl`, if any.
    pub fn fresh(&self, id: &str, ttl: Duration, now: DateTime<Utc>) -> Option<&Paper> {
        let entry = self.doc.papers.get(id)?;
        let age = now.signed_duration_since(entry.cached_at).to_std().unwrap_or_default();
        if age < ttl {
            Some(&entry.paper)
        } else {
            None
        }
    }

    /// Store or overwrite a paper. Records without an identifier are ignored.
    pub fn remember(&mut self, paper: &Paper, now: DateTime<Utc>) -> bool {
        let Some(id) = paper.key() else {
            return false;
        };
        self.doc.papers.insert(
            id.to_string(),
            CachedPaper {
                paper: paper.clone(),
                cached_at: now,
            },
        );
        true
    }

    pub fn record_category(&mut self, category: &str, count: u64) {
        self.doc.categories.insert(category.to_string(), count);
    }

    pub fn mark_updated(&mut self, now: DateTime<Utc>, total_papers: u64) {
        self.doc.last_updated = Some(now);
        self.doc.total_papers = total_papers;
    }

    pub fn document(&self) -> &CacheDocument {
        &self.doc
    }

    pub fn category_count(&self, category: &str) -> u64 {
        self.doc.categories.get(category).copied().unwrap_or(0)
    }
}
