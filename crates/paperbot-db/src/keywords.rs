//! Keyword subscription file.
//!
//! Tracked keywords are stored in the cache folder next to the seen-paper
//! document as `{"keywords": ["transformer", "diffusion"]}`. Edits go through
//! [`write_atomic`], so a crash mid-save keeps the previous list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use paperbot_core::defaults::KEYWORDS_FILE_NAME;
use paperbot_core::{Error, KeywordSet, Result, TrackedKeyword};

use crate::atomic::write_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeywordDocument {
    #[serde(default)]
    keywords: KeywordSet,
}

/// Handle on the keyword subscription file.
#[derive(Debug, Clone)]
pub struct KeywordFile {
    path: PathBuf,
}

impl KeywordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `keywords.json` inside `cache_folder`.
    pub fn in_folder(cache_folder: impl AsRef<Path>) -> Self {
        Self::new(cache_folder.as_ref().join(KEYWORDS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the keyword set. A missing file is an empty set.
    pub async fn load(&self) -> Result<KeywordSet> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No keyword file, no keywords tracked");
                return Ok(KeywordSet::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let doc: KeywordDocument = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Config(format!("Invalid keyword file {}: {}", self.path.display(), e))
        })?;
        Ok(doc.keywords)
    }

    /// Replace the file contents with `keywords`.
    pub async fn save(&self, keywords: &KeywordSet) -> Result<()> {
        let data = serde_json::to_vec_pretty(&KeywordDocument {
            keywords: keywords.clone(),
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| Error::Internal(format!("Keyword save task failed: {}", e)))??;

        info!(
            path = %self.path.display(),
            count = keywords.len(),
            "Keyword subscriptions saved"
        );
        Ok(())
    }

    /// Add `terms` and save. Returns the normalized terms that were new.
    ///
    /// Nothing is written if any term is invalid.
    pub async fn add<I, S>(&self, terms: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = terms
            .into_iter()
            .map(|t| TrackedKeyword::new(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut keywords = self.load().await?;
        let mut added = Vec::new();
        for keyword in parsed {
            let term = keyword.as_str().to_string();
            if keywords.insert(keyword) {
                added.push(term);
            }
        }

        if !added.is_empty() {
            self.save(&keywords).await?;
        }
        Ok(added)
    }

    /// Remove `terms` and save. Returns the normalized terms that were removed.
    pub async fn remove<I, S>(&self, terms: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords = self.load().await?;
        let mut removed = Vec::new();
        for term in terms {
            if keywords.remove(term.as_ref()) {
                removed.push(paperbot_core::normalize_term(term.as_ref()));
            }
        }

        if !removed.is_empty() {
            self.save(&keywords).await?;
        }
        Ok(removed)
    }
}
