//! Embedding provider contract and persistent cache.
//!
//! The actual embedding model is an external collaborator; this crate only
//! owns the trait boundary (`EmbeddingProvider`), a no-op fallback, and a
//! keyed cache so repeated runs don't recompute vectors for tags that
//! haven't changed.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

/// External collaborator boundary: something that turns tag strings into
/// unit-normalized vectors. Implementations may fail (network, quota,
/// timeout); callers are expected to fall back to mechanical similarity.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model_version(&self) -> &str;
    fn dimensions(&self) -> usize;
}

/// Always fails. The default provider when no real one is configured, so
/// the similarity engine's fallback path is exercised rather than assumed.
pub struct NoopProvider;

impl EmbeddingProvider for NoopProvider {
    fn embed(&self, _batch: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("no embedding provider configured")
    }

    fn model_version(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEmbedding {
    vector: Vec<f32>,
    dimensions: usize,
    computed_at: DateTime<Utc>,
    model_version: String,
}

/// A tag-keyed embedding cache backed by a single JSON file, rewritten
/// atomically on every save. Loaded fully into memory on open.
pub struct EmbeddingCache {
    path: Utf8PathBuf,
    entries: HashMap<String, CachedEmbedding>,
}

impl EmbeddingCache {
    pub fn open(path: Utf8PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let content = fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read embedding cache: {path}"))?;
            serde_json::from_str(&content).context("failed to parse embedding cache")?
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    fn save(&self) -> Result<()> {
        let json =
            serde_json::to_string(&self.entries).context("failed to serialize embedding cache")?;
        memory_hash::write_atomic(&self.path, &json)
            .with_context(|| format!("failed to write embedding cache: {}", self.path))?;
        Ok(())
    }

    /// Return embeddings for every tag in `tags`, computing and caching any
    /// that are missing via `provider`, in batches of `batch_size`. If the
    /// provider fails partway through, already-cached vectors are still
    /// returned and the error is surfaced so the caller can fall back.
    pub fn get_embeddings(
        &mut self,
        tags: &[String],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut result: HashMap<String, Vec<f32>> = HashMap::new();
        let mut missing = Vec::new();

        for tag in tags {
            if let Some(cached) = self.entries.get(tag) {
                result.insert(tag.clone(), cached.vector.clone());
            } else {
                missing.push(tag.clone());
            }
        }

        if missing.is_empty() {
            return Ok(result);
        }

        let batch_size = batch_size.max(1);
        for chunk in missing.chunks(batch_size) {
            let vectors = provider.embed(chunk)?;
            if vectors.len() != chunk.len() {
                anyhow::bail!(
                    "embedding provider returned {} vectors for {} tags",
                    vectors.len(),
                    chunk.len()
                );
            }
            for (tag, vector) in chunk.iter().zip(vectors.into_iter()) {
                let normalized = memory_math::normalize(&vector);
                self.entries.insert(
                    tag.clone(),
                    CachedEmbedding {
                        vector: normalized.clone(),
                        dimensions: normalized.len(),
                        computed_at: now,
                        model_version: provider.model_version().to_string(),
                    },
                );
                result.insert(tag.clone(), normalized);
            }
        }

        self.save()?;
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct FakeProvider;
    impl EmbeddingProvider for FakeProvider {
        fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(batch.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
        fn model_version(&self) -> &str {
            "fake-v1"
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    #[test]
    fn noop_provider_always_errors() {
        assert!(NoopProvider.embed(&["x".to_string()]).is_err());
    }

    #[test]
    fn cache_computes_missing_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("embeddings.json")).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut cache = EmbeddingCache::open(path.clone()).unwrap();
        let tags = vec!["trading".to_string(), "python".to_string()];
        let result = cache.get_embeddings(&tags, &FakeProvider, 10, now).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(cache.len(), 2);

        let reopened = EmbeddingCache::open(path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn cache_hits_avoid_recomputation() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("embeddings.json")).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut cache = EmbeddingCache::open(path).unwrap();
        cache
            .get_embeddings(&["trading".to_string()], &FakeProvider, 10, now)
            .unwrap();

        struct PanicProvider;
        impl EmbeddingProvider for PanicProvider {
            fn embed(&self, _batch: &[String]) -> Result<Vec<Vec<f32>>> {
                panic!("should not be called for cached tags")
            }
            fn model_version(&self) -> &str {
                "panic"
            }
            fn dimensions(&self) -> usize {
                0
            }
        }

        let result = cache
            .get_embeddings(&["trading".to_string()], &PanicProvider, 10, now)
            .unwrap();
        assert_eq!(result.len(), 1);
    }
}
