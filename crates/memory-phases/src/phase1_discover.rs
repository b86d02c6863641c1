use anyhow::{Context, Result};
use chrono::Duration;
use memory_embeddings::{EmbeddingCache, NoopProvider};
use memory_phase_api::{
    CanonicalEntry, CanonicalMap, Phase, PhaseContext, PhaseId, PhaseMetadata, PhaseResult,
    RunState, TopicFrequency,
};
use memory_similarity::{compute_pairwise_similarity, MergeProposal, SimilarityMethod};
use std::collections::HashMap;
use std::fs;

pub struct DiscoverPhase;

impl Phase for DiscoverPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Discover
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Init]
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn run(&self, ctx: &PhaseContext, mut state: RunState) -> Result<PhaseResult> {
        let start = ctx.started_at.date_naive() - Duration::days(ctx.config.advanced.lookback_days as i64);
        let end = ctx.started_at.date_naive();

        let logs = memory_scanner::find_daily_logs(&ctx.memory_dir, Some(start), Some(end))
            .with_context(|| format!("failed to scan memory directory: {}", ctx.memory_dir))?;

        let mut all_occurrences = Vec::new();
        for relative in &logs {
            let path = ctx.memory_dir.join(relative);
            let content = fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read {path}"))?;
            all_occurrences.extend(memory_scanner::extract_hashtags(&content, relative));
        }
        state.stats.files_scanned = logs.len();

        let tallied = memory_scanner::tally(&all_occurrences, ctx.config.advanced.min_tag_frequency);
        let discovered_topics: HashMap<String, TopicFrequency> = tallied
            .into_iter()
            .map(|(tag, occs)| {
                (
                    tag,
                    TopicFrequency {
                        count: occs.len(),
                        occurrences: occs,
                    },
                )
            })
            .collect();
        state.stats.tags_discovered = discovered_topics.len();

        let tags: Vec<String> = discovered_topics.keys().cloned().collect();
        let freq_map: HashMap<String, usize> = discovered_topics
            .iter()
            .map(|(tag, freq)| (tag.clone(), freq.count))
            .collect();

        let method = match ctx.config.topic_similarity.method {
            memory_config::SimilarityMethodConfig::Levenshtein => SimilarityMethod::Levenshtein,
            memory_config::SimilarityMethodConfig::Embedding => SimilarityMethod::Embedding,
        };

        let mut embedding_cache = EmbeddingCache::open(ctx.cache_dir().join("embeddings").join("embeddings.json"))?;
        let noop = NoopProvider;
        let provider_arg = if method == SimilarityMethod::Embedding {
            Some((
                &noop as &dyn memory_embeddings::EmbeddingProvider,
                &mut embedding_cache,
                ctx.config.performance.batch_size,
            ))
        } else {
            None
        };

        let merge_proposals = compute_pairwise_similarity(
            &tags,
            &freq_map,
            &ctx.config.synonyms,
            method,
            ctx.config.topic_similarity.threshold,
            provider_arg,
        );

        let canonical_map = build_canonical_map(&discovered_topics, &merge_proposals);

        state.similarity_method = match method {
            SimilarityMethod::Levenshtein => "levenshtein".to_string(),
            SimilarityMethod::Embedding => "embedding".to_string(),
        };
        state.discovered_topics = discovered_topics;
        state.merge_proposals = merge_proposals;
        state.canonical_map = canonical_map;

        Ok(PhaseResult {
            state,
            next_step: memory_phase_api::NextStep::Continue,
            metadata: PhaseMetadata::default(),
        })
    }
}

/// Seed every discovered tag as its own canonical entry, then fold in each
/// proposal in order, resolving through any existing alias chain first.
fn build_canonical_map(
    discovered_topics: &HashMap<String, TopicFrequency>,
    proposals: &[MergeProposal],
) -> CanonicalMap {
    let mut canonical_map: HashMap<String, CanonicalEntry> = discovered_topics
        .iter()
        .map(|(tag, freq)| {
            (
                tag.clone(),
                CanonicalEntry {
                    canonical: tag.clone(),
                    aliases: Vec::new(),
                    count: freq.count,
                },
            )
        })
        .collect();
    let mut alias_map: HashMap<String, String> = HashMap::new();

    for proposal in proposals {
        let canonical = resolve(&alias_map, &proposal.canonical);
        let alias = resolve(&alias_map, &proposal.alias);
        if canonical == alias || !canonical_map.contains_key(&canonical) {
            continue;
        }

        let Some(alias_entry) = canonical_map.remove(&alias) else {
            continue;
        };

        if let Some(entry) = canonical_map.get_mut(&canonical) {
            entry.aliases.push(alias.clone());
            entry.aliases.extend(alias_entry.aliases.clone());
            entry.count += alias_entry.count;
        }

        alias_map.insert(alias.clone(), canonical.clone());
        for nested in &alias_entry.aliases {
            alias_map.insert(nested.clone(), canonical.clone());
        }
    }

    CanonicalMap {
        canonical_map,
        alias_map,
    }
}

fn resolve(alias_map: &HashMap<String, String>, tag: &str) -> String {
    let mut current = tag.to_string();
    let mut seen = std::collections::HashSet::new();
    while let Some(next) = alias_map.get(&current) {
        if !seen.insert(current.clone()) {
            break;
        }
        current = next.clone();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_canonical_map_folds_alias_into_canonical() {
        let mut discovered = HashMap::new();
        discovered.insert(
            "trading".to_string(),
            TopicFrequency {
                count: 10,
                occurrences: vec![],
            },
        );
        discovered.insert(
            "tradng".to_string(),
            TopicFrequency {
                count: 2,
                occurrences: vec![],
            },
        );

        let proposals = vec![MergeProposal {
            canonical: "trading".to_string(),
            alias: "tradng".to_string(),
            confidence: 0.9,
            method: memory_similarity::MergeMethod::Levenshtein,
        }];

        let map = build_canonical_map(&discovered, &proposals);
        assert_eq!(map.resolve("tradng"), "trading");
        assert!(!map.canonical_map.contains_key("tradng"));
        assert_eq!(map.canonical_map["trading"].count, 12);
    }

    #[test]
    fn every_tag_is_either_canonical_or_aliased_never_both() {
        let mut discovered = HashMap::new();
        for tag in ["a", "b", "c"] {
            discovered.insert(
                tag.to_string(),
                TopicFrequency {
                    count: 1,
                    occurrences: vec![],
                },
            );
        }
        let proposals = vec![MergeProposal {
            canonical: "a".to_string(),
            alias: "b".to_string(),
            confidence: 1.0,
            method: memory_similarity::MergeMethod::SynonymRule,
        }];
        let map = build_canonical_map(&discovered, &proposals);
        for tag in ["a", "b", "c"] {
            let is_canonical = map.canonical_map.contains_key(tag);
            let is_alias = map.alias_map.contains_key(tag);
            assert!(is_canonical ^ is_alias, "{tag} should be exactly one of canonical/alias");
        }
    }
}
