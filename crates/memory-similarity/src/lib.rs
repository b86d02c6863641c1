//! Tag consolidation: deciding which discovered hashtags are really the same
//! topic. Three independent sources feed into one ranked list of proposals:
//! explicit synonym rules, mechanical (Levenshtein) similarity, and
//! optional semantic (embedding) similarity.

use memory_embeddings::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMethod {
    Levenshtein,
    Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    SynonymRule,
    Levenshtein,
    Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProposal {
    pub canonical: String,
    pub alias: String,
    pub confidence: f64,
    pub method: MergeMethod,
}

const DEFAULT_THRESHOLD: f64 = 0.8;

/// Rank pairs of `tags` by similarity, using `discovered_topics` frequencies
/// to pick the canonical side of each proposal. `synonym_rules` are ordered
/// `[preferred, alt1, alt2, ...]` lists. When `method` is `Embedding`, a
/// provider failure is logged and the function falls back to mechanical
/// scoring for the semantic pass.
pub fn compute_pairwise_similarity(
    tags: &[String],
    discovered_topics: &HashMap<String, usize>,
    synonym_rules: &[Vec<String>],
    method: SimilarityMethod,
    threshold: f64,
    provider: Option<(&dyn EmbeddingProvider, &mut memory_embeddings::EmbeddingCache, usize)>,
) -> Vec<MergeProposal> {
    let threshold = if threshold > 0.0 { threshold } else { DEFAULT_THRESHOLD };

    let mut proposals = synonym_proposals(tags, synonym_rules);
    proposals.extend(mechanical_proposals(tags, threshold));

    if method == SimilarityMethod::Embedding {
        match provider {
            Some((provider, cache, batch_size)) => {
                match semantic_proposals(tags, threshold, provider, cache, batch_size) {
                    Ok(mut semantic) => proposals.append(&mut semantic),
                    Err(err) => {
                        tracing::warn!(error = %err, "embedding provider failed, falling back to mechanical similarity");
                    }
                }
            }
            None => {
                tracing::warn!("embedding method configured but no provider supplied, using mechanical similarity only");
            }
        }
    }

    dedupe_and_orient(proposals, discovered_topics)
}

fn synonym_proposals(tags: &[String], rules: &[Vec<String>]) -> Vec<MergeProposal> {
    let mut proposals = Vec::new();
    for rule in rules {
        if rule.len() < 2 {
            continue;
        }
        let present: Vec<&String> = rule.iter().filter(|t| tags.contains(t)).collect();
        if present.is_empty() {
            continue;
        }

        let preferred = &rule[0];
        if tags.contains(preferred) {
            for alt in present.iter().filter(|t| t.as_str() != preferred.as_str()) {
                proposals.push(MergeProposal {
                    canonical: preferred.clone(),
                    alias: (*alt).clone(),
                    confidence: 1.0,
                    method: MergeMethod::SynonymRule,
                });
            }
        } else if present.len() >= 2 {
            let canonical = present[0].clone();
            for alt in &present[1..] {
                proposals.push(MergeProposal {
                    canonical: canonical.clone(),
                    alias: (*alt).clone(),
                    confidence: 1.0,
                    method: MergeMethod::SynonymRule,
                });
            }
        }
    }
    proposals
}

/// Skip a pair unless (i) one contains the other, or neither (ii) the
/// length gap is too large nor (iii) the prefixes share no character.
fn should_skip(a: &str, b: &str) -> bool {
    if a.contains(b) || b.contains(a) {
        return false;
    }
    let (la, lb) = (a.chars().count(), b.chars().count());
    let max_len = la.max(lb) as f64;
    let length_gap_too_large = ((la as f64) - (lb as f64)).abs() > 0.5 * max_len;

    let prefix_a: Vec<char> = a.chars().take(3).collect();
    let prefix_b: Vec<char> = b.chars().take(3).collect();
    let shares_prefix_char = prefix_a.iter().any(|c| prefix_b.contains(c));

    length_gap_too_large && !shares_prefix_char
}

fn mechanical_score(a: &str, b: &str) -> f64 {
    let mut score = 1.0 - memory_math::normalized_levenshtein(a, b);

    if a.contains(b) || b.contains(a) {
        score += 0.25;
        let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        if shorter.len() <= 3 && longer.starts_with(shorter) {
            score += 0.5;
        }
    }

    let common_prefix_len = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    if common_prefix_len >= 3 {
        score += 0.30;
    }

    score.min(1.0)
}

fn mechanical_proposals(tags: &[String], threshold: f64) -> Vec<MergeProposal> {
    let mut proposals = Vec::new();
    for i in 0..tags.len() {
        for j in (i + 1)..tags.len() {
            let (a, b) = (&tags[i], &tags[j]);
            if should_skip(a, b) {
                continue;
            }
            let score = mechanical_score(a, b);
            if score >= threshold {
                proposals.push(MergeProposal {
                    canonical: a.clone(),
                    alias: b.clone(),
                    confidence: score,
                    method: MergeMethod::Levenshtein,
                });
            }
        }
    }
    proposals
}

fn semantic_proposals(
    tags: &[String],
    threshold: f64,
    provider: &dyn EmbeddingProvider,
    cache: &mut memory_embeddings::EmbeddingCache,
    batch_size: usize,
) -> anyhow::Result<Vec<MergeProposal>> {
    let now = chrono::Utc::now();
    let vectors = cache.get_embeddings(tags, provider, batch_size, now)?;

    let mut proposals = Vec::new();
    for i in 0..tags.len() {
        for j in (i + 1)..tags.len() {
            let (a, b) = (&tags[i], &tags[j]);
            if should_skip(a, b) && !(a.contains(b.as_str()) || b.contains(a.as_str())) {
                continue;
            }
            let (Some(va), Some(vb)) = (vectors.get(a), vectors.get(b)) else {
                continue;
            };
            let Some(score) = memory_math::cosine_similarity(va, vb) else {
                continue;
            };
            if (score as f64) >= threshold {
                proposals.push(MergeProposal {
                    canonical: a.clone(),
                    alias: b.clone(),
                    confidence: score as f64,
                    method: MergeMethod::Embedding,
                });
            }
        }
    }
    Ok(proposals)
}

/// Dedupe by `(alias, canonical)`, orient each proposal so the higher-frequency
/// tag is canonical (ties break lexicographically), then sort by confidence
/// descending.
fn dedupe_and_orient(
    proposals: Vec<MergeProposal>,
    discovered_topics: &HashMap<String, usize>,
) -> Vec<MergeProposal> {
    let mut seen = std::collections::HashSet::new();
    let mut oriented = Vec::new();

    for mut p in proposals {
        if p.method != MergeMethod::SynonymRule {
            let freq_canonical = discovered_topics.get(&p.canonical).copied().unwrap_or(0);
            let freq_alias = discovered_topics.get(&p.alias).copied().unwrap_or(0);
            let should_swap = freq_alias > freq_canonical
                || (freq_alias == freq_canonical && p.alias < p.canonical);
            if should_swap {
                std::mem::swap(&mut p.canonical, &mut p.alias);
            }
        }

        let key = (p.alias.clone(), p.canonical.clone());
        if seen.insert(key) {
            oriented.push(p);
        }
    }

    oriented.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    oriented
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn synonym_rule_promotes_preferred() {
        let tags = vec!["py".to_string(), "python".to_string()];
        let rules = vec![vec!["python".to_string(), "py".to_string()]];
        let proposals = synonym_proposals(&tags, &rules);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].canonical, "python");
        assert_eq!(proposals[0].alias, "py");
        assert_eq!(proposals[0].confidence, 1.0);
    }

    #[test]
    fn synonym_rule_promotes_first_present_when_preferred_absent() {
        let tags = vec!["ml".to_string(), "ai".to_string()];
        let rules = vec![vec![
            "machine-learning".to_string(),
            "ml".to_string(),
            "ai".to_string(),
        ]];
        let proposals = synonym_proposals(&tags, &rules);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].canonical, "ml");
        assert_eq!(proposals[0].alias, "ai");
    }

    #[test]
    fn abbreviation_rule_merges_py_and_python() {
        let score = mechanical_score("py", "python");
        assert!(score >= 0.8, "expected abbreviation bonus to clear threshold, got {score}");
    }

    #[test]
    fn skip_heuristic_rejects_unrelated_short_long_pair() {
        assert!(should_skip("go", "javascript"));
    }

    #[test]
    fn skip_heuristic_keeps_containment_pairs() {
        assert!(!should_skip("py", "python"));
    }

    #[test]
    fn compute_pairwise_similarity_dedupes_and_orients_by_frequency() {
        let tags = vec!["trading".to_string(), "tradng".to_string()];
        let freqs = topics(&[("trading", 10), ("tradng", 2)]);
        let proposals = compute_pairwise_similarity(
            &tags,
            &freqs,
            &[],
            SimilarityMethod::Levenshtein,
            0.8,
            None,
        );
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].canonical, "trading");
        assert_eq!(proposals[0].alias, "tradng");
    }
}
