/// Hybrid ranking: score fusion, recency boost, and MMR diversity
///
/// Lexical scores are normalized to [0, 1] by the best candidate, fused with
/// the semantic score under the configured weight, optionally blended with a
/// recency boost, then passed through maximal-marginal-relevance selection
/// so near-duplicate chunks do not crowd the result list.
///
/// Ordering is fully deterministic: ties break on shorter content first,
/// then on chunk id.
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::SearchConfig;
use crate::indexer::Chunk;
use crate::text::tokenize;

/// A scored candidate entering the ranker
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub content_len: usize,
    pub terms: HashSet<String>,
    pub lexical: f32,
    pub semantic: Option<f32>,
    /// File modification time, unix epoch seconds
    pub mtime: Option<i64>,
}

impl Candidate {
    pub fn from_chunk(
        chunk: &Chunk,
        lexical: f32,
        semantic: Option<f32>,
        mtime: Option<i64>,
    ) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            content_len: chunk.content.len(),
            terms: tokenize(&chunk.content).into_iter().collect(),
            lexical,
            semantic,
            mtime,
        }
    }
}

/// A ranked result with its score components
#[derive(Debug, Clone)]
pub struct Ranked {
    pub chunk_id: String,
    pub score: f32,
    pub lexical_norm: f32,
    pub semantic: Option<f32>,
}

/// Jaccard similarity between two term sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

struct Scored {
    candidate: Candidate,
    combined: f32,
    lexical_norm: f32,
}

fn tie_break(a: &Scored, b: &Scored) -> Ordering {
    b.combined
        .partial_cmp(&a.combined)
        .unwrap_or(Ordering::Equal)
        .then(a.candidate.content_len.cmp(&b.candidate.content_len))
        .then(a.candidate.chunk_id.cmp(&b.candidate.chunk_id))
}

/// Rank candidates and select up to `limit` diverse results
///
/// `now_epoch` feeds the recency boost; with `recency_weight` at 0.0 the
/// clock never influences the ordering.
pub fn rank(
    candidates: Vec<Candidate>,
    config: &SearchConfig,
    now_epoch: i64,
    limit: usize,
) -> Vec<Ranked> {
    if candidates.is_empty() || limit == 0 {
        return Vec::new();
    }

    let max_lexical = candidates
        .iter()
        .map(|c| c.lexical)
        .fold(0.0f32, f32::max);

    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| {
            let lexical_norm = if max_lexical > 0.0 {
                c.lexical / max_lexical
            } else {
                0.0
            };
            let mut combined = match c.semantic {
                Some(sem) => {
                    (1.0 - config.semantic_weight) * lexical_norm + config.semantic_weight * sem
                }
                None => lexical_norm,
            };
            if config.recency_weight > 0.0
                && let Some(mtime) = c.mtime
            {
                let age_days = ((now_epoch - mtime).max(0) as f32) / 86_400.0;
                let recency = 0.5f32.powf(age_days / config.recency_half_life_days.max(0.001));
                combined = (1.0 - config.recency_weight) * combined
                    + config.recency_weight * recency;
            }
            Scored {
                candidate: c,
                combined,
                lexical_norm,
            }
        })
        .collect();

    scored.sort_by(tie_break);
    mmr_select(scored, config, limit)
}

/// Greedy MMR over relevance-sorted candidates
///
/// Candidates whose best Jaccard similarity to an already-selected chunk
/// reaches the diversity threshold are deferred; if the diverse pass cannot
/// fill `limit`, deferred candidates top the list back up in relevance order.
fn mmr_select(scored: Vec<Scored>, config: &SearchConfig, limit: usize) -> Vec<Ranked> {
    let lambda = config.mmr_lambda;
    let mut remaining: Vec<Scored> = scored;
    let mut selected: Vec<Scored> = Vec::new();
    let mut deferred: Vec<Scored> = Vec::new();

    while selected.len() < limit && !remaining.is_empty() {
        let mut best: Option<(usize, f32, f32)> = None;
        for (i, item) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| jaccard(&item.candidate.terms, &s.candidate.terms))
                .fold(0.0f32, f32::max);
            let mmr = lambda * item.combined - (1.0 - lambda) * max_sim;
            let better = match best {
                None => true,
                // remaining is relevance-sorted, so strict improvement keeps
                // the earlier (better tie-broken) candidate on equal scores
                Some((_, best_mmr, _)) => mmr > best_mmr,
            };
            if better {
                best = Some((i, mmr, max_sim));
            }
        }
        let Some((idx, _, max_sim)) = best else {
            break;
        };
        let item = remaining.remove(idx);
        if max_sim >= config.diversity_threshold {
            deferred.push(item);
        } else {
            selected.push(item);
        }
    }

    // Not enough diverse results; fall back to the near-duplicates
    for item in deferred {
        if selected.len() >= limit {
            break;
        }
        selected.push(item);
    }

    selected
        .into_iter()
        .map(|s| Ranked {
            chunk_id: s.candidate.chunk_id,
            score: s.combined,
            lexical_norm: s.lexical_norm,
            semantic: s.candidate.semantic,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SearchConfig {
        SearchConfig {
            recency_weight: 0.0,
            ..SearchConfig::default()
        }
    }

    fn candidate(id: &str, content: &str, lexical: f32) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            content_len: content.len(),
            terms: tokenize(content).into_iter().collect(),
            lexical,
            semantic: None,
            mtime: None,
        }
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = tokenize("alpha beta gamma").into_iter().collect();
        let b: HashSet<String> = tokenize("beta gamma delta").into_iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-6);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_rank_orders_by_score() {
        let ranked = rank(
            vec![
                candidate("c1", "alpha beta", 1.0),
                candidate("c2", "gamma delta", 3.0),
                candidate("c3", "epsilon zeta", 2.0),
            ],
            &config(),
            0,
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
        // Top score normalizes to 1.0
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_breaks_shorter_then_id() {
        let ranked = rank(
            vec![
                candidate("bbb", "alpha beta", 2.0),
                candidate("aaa", "alpha beta", 2.0),
                candidate("zzz", "alpha", 2.0),
            ],
            &config(),
            0,
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        // "zzz" has shorter content; equal-length chunks order by id
        assert_eq!(ids, vec!["zzz", "aaa", "bbb"]);
    }

    #[test]
    fn test_semantic_blend_arithmetic() {
        let mut strong = candidate("strong", "alpha beta", 1.0);
        strong.semantic = Some(1.0);
        let mut weak = candidate("weak", "gamma delta", 1.0);
        weak.semantic = Some(0.5);

        let cfg = SearchConfig {
            semantic_weight: 0.3,
            ..config()
        };
        let ranked = rank(vec![weak, strong], &cfg, 0, 10);
        assert_eq!(ranked[0].chunk_id, "strong");
        // 0.7 * 1.0 + 0.3 * 1.0 and 0.7 * 1.0 + 0.3 * 0.5
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
        assert!((ranked[1].score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_semantic_lowers_score_when_weak() {
        let mut weak_sem = candidate("weak", "alpha beta", 2.0);
        weak_sem.semantic = Some(0.0);
        let lex_only = candidate("plain", "gamma delta", 2.0);

        let ranked = rank(vec![weak_sem, lex_only], &config(), 0, 10);
        // 0.7 * 1.0 + 0.3 * 0.0 = 0.7 < 1.0
        assert_eq!(ranked[0].chunk_id, "plain");
        assert!((ranked[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_recency_boost_prefers_fresh_files() {
        let now = 100 * 86_400;
        let mut fresh = candidate("fresh", "alpha beta", 1.0);
        fresh.mtime = Some(now);
        let mut old = candidate("old", "gamma delta", 1.0);
        old.mtime = Some(0);

        let cfg = SearchConfig {
            recency_weight: 0.15,
            recency_half_life_days: 30.0,
            ..SearchConfig::default()
        };
        let ranked = rank(vec![old, fresh], &cfg, now, 10);
        assert_eq!(ranked[0].chunk_id, "fresh");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_zero_recency_weight_ignores_clock() {
        let mut a = candidate("aged", "alpha beta", 1.0);
        a.mtime = Some(0);
        let went_one = rank(vec![a.clone()], &config(), 0, 10);
        let went_two = rank(vec![a], &config(), 1_000_000_000, 10);
        assert_eq!(went_one[0].score, went_two[0].score);
    }

    #[test]
    fn test_mmr_defers_near_duplicates() {
        let dup_a = candidate("dup_a", "alpha beta gamma delta", 3.0);
        let dup_b = candidate("dup_b", "alpha beta gamma delta", 2.9);
        let diverse = candidate("diverse", "epsilon zeta", 1.0);

        let ranked = rank(vec![dup_a, dup_b, diverse], &config(), 0, 2);
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["dup_a", "diverse"]);
    }

    #[test]
    fn test_mmr_backfills_when_all_similar() {
        let dup_a = candidate("dup_a", "alpha beta gamma delta", 3.0);
        let dup_b = candidate("dup_b", "alpha beta gamma delta", 2.9);

        let ranked = rank(vec![dup_a, dup_b], &config(), 0, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk_id, "dup_a");
        assert_eq!(ranked[1].chunk_id, "dup_b");
    }

    #[test]
    fn test_limit_is_respected() {
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| candidate(&format!("c{:02}", i), &format!("term{} word{}", i, i), 1.0))
            .collect();
        assert_eq!(rank(candidates, &config(), 0, 5).len(), 5);
    }

    #[test]
    fn test_empty_input() {
        assert!(rank(Vec::new(), &config(), 0, 10).is_empty());
    }
}
