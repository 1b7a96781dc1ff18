//! KeyBERT-style keyphrase extraction: n-gram candidate generation, maximal
//! marginal relevance (MMR) selection, and structural-candidate weighted
//! re-ranking, built against the [`TextEncoder`] trait rather than a
//! concrete embedding model.

use std::collections::HashSet;

use crate::capability::TextEncoder;
use crate::domain::{Keyphrase, KeyphraseRequest, StructuredCandidates};
use crate::error::WorkerResult;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "if", "in", "into", "is", "it", "its", "of", "on", "or", "our", "she",
    "that", "the", "their", "there", "these", "this", "those", "to", "was", "we", "were", "which",
    "who", "will", "with", "you", "your",
];

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Generate unique n-gram candidates in `[min_n, max_n]`, dropping any
/// n-gram whose first or last word is a stop word (standard KeyBERT
/// candidate-cleaning heuristic: stop words mid-phrase are kept, e.g.
/// "state of the art", but edge stop words are near-always noise).
fn extract_candidates(text: &str, ngram_range: (usize, usize), stop_words: Option<&str>) -> Vec<String> {
    let words = tokenize(text);
    let stop: HashSet<&str> = if stop_words.map(|s| s.eq_ignore_ascii_case("none")).unwrap_or(false) {
        HashSet::new()
    } else {
        ENGLISH_STOP_WORDS.iter().copied().collect()
    };

    let (min_n, max_n) = ngram_range;
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for n in min_n.max(1)..=max_n.max(min_n.max(1)) {
        if n > words.len() {
            continue;
        }
        for window in words.windows(n) {
            if stop.contains(window[0].as_str()) || stop.contains(window[n - 1].as_str()) {
                continue;
            }
            let phrase = window.join(" ");
            if seen.insert(phrase.clone()) {
                candidates.push(phrase);
            }
        }
    }
    candidates
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}

/// Maximal marginal relevance selection over `candidates`, balancing
/// relevance to the document against redundancy with already-selected
/// phrases. `diversity` in `[0,1]`: 0 favors pure relevance, 1 favors
/// maximal spread.
fn mmr_select(
    candidates: &[String],
    candidate_embeddings: &[Vec<f32>],
    doc_similarity: &[f32],
    diversity: f32,
    count: usize,
) -> Vec<(String, f32)> {
    let lambda = (1.0 - diversity).clamp(0.0, 1.0);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::new();
    let mut scores: Vec<(String, f32)> = Vec::new();

    while !remaining.is_empty() && selected.len() < count {
        let mut best_idx_pos = 0;
        let mut best_score = f32::MIN;
        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&sel| cosine(&candidate_embeddings[idx], &candidate_embeddings[sel]))
                .fold(0.0_f32, f32::max);
            let mmr_score = lambda * doc_similarity[idx] - (1.0 - lambda) * redundancy;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx_pos = pos;
            }
        }
        let chosen = remaining.remove(best_idx_pos);
        selected.push(chosen);
        // The reported score stays the raw document-similarity score, not the
        // MMR objective. MMR only changes *selection order*, not the score
        // surfaced to the caller (matches KeyBERT's own convention).
        scores.push((candidates[chosen].clone(), doc_similarity[chosen]));
    }
    scores
}

/// `0.3·w + 0.7·s` where `w` is the structural weight of the candidate
///; `w = 0.4` (no boost, passes `s` through scaled by the
/// same affine map) when the candidate matches no structural set.
fn structural_weight(candidate: &str, structured: &StructuredCandidates) -> f32 {
    let lower = candidate.to_lowercase();
    let contains = |list: &[String]| list.iter().any(|item| item.to_lowercase().contains(&lower) || lower.contains(&item.to_lowercase()));

    if contains(&structured.metadata) {
        1.0
    } else if contains(&structured.headers) {
        0.9
    } else if contains(&structured.entities) {
        0.8
    } else if contains(&structured.emphasized) {
        0.7
    } else if contains(&structured.captions) {
        0.6
    } else {
        0.4
    }
}

fn apply_weighted_scoring(scored: Vec<(String, f32)>, structured: Option<&StructuredCandidates>) -> Vec<Keyphrase> {
    scored
        .into_iter()
        .map(|(text, score)| {
            let boosted = match structured {
                Some(sc) => {
                    let w = structural_weight(&text, sc);
                    if w > 0.4 {
                        0.3 * w + 0.7 * score
                    } else {
                        score
                    }
                }
                None => score,
            };
            Keyphrase {
                text,
                score: boosted.clamp(0.0, 1.0),
            }
        })
        .collect()
}

pub struct KeyBertExtractor;

impl super::KeyphraseExtractor for KeyBertExtractor {
    fn extract(&self, encoder: &mut dyn TextEncoder, request: &KeyphraseRequest) -> WorkerResult<Vec<Keyphrase>> {
        let candidates = extract_candidates(&request.text, request.ngram_range, request.stop_words.as_deref());
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut to_encode = Vec::with_capacity(candidates.len() + 1);
        to_encode.push(request.text.clone());
        to_encode.extend(candidates.iter().cloned());
        let embeddings = encoder.encode(&to_encode)?;

        let doc_embedding = &embeddings[0];
        let candidate_embeddings = &embeddings[1..];
        let doc_similarity: Vec<f32> = candidate_embeddings.iter().map(|e| cosine(doc_embedding, e)).collect();

        let ranked = if request.use_mmr {
            mmr_select(
                &candidates,
                candidate_embeddings,
                &doc_similarity,
                request.diversity,
                candidates.len(),
            )
        } else {
            let mut scored: Vec<(String, f32)> = candidates
                .iter()
                .cloned()
                .zip(doc_similarity.iter().copied())
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored
        };

        let mut keyphrases = apply_weighted_scoring(ranked, request.structured_candidates.as_ref());
        keyphrases.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        keyphrases.truncate(request.top_n);
        Ok(keyphrases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_drop_edge_stop_words() {
        let candidates = extract_candidates("the quick brown fox", (1, 2), None);
        assert!(!candidates.contains(&"the".to_string()));
        assert!(candidates.contains(&"quick".to_string()));
        assert!(candidates.contains(&"quick brown".to_string()));
    }

    #[test]
    fn structural_weight_defaults_to_no_boost() {
        let empty = StructuredCandidates::default();
        assert_eq!(structural_weight("unrelated phrase", &empty), 0.4);
    }

    #[test]
    fn structural_weight_ranks_metadata_highest() {
        let structured = StructuredCandidates {
            metadata: vec!["rust programming".into()],
            ..Default::default()
        };
        assert_eq!(structural_weight("rust programming", &structured), 1.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }
}
