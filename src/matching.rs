// 🎯 Candidate Generator - Ranked approximate matches against the canonical key space
// Token-order-independent scoring so "Musterstadt Stadtwerke" still finds
// "Stadtwerke Musterstadt".

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

// ============================================================================
// SIMILARITY METRIC
// ============================================================================

/// Similarity of two normalized keys in [0, 100].
///
/// Takes the best of three views:
/// - direct normalized Levenshtein similarity,
/// - the same over alphabetically sorted tokens (order independence),
/// - the token-set variant (shared tokens vs. shared-plus-remainder),
///   which keeps abbreviated names close to their long forms.
pub fn similarity(a: &str, b: &str) -> u8 {
    let direct = normalized_levenshtein(a, b);
    let sorted = normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b));
    let set = token_set_similarity(a, b);

    (direct.max(sorted).max(set) * 100.0).round() as u8
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_set_similarity(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let common = ta.intersection(&tb).copied().collect::<Vec<_>>().join(" ");
    let only_a = ta.difference(&tb).copied().collect::<Vec<_>>().join(" ");
    let only_b = tb.difference(&ta).copied().collect::<Vec<_>>().join(" ");

    let with_a = join_nonempty(&common, &only_a);
    let with_b = join_nonempty(&common, &only_b);

    normalized_levenshtein(&common, &with_a)
        .max(normalized_levenshtein(&common, &with_b))
        .max(normalized_levenshtein(&with_a, &with_b))
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (_, true) => left.to_string(),
        (true, false) => right.to_string(),
        (false, false) => format!("{left} {right}"),
    }
}

// ============================================================================
// CANDIDATES
// ============================================================================

/// One ranked match out of the canonical key space.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Plain canonical key resolving to the entry.
    pub entry_key: String,

    /// The key that was actually scored (equals `entry_key` in the plain
    /// key space, the postal-aware key otherwise).
    pub match_key: String,

    /// Display name of the canonical entry, for prompts and decisions.
    pub display_name: String,

    /// Similarity score in [0, 100].
    pub score: u8,
}

// ============================================================================
// CANDIDATE GENERATOR
// ============================================================================

pub struct CandidateGenerator {
    /// Maximum number of candidates returned (default: 20)
    pub limit: usize,

    /// Minimum score a candidate must reach (default: 75)
    pub cutoff: u8,
}

impl CandidateGenerator {
    pub fn new() -> Self {
        CandidateGenerator {
            limit: 20,
            cutoff: 75,
        }
    }

    /// Rank a lookup key against a key space of
    /// `(match_key, entry_key, display_name)` triples.
    ///
    /// Returns at most `limit` candidates scoring at least `cutoff`,
    /// best first. Equal scores keep the key-space iteration order.
    pub fn rank<'a, I>(&self, query: &str, keyspace: I) -> Vec<Candidate>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut candidates: Vec<Candidate> = keyspace
            .into_iter()
            .filter_map(|(match_key, entry_key, display_name)| {
                let score = similarity(query, match_key);
                (score >= self.cutoff).then(|| Candidate {
                    entry_key: entry_key.to_string(),
                    match_key: match_key.to_string(),
                    display_name: display_name.to_string(),
                    score,
                })
            })
            .collect();

        // Stable sort: ties keep the order the key space produced them in.
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates.truncate(self.limit);
        candidates
    }
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
