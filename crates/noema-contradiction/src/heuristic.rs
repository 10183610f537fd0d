//! Offline contradiction classifier.
//!
//! Pattern-matching only: antonym swaps and negation flips between two
//! statements whose remaining words largely agree. Catches the obvious
//! cases ("loves tea" / "hates tea") without a model backend.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::classifier::{Classifier, ContradictionJudgment};
use crate::error::ClassifierError;

/// Antonyms that flip a statement when swapped in the same context.
const ANTONYM_PAIRS: &[(&str, &str)] = &[
    ("love", "hate"),
    ("loves", "hates"),
    ("loved", "hated"),
    ("like", "dislike"),
    ("likes", "dislikes"),
    ("enjoy", "hate"),
    ("enjoys", "hates"),
    ("prefer", "avoid"),
    ("prefers", "avoids"),
    ("always", "never"),
    ("hot", "cold"),
    ("good", "bad"),
    ("happy", "sad"),
    ("true", "false"),
    ("yes", "no"),
    ("enabled", "disabled"),
    ("active", "inactive"),
    ("open", "closed"),
    ("accept", "reject"),
    ("allow", "block"),
    ("start", "stop"),
];

const NEGATIONS: &[&str] = &[
    "not", "never", "don't", "doesn't", "didn't", "isn't", "wasn't", "aren't", "won't", "can't",
    "cannot",
];

/// Words that carry no topic on their own once a negation is removed.
const AUXILIARIES: &[&str] = &["do", "does", "did", "no", "longer", "anymore"];

const ANTONYM_SCORE: f64 = 0.9;
const NEGATION_SCORE: f64 = 0.85;
const WEAK_SCORE: f64 = 0.5;

/// Judgments at or above this score count as contradicting in
/// `classify_contradicted_ids`.
const CONTRADICTED_CUTOFF: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Score a pair of statements without any I/O.
    pub fn judge(&self, a: &str, b: &str) -> ContradictionJudgment {
        let ta = tokenize(a);
        let tb = tokenize(b);
        if ta.is_empty() || tb.is_empty() || ta == tb {
            return ContradictionJudgment::none();
        }

        if let Some(judgment) = antonym_swap(&ta, &tb) {
            return judgment;
        }
        if let Some(judgment) = negation_flip(&ta, &tb) {
            return judgment;
        }
        ContradictionJudgment::none()
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify_contradiction(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ContradictionJudgment, ClassifierError> {
        Ok(self.judge(a, b))
    }

    async fn classify_contradicted_ids(
        &self,
        new_item: &str,
        candidates: &[String],
    ) -> Result<Vec<usize>, ClassifierError> {
        Ok(candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| self.judge(new_item, c).score >= CONTRADICTED_CUTOFF)
            .map(|(i, _)| i)
            .collect())
    }
}

fn antonym_swap(a: &[String], b: &[String]) -> Option<ContradictionJudgment> {
    let has = |tokens: &[String], w: &str| tokens.iter().any(|t| t == w);

    for &(x, y) in ANTONYM_PAIRS {
        let crossed = (has(a, x) && has(b, y) && !has(a, y) && !has(b, x))
            || (has(a, y) && has(b, x) && !has(a, x) && !has(b, y));
        if !crossed {
            continue;
        }

        let ctx_a = topic_words(a, &[x, y]);
        let ctx_b = topic_words(b, &[x, y]);
        let overlap = jaccard(&ctx_a, &ctx_b);
        if overlap > 0.5 {
            return Some(ContradictionJudgment::new(
                ANTONYM_SCORE,
                format!("'{x}' and '{y}' applied to the same subject"),
            ));
        } else if overlap > 0.3 {
            return Some(ContradictionJudgment::new(
                WEAK_SCORE,
                format!("'{x}' and '{y}' in partly overlapping statements"),
            ));
        }
    }
    None
}

fn negation_flip(a: &[String], b: &[String]) -> Option<ContradictionJudgment> {
    let negated = |tokens: &[String]| {
        tokens.iter().any(|t| NEGATIONS.contains(&t.as_str()))
            || tokens.windows(2).any(|w| w[0] == "no" && w[1] == "longer")
    };
    if negated(a) == negated(b) {
        return None;
    }

    let ctx_a = topic_words(a, NEGATIONS);
    let ctx_b = topic_words(b, NEGATIONS);
    if fuzzy_overlap(&ctx_a, &ctx_b) >= 0.5 {
        Some(ContradictionJudgment::new(
            NEGATION_SCORE,
            "one statement negates the other",
        ))
    } else {
        None
    }
}

/// Lowercased word tokens; apostrophes are kept so contractions survive.
fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn topic_words(tokens: &[String], drop: &[&str]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| t.len() > 1)
        .filter(|t| !drop.contains(&t.as_str()) && !AUXILIARIES.contains(&t.as_str()))
        .cloned()
        .collect()
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let union = sa.union(&sb).count();
    sa.intersection(&sb).count() as f64 / union as f64
}

/// Like [`jaccard`] but "like" matches "likes": words match when one is a
/// prefix of the other and the shorter has at least three characters.
fn fuzzy_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = |x: &str, y: &str| {
        x == y || (x.len().min(y.len()) >= 3 && (x.starts_with(y) || y.starts_with(x)))
    };
    let hits = a
        .iter()
        .filter(|x| b.iter().any(|y| matches(x, y)))
        .count();
    hits as f64 / a.len().max(b.len()) as f64
}
