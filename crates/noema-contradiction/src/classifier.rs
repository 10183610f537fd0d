//! Classifier collaborator and response parsing.
//!
//! A classifier judges whether two statements contradict each other and
//! which of several existing facts a new fact invalidates. Model-backed
//! classifiers answer in loosely formatted JSON; [`parse_judgment`] and
//! [`parse_indices`] read that output leniently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use noema_core::clamp_unit;

use crate::error::ClassifierError;

/// Contradiction score in `[0, 1]` with the classifier's explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionJudgment {
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl ContradictionJudgment {
    pub fn new(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            score: clamp_unit(score),
            reasoning: reasoning.into(),
        }
    }

    /// The neutral answer: no contradiction.
    pub fn none() -> Self {
        Self::new(0.0, "")
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_contradiction(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ContradictionJudgment, ClassifierError>;

    /// Indices into `candidates` of the facts that `new_item` contradicts.
    async fn classify_contradicted_ids(
        &self,
        new_item: &str,
        candidates: &[String],
    ) -> Result<Vec<usize>, ClassifierError>;
}

/// A raw text-completion endpoint.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;
}

/// Classifier that prompts a completion backend and parses its JSON answer.
pub struct StructuredClassifier<B> {
    backend: B,
}

impl<B: CompletionBackend> StructuredClassifier<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: CompletionBackend> Classifier for StructuredClassifier<B> {
    async fn classify_contradiction(
        &self,
        a: &str,
        b: &str,
    ) -> Result<ContradictionJudgment, ClassifierError> {
        let raw = self.backend.complete(&pair_prompt(a, b)).await?;
        parse_judgment(&raw)
    }

    async fn classify_contradicted_ids(
        &self,
        new_item: &str,
        candidates: &[String],
    ) -> Result<Vec<usize>, ClassifierError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self
            .backend
            .complete(&invalidation_prompt(new_item, candidates))
            .await?;
        parse_indices(&raw, candidates.len())
    }
}

fn pair_prompt(a: &str, b: &str) -> String {
    format!(
        "Decide whether these two statements about the same person contradict each other.\n\
         Statement A: {a}\n\
         Statement B: {b}\n\
         Answer with JSON only: {{\"score\": <0.0-1.0>, \"reasoning\": \"<one sentence>\"}}"
    )
}

fn invalidation_prompt(new_item: &str, candidates: &[String]) -> String {
    let listed: String = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{i}: {c}\n"))
        .collect();
    format!(
        "A new fact was learned: {new_item}\n\
         Existing facts:\n{listed}\
         Which existing facts does the new fact contradict?\n\
         Answer with JSON only: {{\"contradicted_ids\": [<index>, ...]}}"
    )
}

// ── Response parsing ─────────────────────────────────────────────

#[derive(Deserialize)]
struct RawJudgment {
    #[serde(alias = "contradiction_score")]
    score: f64,
    #[serde(default, alias = "reason")]
    reasoning: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIndices {
    Bare(Vec<i64>),
    Wrapped {
        #[serde(alias = "ids", alias = "contradicted_facts")]
        contradicted_ids: Vec<i64>,
    },
}

/// Read a `{score, reasoning}` object out of a completion.
pub fn parse_judgment(raw: &str) -> Result<ContradictionJudgment, ClassifierError> {
    let body = extract_json(raw, '{', '}')
        .ok_or_else(|| ClassifierError::Malformed(format!("no JSON object in {raw:?}")))?;
    let parsed: RawJudgment =
        serde_json::from_str(body).map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    Ok(ContradictionJudgment::new(parsed.score, parsed.reasoning))
}

/// Read contradicted indices. Out-of-range and duplicate indices are dropped.
pub fn parse_indices(raw: &str, candidate_count: usize) -> Result<Vec<usize>, ClassifierError> {
    let body = extract_json(raw, '{', '}')
        .or_else(|| extract_json(raw, '[', ']'))
        .ok_or_else(|| ClassifierError::Malformed(format!("no JSON in {raw:?}")))?;
    let parsed: RawIndices =
        serde_json::from_str(body).map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    let ids = match parsed {
        RawIndices::Bare(ids) => ids,
        RawIndices::Wrapped { contradicted_ids } => contradicted_ids,
    };

    let mut out: Vec<usize> = ids
        .into_iter()
        .filter_map(|i| usize::try_from(i).ok())
        .filter(|&i| i < candidate_count)
        .collect();
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// The outermost `open..=close` span after stripping code fences.
fn extract_json(raw: &str, open: char, close: char) -> Option<&str> {
    let text = strip_fences(raw);
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgment_from_fenced_json() {
        let raw = "```json\n{\"score\": 0.92, \"reasoning\": \"love vs hate\"}\n```";
        let j = parse_judgment(raw).unwrap();
        assert!((j.score - 0.92).abs() < 1e-9);
        assert_eq!(j.reasoning, "love vs hate");
    }

    #[test]
    fn judgment_with_surrounding_prose() {
        let raw = "Sure! Here is my answer: {\"contradiction_score\": 0.4} Hope that helps.";
        let j = parse_judgment(raw).unwrap();
        assert!((j.score - 0.4).abs() < 1e-9);
        assert!(j.reasoning.is_empty());
    }

    #[test]
    fn judgment_score_is_clamped() {
        assert_eq!(parse_judgment("{\"score\": 3.5}").unwrap().score, 1.0);
        assert_eq!(parse_judgment("{\"score\": -1}").unwrap().score, 0.0);
    }

    #[test]
    fn malformed_judgments() {
        for raw in ["", "no idea", "{\"reasoning\": \"missing score\"}", "{score: high}"] {
            assert!(
                matches!(parse_judgment(raw), Err(ClassifierError::Malformed(_))),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn indices_wrapped_and_bare() {
        assert_eq!(
            parse_indices("{\"contradicted_ids\": [2, 0]}", 3).unwrap(),
            vec![0, 2]
        );
        assert_eq!(parse_indices("[1, 1, 7, -2]", 3).unwrap(), vec![1]);
        assert_eq!(
            parse_indices("```\n{\"ids\": []}\n```", 3).unwrap(),
            Vec::<usize>::new()
        );
        assert!(parse_indices("none of them", 3).is_err());
    }
}
