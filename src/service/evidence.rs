//! Evidence verification
//!
//! Matches a fact's claimed supporting quote against its source document.
//! Both sides are normalized (case, punctuation, whitespace) and the quote is
//! aligned against the best-matching substring of the document with a
//! semi-global edit distance, so a quote may start and end anywhere in the text.

use crate::model::{
    EvidenceVerdict, EvidenceVerification, Flag, FlagCategory, FlagSeverity, FlagSource,
    PipelineConfig,
};

/// Verifier configured with the verdict thresholds
#[derive(Debug, Clone)]
pub struct EvidenceVerifier {
    verified_threshold: f64,
    partial_threshold: f64,
}

impl EvidenceVerifier {
    pub fn new(verified_threshold: f64, partial_threshold: f64) -> Self {
        Self {
            verified_threshold,
            partial_threshold,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.evidence_verified_threshold,
            config.evidence_partial_threshold,
        )
    }

    /// Verify a quote, returning the verdict and the flag it raises (if any)
    ///
    /// A missing document or an empty quote cannot be verified and is treated
    /// as `not_found`.
    pub fn verify(&self, quote: &str, document: Option<&str>) -> (EvidenceVerification, Option<Flag>) {
        let normalized_quote = normalize_text(quote);
        let Some(document) = document else {
            let verification = EvidenceVerification {
                verdict: EvidenceVerdict::NotFound,
                score: 0.0,
                best_match: None,
            };
            let flag = not_found_flag("source document is not registered");
            return (verification, Some(flag));
        };
        if normalized_quote.is_empty() {
            let verification = EvidenceVerification {
                verdict: EvidenceVerdict::NotFound,
                score: 0.0,
                best_match: None,
            };
            return (verification, Some(not_found_flag("no evidence quote supplied")));
        }

        let normalized_doc = normalize_text(document);
        let (score, best_match) = best_match_score(&normalized_quote, &normalized_doc);
        let verdict = self.verdict_for(score);

        tracing::debug!(
            score = score,
            verdict = ?verdict,
            quote_length = normalized_quote.len(),
            "Evidence verified"
        );

        let flag = match verdict {
            EvidenceVerdict::Verified => None,
            EvidenceVerdict::PartialMatch => Some(
                Flag::new(
                    FlagSeverity::Warning,
                    FlagCategory::Evidence,
                    FlagSource::Evidence,
                    format!("Evidence paraphrased (similarity {:.2}): verify manually", score),
                )
                .with_suggestion("Compare the quote with the closest passage in the source"),
            ),
            EvidenceVerdict::NotFound => Some(not_found_flag(&format!("similarity {:.2}", score))),
        };

        (
            EvidenceVerification {
                verdict,
                score,
                best_match,
            },
            flag,
        )
    }

    fn verdict_for(&self, score: f64) -> EvidenceVerdict {
        if score >= self.verified_threshold {
            EvidenceVerdict::Verified
        } else if score >= self.partial_threshold {
            EvidenceVerdict::PartialMatch
        } else {
            EvidenceVerdict::NotFound
        }
    }
}

fn not_found_flag(detail: &str) -> Flag {
    Flag::new(
        FlagSeverity::Critical,
        FlagCategory::Evidence,
        FlagSource::Evidence,
        format!("Evidence not found, possible fabrication ({})", detail),
    )
    .with_suggestion("Locate the supporting passage or reject the fact")
}

/// Lowercase, replace punctuation with spaces and collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of the quote to its best-aligned document substring, in [0, 1]
///
/// Score is `1 - distance / quote_length`, so it falls linearly with edit distance.
pub fn best_match_score(quote: &str, document: &str) -> (f64, Option<String>) {
    if quote.is_empty() {
        return (0.0, None);
    }
    if document.contains(quote) {
        return (1.0, Some(quote.to_string()));
    }

    let q: Vec<char> = quote.chars().collect();
    let t: Vec<char> = document.chars().collect();
    let m = q.len();

    // Column j of the DP matrix: cost[i] is the distance between q[..i] and the
    // best substring of t ending at j; start[i] is where that substring begins.
    let mut cost: Vec<usize> = (0..=m).collect();
    let mut start: Vec<usize> = vec![0; m + 1];
    let mut next_cost: Vec<usize> = vec![0; m + 1];
    let mut next_start: Vec<usize> = vec![0; m + 1];
    let mut best = (cost[m], 0usize, 0usize);

    for (j, &tc) in t.iter().enumerate() {
        next_cost[0] = 0;
        next_start[0] = j + 1;
        for i in 1..=m {
            let substitution = cost[i - 1] + usize::from(q[i - 1] != tc);
            let skip_text = cost[i] + 1;
            let skip_quote = next_cost[i - 1] + 1;

            let (value, origin) = if substitution <= skip_text && substitution <= skip_quote {
                (substitution, start[i - 1])
            } else if skip_text <= skip_quote {
                (skip_text, start[i])
            } else {
                (skip_quote, next_start[i - 1])
            };
            next_cost[i] = value;
            next_start[i] = origin;
        }
        std::mem::swap(&mut cost, &mut next_cost);
        std::mem::swap(&mut start, &mut next_start);
        if cost[m] < best.0 {
            best = (cost[m], start[m], j + 1);
        }
    }

    let (distance, from, to) = best;
    let score = (1.0 - distance as f64 / m as f64).clamp(0.0, 1.0);
    let best_match = (to > from).then(|| t[from..to].iter().collect::<String>());
    (score, best_match)
}
