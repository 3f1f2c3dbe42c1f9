//! Aggregate AI confidence of a fact

use crate::model::{EvidenceVerification, Flag, FlagSeverity};

/// Confidence deduction per open flag, before the flag's own weight
fn severity_penalty(severity: FlagSeverity) -> f64 {
    match severity {
        FlagSeverity::Info => 0.0,
        FlagSeverity::Warning => 0.05,
        FlagSeverity::Error => 0.15,
        FlagSeverity::Critical => 0.30,
    }
}

/// Evidence score minus the weighted penalties of all unresolved flags
///
/// Without an evidence verdict the fact starts from a neutral 0.5.
pub fn aggregate_confidence(evidence: Option<&EvidenceVerification>, flags: &[Flag]) -> f64 {
    let base = evidence.map(|e| e.score).unwrap_or(0.5);
    let penalty: f64 = flags
        .iter()
        .filter(|f| !f.resolved)
        .map(|f| severity_penalty(f.severity) * f.weight)
        .sum();
    (base - penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvidenceVerdict, FlagCategory, FlagSource};

    fn create_test_evidence(score: f64) -> EvidenceVerification {
        EvidenceVerification {
            verdict: EvidenceVerdict::Verified,
            score,
            best_match: None,
        }
    }

    fn flag(severity: FlagSeverity, source: FlagSource) -> Flag {
        Flag::new(severity, FlagCategory::Consistency, source, "issue")
    }

    #[test]
    fn test_flags_reduce_confidence_by_severity() {
        let evidence = create_test_evidence(1.0);
        let flags = vec![
            flag(FlagSeverity::Warning, FlagSource::Category),
            flag(FlagSeverity::Error, FlagSource::Domain),
        ];
        let confidence = aggregate_confidence(Some(&evidence), &flags);
        assert!((confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_adversarial_flags_weigh_less_than_direct_flags() {
        let evidence = create_test_evidence(0.9);
        let direct = vec![flag(FlagSeverity::Warning, FlagSource::CrossDomain)];
        let speculative = vec![flag(FlagSeverity::Warning, FlagSource::Adversarial).with_weight(0.5 * 0.8)];
        assert!(
            aggregate_confidence(Some(&evidence), &speculative)
                > aggregate_confidence(Some(&evidence), &direct)
        );
    }

    #[test]
    fn test_resolved_flags_are_ignored_and_result_is_clamped() {
        let mut resolved = flag(FlagSeverity::Critical, FlagSource::Evidence);
        resolved.resolve("alice");
        assert_eq!(aggregate_confidence(Some(&create_test_evidence(0.7)), &[resolved]), 0.7);

        let critical = vec![
            flag(FlagSeverity::Critical, FlagSource::Evidence),
            flag(FlagSeverity::Critical, FlagSource::Manual),
        ];
        assert_eq!(aggregate_confidence(Some(&create_test_evidence(0.2)), &critical), 0.0);
        assert_eq!(aggregate_confidence(None, &[]), 0.5);
    }
}
