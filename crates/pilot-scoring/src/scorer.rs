//! The cost/benefit scorer.
//!
//! Produces a [`Verdict`] per candidate. Control flow is the sum type,
//! never an error path: the orchestrator pattern-matches Accept, Reject,
//! and Defer.

use crate::index_type::kind_benefit_factor;
use crate::predictive::{UtilityFeatures, UtilityModel};
use pilot_config::ScoringSettings;
use pilot_core::IndexKind;
use serde::Serialize;

/// Everything the scorer needs to know about one candidate.
#[derive(Debug, Clone)]
pub struct CandidateInputs {
    /// Target table.
    pub table: String,
    /// Columns, one for single-field candidates.
    pub fields: Vec<String>,
    /// Observed read queries per hour over the window.
    pub query_rate_per_hour: f64,
    /// Mean observed latency in milliseconds.
    pub avg_duration_ms: f64,
    /// Write share of the table's observed traffic.
    pub write_ratio: f64,
    /// Plan cost without the index.
    pub plan_cost_without: f64,
    /// Estimated plan cost with the index.
    pub plan_cost_with: f64,
    /// Whether the costs came from a real plan rather than heuristics.
    pub used_real_plan: bool,
    /// Resolved selectivity.
    pub selectivity: f64,
    /// Table row count.
    pub table_rows: f64,
    /// Estimated one-off build cost.
    pub build_cost: f64,
    /// Ongoing write-overhead penalty, same units as build cost.
    pub write_overhead_penalty: f64,
    /// Chosen physical shape.
    pub index_kind: IndexKind,
}

impl CandidateInputs {
    /// Whether this is a multi-column candidate.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Structured rationale recorded with every decision.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRationale {
    /// Benefit before factors: rate times cost delta.
    pub expected_benefit: f64,
    /// Benefit after selectivity and index-type factors.
    pub adjusted_benefit: f64,
    /// Build cost plus write-overhead penalty.
    pub adjusted_cost: f64,
    /// Learned utility score, 0.5 when the model is cold.
    pub utility_ml: f64,
    /// The combined score compared against the threshold.
    pub composite_score: f64,
    /// Effective threshold after the configured multiplier.
    pub threshold: f64,
    /// Confidence in the decision.
    pub confidence: f64,
    /// Resolved selectivity.
    pub selectivity: f64,
    /// Whether a real plan backed the numbers.
    pub used_real_plan: bool,
    /// Queries per hour over the window.
    pub query_rate_per_hour: f64,
    /// Chosen index kind.
    pub index_kind: String,
}

/// The scorer's decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    /// Create the index.
    Accept {
        /// Confidence in `[0, 1]`.
        confidence: f64,
        /// Full rationale for the audit record.
        rationale: ScoreRationale,
    },
    /// Do not create the index.
    Reject {
        /// Why the candidate was rejected.
        reason: String,
        /// Full rationale for the audit record.
        rationale: ScoreRationale,
    },
    /// Revisit on a later pass.
    Defer {
        /// Why the decision was deferred.
        reason: String,
        /// Full rationale for the audit record.
        rationale: ScoreRationale,
    },
}

impl Verdict {
    /// Whether this is an accept.
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }

    /// The rationale regardless of variant.
    #[must_use]
    pub fn rationale(&self) -> &ScoreRationale {
        match self {
            Self::Accept { rationale, .. }
            | Self::Reject { rationale, .. }
            | Self::Defer { rationale, .. } => rationale,
        }
    }
}

/// The scorer.
pub struct CandidateScorer {
    settings: ScoringSettings,
    threshold_multiplier: f64,
    model: UtilityModel,
}

impl CandidateScorer {
    /// Create a scorer from configuration.
    #[must_use]
    pub fn new(settings: ScoringSettings, threshold_multiplier: f64) -> Self {
        Self {
            settings,
            threshold_multiplier,
            model: UtilityModel::new(),
        }
    }

    /// The utility model, shared with lifecycle retraining.
    #[must_use]
    pub fn model(&self) -> &UtilityModel {
        &self.model
    }

    /// Diminishing factor applied to benefit for low selectivity.
    fn selectivity_factor(selectivity: f64) -> f64 {
        selectivity.clamp(0.0, 1.0).powf(0.25)
    }

    fn confidence(&self, inputs: &CandidateInputs) -> f64 {
        let plan_factor = if inputs.used_real_plan { 1.0 } else { 0.0 };
        let volume_factor = (inputs.query_rate_per_hour / 200.0).min(1.0);
        let confidence = 0.3
            + 0.3 * plan_factor
            + 0.2 * volume_factor
            + 0.2 * Self::selectivity_factor(inputs.selectivity);
        if inputs.used_real_plan {
            confidence.clamp(0.0, 1.0)
        } else {
            (confidence * self.settings.heuristic_confidence_factor).clamp(0.0, 1.0)
        }
    }

    /// Score one candidate.
    #[must_use]
    pub fn score(&self, inputs: &CandidateInputs) -> Verdict {
        let expected_benefit = inputs.query_rate_per_hour
            * (inputs.plan_cost_without - inputs.plan_cost_with).max(0.0);
        let selectivity_factor = Self::selectivity_factor(inputs.selectivity);
        let type_factor = kind_benefit_factor(&inputs.index_kind);
        let adjusted_benefit = expected_benefit * selectivity_factor * type_factor;
        let adjusted_cost = (inputs.build_cost + inputs.write_overhead_penalty).max(1.0);

        let benefit_ratio = adjusted_benefit / adjusted_cost;
        let features = UtilityFeatures::from_raw(
            inputs.query_rate_per_hour,
            inputs.selectivity,
            inputs.table_rows,
            inputs.write_ratio,
            benefit_ratio,
        );
        let ml_active = self.settings.ml_enabled && self.model.is_trained();
        let utility_ml = if ml_active {
            self.model.score(&features)
        } else {
            0.5
        };
        let ml_weight = if ml_active { self.settings.ml_weight } else { 0.0 };

        let composite_score =
            self.settings.heuristic_weight * benefit_ratio + ml_weight * utility_ml;
        let threshold = self.settings.threshold * self.threshold_multiplier;
        let confidence = self.confidence(inputs);

        let rationale = ScoreRationale {
            expected_benefit,
            adjusted_benefit,
            adjusted_cost,
            utility_ml,
            composite_score,
            threshold,
            confidence,
            selectivity: inputs.selectivity,
            used_real_plan: inputs.used_real_plan,
            query_rate_per_hour: inputs.query_rate_per_hour,
            index_kind: inputs.index_kind.name().to_string(),
        };

        // Low-selectivity fields only qualify as part of a composite.
        if !inputs.is_composite() && inputs.selectivity < self.settings.min_selectivity {
            return Verdict::Reject {
                reason: format!(
                    "selectivity {:.2e} below floor {:.2e}",
                    inputs.selectivity, self.settings.min_selectivity
                ),
                rationale,
            };
        }

        if composite_score < threshold {
            return Verdict::Reject {
                reason: format!(
                    "composite score {composite_score:.3} below threshold {threshold:.3}"
                ),
                rationale,
            };
        }

        if confidence < self.settings.min_confidence {
            return Verdict::Defer {
                reason: format!(
                    "confidence {confidence:.2} below minimum {:.2}",
                    self.settings.min_confidence
                ),
                rationale,
            };
        }

        Verdict::Accept {
            confidence,
            rationale,
        }
    }
}

impl std::fmt::Debug for CandidateScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateScorer")
            .field("threshold_multiplier", &self.threshold_multiplier)
            .field("model_samples", &self.model.sample_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_candidate() -> CandidateInputs {
        CandidateInputs {
            table: "users".to_string(),
            fields: vec!["email".to_string()],
            query_rate_per_hour: 500.0,
            avg_duration_ms: 120.0,
            write_ratio: 0.05,
            plan_cost_without: 1693.0,
            plan_cost_with: 8.3,
            used_real_plan: true,
            selectivity: 1.0,
            table_rows: 100_000.0,
            build_cost: 1500.0,
            write_overhead_penalty: 100.0,
            index_kind: IndexKind::BTree,
        }
    }

    fn scorer() -> CandidateScorer {
        CandidateScorer::new(ScoringSettings::default(), 1.0)
    }

    #[test]
    fn test_strong_candidate_accepted_with_high_confidence() {
        let verdict = scorer().score(&strong_candidate());
        match verdict {
            Verdict::Accept { confidence, rationale } => {
                assert!(confidence >= 0.8, "confidence was {confidence}");
                assert!(rationale.composite_score >= rationale.threshold);
                assert!(rationale.used_real_plan);
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn test_low_selectivity_boolean_rejected() {
        let mut inputs = strong_candidate();
        inputs.fields = vec!["is_active".to_string()];
        inputs.selectivity = 2.0 / 1_000_000.0;
        inputs.table_rows = 1_000_000.0;

        match scorer().score(&inputs) {
            Verdict::Reject { reason, .. } => assert!(reason.contains("selectivity")),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_low_selectivity_allowed_in_composite() {
        let mut inputs = strong_candidate();
        inputs.fields = vec!["tenant_id".to_string(), "is_active".to_string()];
        inputs.selectivity = 2.0 / 1_000_000.0;
        inputs.index_kind = IndexKind::Composite;

        // Composite candidates skip the selectivity floor; the score
        // itself still decides.
        let verdict = scorer().score(&inputs);
        assert!(!matches!(
            &verdict,
            Verdict::Reject { reason, .. } if reason.contains("selectivity")
        ));
    }

    #[test]
    fn test_no_benefit_rejected() {
        let mut inputs = strong_candidate();
        inputs.plan_cost_with = inputs.plan_cost_without;
        match scorer().score(&inputs) {
            Verdict::Reject { reason, .. } => assert!(reason.contains("score")),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_heuristic_plan_reduces_confidence() {
        let mut inputs = strong_candidate();
        inputs.used_real_plan = false;
        let verdict = scorer().score(&inputs);
        let confidence = verdict.rationale().confidence;
        assert!(confidence < 0.8, "heuristic confidence was {confidence}");
    }

    #[test]
    fn test_threshold_monotonicity() {
        // Raising the threshold can never turn a reject into an accept.
        let inputs = strong_candidate();
        let mut last_accept = true;
        for multiplier in [0.5, 1.0, 10.0, 1_000.0, 1_000_000.0] {
            let scorer = CandidateScorer::new(ScoringSettings::default(), multiplier);
            let accept = scorer.score(&inputs).is_accept();
            assert!(
                accept <= last_accept,
                "accept flipped back on at multiplier {multiplier}"
            );
            last_accept = accept;
        }
        assert!(!last_accept, "absurd threshold still accepted");
    }

    #[test]
    fn test_ml_disabled_means_pure_heuristic() {
        let settings = ScoringSettings {
            ml_enabled: false,
            ml_weight: 0.9,
            ..Default::default()
        };
        let scorer = CandidateScorer::new(settings, 1.0);
        let verdict = scorer.score(&strong_candidate());
        // With the model cold and disabled, the recorded utility stays at
        // the neutral prior and contributes nothing.
        assert!((verdict.rationale().utility_ml - 0.5).abs() < f64::EPSILON);
    }
}
