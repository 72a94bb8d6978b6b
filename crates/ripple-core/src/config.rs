//! Engine configuration.
//!
//! Every tunable that the analysis and query layers consume lives here, with
//! defaults matching the documented policy. The risk-score weights are
//! configuration, not constants: they are a retrieval policy that deployments
//! are expected to calibrate.

use serde::Deserialize;

/// Weights of the impact risk formula:
/// `risk = direct * direct_callers + transitive * transitive_callers
///         - coverage * test_coverage_ratio`, clamped to `[0, +inf)`.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ImpactWeights {
    pub direct: f64,
    pub transitive: f64,
    pub coverage: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            direct: 0.5,
            transitive: 0.2,
            coverage: 0.3,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Risk formula weights.
    pub impact_weights: ImpactWeights,
    /// Depth bound for transitive caller expansion during impact analysis.
    pub impact_depth: i64,
    /// Combined bidirectional import weight above which a module pair is
    /// flagged as tightly coupled.
    pub coupling_threshold: i64,
    /// Attempt budget for the embedding collaborator before a chunk is
    /// parked on the retry queue.
    pub embed_max_attempts: u32,
    /// Base backoff between embedding attempts, doubled per retry.
    pub embed_backoff_ms: u64,
    /// Worker threads for the parse phase. `0` means one per available core.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            impact_weights: ImpactWeights::default(),
            impact_depth: 3,
            coupling_threshold: 5,
            embed_max_attempts: 3,
            embed_backoff_ms: 50,
            workers: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.impact_weights.direct, 0.5);
        assert_eq!(config.impact_weights.transitive, 0.2);
        assert_eq!(config.impact_weights.coverage, 0.3);
        assert_eq!(config.impact_depth, 3);
        assert_eq!(config.coupling_threshold, 5);
    }

    #[test]
    fn deserializes_partial_overrides() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"coupling_threshold": 9, "impact_weights": {"direct": 1.0}}"#)
                .unwrap();
        assert_eq!(config.coupling_threshold, 9);
        assert_eq!(config.impact_weights.direct, 1.0);
        assert_eq!(config.impact_weights.transitive, 0.2);
    }
}
