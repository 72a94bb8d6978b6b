//! Module coupling analysis: circular pairs, tight coupling, and layering
//! violations, computed from the batch's aggregated import weights before
//! commit.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::models::Layer;

/// A directed import edge between lower-layer and higher-layer modules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerViolation {
    pub source_module: String,
    pub source_layer: Layer,
    pub target_module: String,
    pub target_layer: Layer,
}

/// Output of one coupling pass over a batch's module imports.
#[derive(Clone, Debug, Default)]
pub struct CouplingReport {
    /// Module pairs importing each other, canonical (lexicographic) order.
    pub circular_pairs: Vec<(String, String)>,
    /// Module pairs whose combined bidirectional weight exceeds the
    /// threshold, with that weight.
    pub tight_pairs: Vec<(String, String, i64)>,
    pub violations: Vec<LayerViolation>,
    /// Architecture-insight sentences for the semantic index.
    pub insights: Vec<String>,
}

/// Analyze aggregated `(source_module, target_module, weight)` imports.
///
/// Pair aggregation keys on the canonical (lexicographically smaller first)
/// pair; insertion order plus sorted input keeps the report deterministic.
pub fn analyze_coupling(
    imports: &[(String, String, i64)],
    layers: &HashMap<String, Layer>,
    threshold: i64,
) -> CouplingReport {
    let mut sorted: Vec<&(String, String, i64)> = imports.iter().collect();
    sorted.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    // (canonical pair) -> (forward weight, backward weight)
    let mut pairs: IndexMap<(String, String), (i64, i64)> = IndexMap::new();
    for (source, target, weight) in sorted.iter() {
        if source == target {
            continue;
        }
        let (key, forward) = if source < target {
            ((source.clone(), target.clone()), true)
        } else {
            ((target.clone(), source.clone()), false)
        };
        let entry = pairs.entry(key).or_insert((0, 0));
        if forward {
            entry.0 += weight;
        } else {
            entry.1 += weight;
        }
    }

    let mut report = CouplingReport::default();
    for ((a, b), (forward, backward)) in &pairs {
        if *forward > 0 && *backward > 0 {
            report.circular_pairs.push((a.clone(), b.clone()));
            report
                .insights
                .push(format!("Modules {a} and {b} import each other (circular dependency)."));
        }
        let combined = forward + backward;
        if combined > threshold {
            report.tight_pairs.push((a.clone(), b.clone(), combined));
            report.insights.push(format!(
                "Modules {a} and {b} are tightly coupled (combined import weight {combined})."
            ));
        }
    }

    for (source, target, _) in sorted {
        let source_layer = layers.get(source).copied().unwrap_or(Layer::Unknown);
        let target_layer = layers.get(target).copied().unwrap_or(Layer::Unknown);
        let (Some(source_rank), Some(target_rank)) = (source_layer.rank(), target_layer.rank())
        else {
            continue;
        };
        // Higher rank number = lower layer; a lower layer reaching up into a
        // higher one inverts the dependency direction.
        if source_rank > target_rank {
            report.insights.push(format!(
                "Layer violation: {}-layer module {source} depends on {}-layer module {target}.",
                source_layer.as_str(),
                target_layer.as_str(),
            ));
            report.violations.push(LayerViolation {
                source_module: source.clone(),
                source_layer,
                target_module: target.clone(),
                target_layer,
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports(edges: &[(&str, &str, i64)]) -> Vec<(String, String, i64)> {
        edges
            .iter()
            .map(|(a, b, w)| (a.to_string(), b.to_string(), *w))
            .collect()
    }

    #[test]
    fn mutual_imports_are_circular() {
        let report = analyze_coupling(
            &imports(&[("mod_a", "mod_b", 2), ("mod_b", "mod_a", 1)]),
            &HashMap::new(),
            5,
        );
        assert_eq!(report.circular_pairs, vec![("mod_a".to_string(), "mod_b".to_string())]);
        assert!(report.tight_pairs.is_empty());
    }

    #[test]
    fn combined_weight_over_threshold_is_tight() {
        let report = analyze_coupling(
            &imports(&[("mod_a", "mod_b", 4), ("mod_b", "mod_a", 3)]),
            &HashMap::new(),
            5,
        );
        assert_eq!(
            report.tight_pairs,
            vec![("mod_a".to_string(), "mod_b".to_string(), 7)]
        );
    }

    #[test]
    fn one_way_imports_below_threshold_are_clean() {
        let report = analyze_coupling(&imports(&[("mod_a", "mod_b", 5)]), &HashMap::new(), 5);
        assert!(report.circular_pairs.is_empty());
        assert!(report.tight_pairs.is_empty());
        assert!(report.insights.is_empty());
    }

    #[test]
    fn lower_layer_depending_on_higher_is_a_violation() {
        let mut layers = HashMap::new();
        layers.insert("store".to_string(), Layer::Data);
        layers.insert("routes".to_string(), Layer::Api);
        layers.insert("engine".to_string(), Layer::Core);

        let report = analyze_coupling(
            &imports(&[("store", "routes", 1), ("routes", "engine", 1)]),
            &layers,
            5,
        );
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].source_module, "store");
        assert_eq!(report.violations[0].target_layer, Layer::Api);
    }

    #[test]
    fn unknown_layers_never_flag_violations() {
        let report = analyze_coupling(&imports(&[("a", "b", 1)]), &HashMap::new(), 5);
        assert!(report.violations.is_empty());
    }
}
