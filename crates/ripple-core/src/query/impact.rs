//! Impact analysis: "what breaks if I change this function?"
//!
//! Deterministic for a fixed graph snapshot: caller ordering comes from the
//! store's (weight DESC, id ASC) contract and the score is pure arithmetic
//! over it.

use std::collections::BTreeSet;

use rusqlite::Connection;

use crate::config::EngineConfig;
use crate::errors::{RippleError, RippleResult};
use crate::models::{ChangeType, DirectCaller, ImpactAnalysis, NodeKind, RiskBucket};
use crate::query::guards::{clamp_depth, MAX_TRACE_DEPTH};
use crate::store::{graph, vector};

/// Score the risk of changing `target_id`.
///
/// Direct callers come from `find_callers`; transitive callers from a
/// bounded reverse walk; the coverage term counts direct callers referenced
/// by at least one `test` chunk. The score
/// `w_d * direct + w_t * transitive - w_c * coverage_ratio` is clamped to
/// `[0, +inf)` and bucketed LOW (<1), MEDIUM (1-3), HIGH (>3).
pub fn analyze_impact(
    conn: &Connection,
    config: &EngineConfig,
    target_id: &str,
    change_type: ChangeType,
) -> RippleResult<ImpactAnalysis> {
    let target = graph::get_node(conn, target_id)?
        .ok_or_else(|| RippleError::Query(format!("target not found: {target_id}")))?;
    if target.kind != NodeKind::Function {
        return Err(RippleError::Query(format!(
            "impact analysis targets functions, {} is a {}",
            target_id,
            target.kind.as_str()
        )));
    }

    let callers = graph::find_callers(conn, target_id)?;
    let mut direct_callers = Vec::with_capacity(callers.len());
    let mut covered = 0usize;
    for caller in &callers {
        let has_test = vector::has_test_reference(conn, &target.repo_id, &caller.node.name)?;
        if has_test {
            covered += 1;
        }
        direct_callers.push(DirectCaller {
            id: caller.node.id.clone(),
            name: caller.node.name.clone(),
            file_path: caller.node.file_path.clone(),
            call_count: caller.call_count,
            signature_sensitive: caller.arg_calls > 0,
            return_sensitive: caller.return_calls > 0,
            has_test,
        });
    }

    let depth = clamp_depth(config.impact_depth, MAX_TRACE_DEPTH);
    let (walked, truncated) = graph::trace_callers(conn, target_id, depth)?;
    // Depth-1 entries are the direct callers; everything deeper is
    // transitive.
    let transitive_caller_ids: Vec<String> = walked
        .iter()
        .filter(|(_, d)| *d > 1)
        .map(|(id, _)| id.clone())
        .collect();

    let test_coverage_ratio = if direct_callers.is_empty() {
        0.0
    } else {
        covered as f64 / direct_callers.len() as f64
    };

    let weights = &config.impact_weights;
    let raw_score = weights.direct * direct_callers.len() as f64
        + weights.transitive * transitive_caller_ids.len() as f64
        - weights.coverage * test_coverage_ratio;
    let risk_score = raw_score.max(0.0);

    let mut affected_files: BTreeSet<String> = BTreeSet::new();
    affected_files.insert(target.file_path.clone());
    for caller in &direct_callers {
        affected_files.insert(caller.file_path.clone());
    }
    for id in &transitive_caller_ids {
        if let Some(node) = graph::get_node(conn, id)? {
            affected_files.insert(node.file_path);
        }
    }

    Ok(ImpactAnalysis {
        target_id: target.id,
        target_name: target.name,
        change_type,
        risk: RiskBucket::from_score(risk_score),
        risk_score,
        direct_callers,
        transitive_caller_ids,
        test_coverage_ratio,
        affected_files: affected_files.into_iter().collect(),
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{chunk_id, symbol_node_id, Chunk, ChunkKind, EdgeKind, EdgeSpec, Layer, Node};
    use crate::store::Database;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    fn function_node(name: &str) -> Node {
        Node {
            id: symbol_node_id("r1", "src/lib.py", name),
            repo_id: "r1".to_string(),
            kind: NodeKind::Function,
            name: name.to_string(),
            language: "python".to_string(),
            file_path: "src/lib.py".to_string(),
            start_line: 1,
            end_line: 5,
            layer: Layer::Unknown,
            metrics: serde_json::Value::Null,
            content_hash: "h".to_string(),
        }
    }

    fn add_caller(conn: &rusqlite::Connection, target: &Node, name: &str, args: i64, rets: i64) {
        let caller = function_node(name);
        graph::upsert_node(conn, &caller).unwrap();
        let mut edge = EdgeSpec::node("r1", &caller.id, &target.id, EdgeKind::Calls);
        edge.weight = 1;
        edge.arg_calls = args;
        edge.return_calls = rets;
        graph::upsert_edge(conn, &edge).unwrap();
    }

    fn add_test_chunk(conn: &rusqlite::Connection, referencing: &str) {
        let text = format!("def test_x():\n    {referencing}()\n");
        let chunk = Chunk {
            id: chunk_id("r1", "tests/test_x.py", 0, text.len() as i64, ChunkKind::Test),
            repo_id: "r1".to_string(),
            file_path: "tests/test_x.py".to_string(),
            symbol: None,
            kind: ChunkKind::Test,
            language: "python".to_string(),
            layer: Layer::Unknown,
            byte_start: 0,
            byte_end: text.len() as i64,
            text,
        };
        vector::upsert_chunk(conn, &chunk, &[1.0, 0.0]).unwrap();
    }

    fn run(conn: &rusqlite::Connection, target: &Node) -> ImpactAnalysis {
        analyze_impact(conn, &EngineConfig::default(), &target.id, ChangeType::Signature).unwrap()
    }

    #[test]
    fn no_callers_is_low_risk() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("lonely");
        graph::upsert_node(&conn, &target).unwrap();
        let impact = run(&conn, &target);
        assert_eq!(impact.risk, RiskBucket::Low);
        assert_eq!(impact.risk_score, 0.0);
        assert!(impact.direct_callers.is_empty());
    }

    #[test]
    fn more_callers_never_decrease_risk() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("target");
        graph::upsert_node(&conn, &target).unwrap();

        let mut previous = 0.0;
        for i in 0..6 {
            add_caller(&conn, &target, &format!("caller_{i}"), 1, 0);
            let impact = run(&conn, &target);
            assert!(
                impact.risk_score >= previous,
                "risk dropped from {previous} to {} after adding a caller",
                impact.risk_score
            );
            previous = impact.risk_score;
        }
        assert_eq!(run(&conn, &target).risk, RiskBucket::Medium);
    }

    #[test]
    fn test_coverage_never_increases_risk() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("covered_target");
        graph::upsert_node(&conn, &target).unwrap();
        add_caller(&conn, &target, "caller_a", 1, 1);
        add_caller(&conn, &target, "caller_b", 1, 0);

        let before = run(&conn, &target);
        add_test_chunk(&conn, "caller_a");
        let after = run(&conn, &target);
        assert!(after.risk_score <= before.risk_score);
        assert_eq!(after.test_coverage_ratio, 0.5);
        assert!(after.direct_callers.iter().any(|c| c.has_test));
    }

    #[test]
    fn sensitivity_flags_follow_call_site_facts() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("flagged");
        graph::upsert_node(&conn, &target).unwrap();
        add_caller(&conn, &target, "arg_passer", 2, 0);
        add_caller(&conn, &target, "result_user", 0, 3);

        let impact = run(&conn, &target);
        let arg_passer = impact.direct_callers.iter().find(|c| c.name == "arg_passer").unwrap();
        assert!(arg_passer.signature_sensitive);
        assert!(!arg_passer.return_sensitive);
        let result_user = impact.direct_callers.iter().find(|c| c.name == "result_user").unwrap();
        assert!(!result_user.signature_sensitive);
        assert!(result_user.return_sensitive);
    }

    #[test]
    fn transitive_callers_are_separated_from_direct() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("deep_target");
        let direct = function_node("direct_caller");
        let indirect = function_node("indirect_caller");
        for node in [&target, &direct, &indirect] {
            graph::upsert_node(&conn, node).unwrap();
        }
        graph::upsert_edge(&conn, &EdgeSpec::node("r1", &direct.id, &target.id, EdgeKind::Calls))
            .unwrap();
        graph::upsert_edge(&conn, &EdgeSpec::node("r1", &indirect.id, &direct.id, EdgeKind::Calls))
            .unwrap();

        let impact = run(&conn, &target);
        assert_eq!(impact.direct_callers.len(), 1);
        assert_eq!(impact.transitive_caller_ids, vec![indirect.id.clone()]);
        assert!(!impact.truncated);
        assert_eq!(impact.affected_files, vec!["src/lib.py".to_string()]);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("stable");
        graph::upsert_node(&conn, &target).unwrap();
        add_caller(&conn, &target, "caller_x", 1, 1);
        add_caller(&conn, &target, "caller_y", 1, 0);

        let first = run(&conn, &target);
        let second = run(&conn, &target);
        assert_eq!(first.risk_score, second.risk_score);
        let order_a: Vec<&str> = first.direct_callers.iter().map(|c| c.name.as_str()).collect();
        let order_b: Vec<&str> = second.direct_callers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn non_function_target_is_a_query_error() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let mut node = function_node("a_class");
        node.kind = NodeKind::Class;
        graph::upsert_node(&conn, &node).unwrap();
        let err = analyze_impact(&conn, &EngineConfig::default(), &node.id, ChangeType::Deletion)
            .unwrap_err();
        assert!(matches!(err, RippleError::Query(_)));
    }
}
