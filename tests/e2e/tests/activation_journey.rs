//! Retrieval journey: seeding, spreading, gating and bias.

use std::sync::Arc;

use chrono::Utc;
use engram_e2e_tests::harness;
use engram_core::activation::{spread_activation, ActivationParams, TraceGraph};
use engram_core::ids;
use engram_core::model::{EntityKind, Trace, TraceType};
use tokio_util::sync::CancellationToken;

fn insert_trace(
    store: &engram_core::Store,
    id: &str,
    summary: &str,
    trace_type: TraceType,
    embedding: Option<&[f32]>,
) {
    let now = Utc::now();
    store
        .insert_trace(&Trace {
            id: id.to_string(),
            summary: summary.to_string(),
            topic: None,
            trace_type,
            activation: 0.1,
            strength: 1,
            created_at: now,
            last_accessed: now,
            labile_until: None,
            has_embedding: false,
        })
        .unwrap();
    if let Some(vec) = embedding {
        store.set_trace_embedding(id, vec).unwrap();
    }
}

#[tokio::test]
async fn entity_bridges_activate_sibling_traces() {
    let h = harness(4);
    // Three traces with disjoint embeddings, all referencing Jane
    insert_trace(&h.store, "trace-1", "one", TraceType::Knowledge, Some(&[1.0, 0.0, 0.0, 0.0]));
    insert_trace(&h.store, "trace-2", "two", TraceType::Knowledge, Some(&[0.0, 1.0, 0.0, 0.0]));
    insert_trace(&h.store, "trace-3", "three", TraceType::Knowledge, Some(&[0.0, 0.0, 1.0, 0.0]));

    let jane = ids::entity_id("Jane");
    h.store.add_entity(&jane, "Jane", EntityKind::Person, 0.8).unwrap();
    for id in ["trace-1", "trace-2", "trace-3"] {
        h.store.link_trace_entity(id, &jane).unwrap();
    }

    let params = ActivationParams::default();
    let mut graph = TraceGraph::new(&h.store, &params);
    let activation =
        spread_activation(&mut graph, &["trace-1".to_string()], &params).unwrap();

    assert!(activation.get("trace-2").copied().unwrap_or(0.0) > 0.0);
    assert!(activation.get("trace-3").copied().unwrap_or(0.0) > 0.0);
}

#[tokio::test]
async fn unrelated_query_is_rejected_by_the_gate() {
    let h = harness(4);
    insert_trace(
        &h.store,
        "trace-only",
        "the only memory",
        TraceType::Knowledge,
        Some(&[0.9, 0.1, 0.0, 0.0]),
    );

    let cancel = CancellationToken::new();
    let results = h
        .engine
        .retrieve(&[0.0, 0.0, 0.9, 0.1], "unrelated", 10, &cancel)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn operational_traces_are_downweighted_for_design_queries() {
    let h = harness(4);
    // Both traces carry the query embedding itself: both become seeds, have
    // no edges, and finish the spread tied
    let query = [1.0f32, 0.0, 0.0, 0.0];
    insert_trace(
        &h.store,
        "trace-design",
        "decided on the layered design",
        TraceType::Knowledge,
        Some(&query),
    );
    insert_trace(
        &h.store,
        "trace-deploy",
        "deployed the api service",
        TraceType::Operational,
        Some(&query),
    );

    let cancel = CancellationToken::new();
    let results = h
        .engine
        .retrieve(&query, "tell me about the design", 10, &cancel)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    assert_eq!(results[0].trace.id, "trace-design");
    assert_eq!(results[1].trace.id, "trace-deploy");
    // Tied at 0.5 after the spread; the operational one is halved
    assert!((results[0].adjusted_activation - 0.5).abs() < 1e-9);
    assert!((results[1].adjusted_activation - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn status_queries_keep_operational_traces_in_place() {
    let h = harness(4);
    let query = [1.0f32, 0.0, 0.0, 0.0];
    insert_trace(
        &h.store,
        "trace-deploy",
        "deployed the api service",
        TraceType::Operational,
        Some(&query),
    );

    let cancel = CancellationToken::new();
    let results = h
        .engine
        .retrieve(&query, "what did we deploy today", 10, &cancel)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!((results[0].adjusted_activation - results[0].activation).abs() < 1e-9);
}

#[tokio::test]
async fn context_traces_seed_retrieval_directly() {
    let h = harness(4);
    insert_trace(&h.store, "trace-ctx", "thread context", TraceType::Knowledge, None);

    let cancel = CancellationToken::new();
    let results = h
        .engine
        .retrieve_with_context(
            &[0.0, 0.0, 0.0, 1.0],
            "completely unrelated words",
            &["trace-ctx".to_string()],
            10,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].trace.id, "trace-ctx");
}

#[tokio::test]
async fn returned_activations_stay_in_unit_range() {
    let h = harness(4);
    let query = [0.5f32, 0.5, 0.0, 0.0];
    for i in 0..12 {
        let id = format!("trace-{i}");
        insert_trace(&h.store, &id, "clustered memory", TraceType::Knowledge, Some(&query));
    }
    // Densely related cluster
    let entity = ids::entity_id("Cluster");
    h.store
        .add_entity(&entity, "Cluster", EntityKind::Org, 0.5)
        .unwrap();
    for i in 0..12 {
        h.store.link_trace_entity(&format!("trace-{i}"), &entity).unwrap();
    }

    let cancel = CancellationToken::new();
    let results = h
        .engine
        .retrieve(&query, "cluster memories", 12, &cancel)
        .await
        .unwrap();
    assert!(!results.is_empty());
    for result in &results {
        assert!(result.activation > 0.0);
        assert!(result.activation <= 1.0 + 1e-9);
    }
}

#[tokio::test]
async fn shown_traces_get_access_boost() {
    let h = harness(4);
    insert_trace(&h.store, "trace-shown", "a memory", TraceType::Knowledge, None);
    let before = h.store.get_trace("trace-shown").unwrap().unwrap();

    h.engine.mark_shown(&["trace-shown".to_string()]);

    let after = h.store.get_trace("trace-shown").unwrap().unwrap();
    assert!(after.activation > before.activation);
    assert!(after.last_accessed >= before.last_accessed);
}
