//! Consolidation journey: episodes in, traces out.

use engram_e2e_tests::{episode, harness};
use engram_core::EPHEMERAL_TRACE_ID;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn three_related_episodes_become_one_trace() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-1", "thinking about the database schema", 0))
        .await
        .unwrap();
    h.engine
        .add_episode(episode("ep-2", "the schema needs a migrations table", 5))
        .await
        .unwrap();
    h.engine
        .add_episode(episode("ep-3", "wrote the first schema migration today", 10))
        .await
        .unwrap();

    // Script the edge-inference window
    h.model.push_response(
        r#"```json
{"edges":[
  {"from_id":"ep-1","to_id":"ep-2","relationship":"same design thread","confidence":0.9},
  {"from_id":"ep-2","to_id":"ep-3","relationship":"follow-up","confidence":0.8}
]}
```"#,
    );

    let cancel = CancellationToken::new();
    let report = h.engine.consolidate(&cancel).await.unwrap();
    assert_eq!(report.traces_created, 1);
    assert_eq!(report.inferred_edges, 2);

    let trace_ids = h.store.all_trace_ids().unwrap();
    assert_eq!(trace_ids.len(), 1);

    let trace = h.store.get_trace(&trace_ids[0]).unwrap().unwrap();
    assert_eq!(trace.strength, 3);
    assert!(trace.activation > 0.0 && trace.activation <= 1.0);

    let mut sources = h.store.trace_sources(&trace_ids[0]).unwrap();
    sources.sort();
    assert_eq!(sources, vec!["ep-1", "ep-2", "ep-3"]);

    // The trace got its own cascaded pyramid
    for level in engram_core::pyramid::LEVELS {
        let summary = h.store.get_trace_summary(&trace_ids[0], level).unwrap();
        assert!(summary.is_some(), "missing trace summary at L{}", level);
    }
}

#[tokio::test]
async fn countdown_message_is_linked_to_the_ephemeral_sentinel() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-meet", "Meeting in 5 minutes and 30 seconds", 0))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let report = h.engine.consolidate(&cancel).await.unwrap();
    assert_eq!(report.traces_created, 0);
    assert_eq!(report.ephemeral_skips, 1);

    // No non-sentinel trace exists
    assert!(h.store.all_trace_ids().unwrap().is_empty());
    assert_eq!(
        h.store.trace_sources(EPHEMERAL_TRACE_ID).unwrap(),
        vec!["ep-meet".to_string()]
    );

    // And the episode will not be reconsidered
    assert_eq!(h.store.count_unconsolidated_episodes().unwrap(), 0);
    let rerun = h.engine.consolidate(&cancel).await.unwrap();
    assert_eq!(rerun.episodes_scanned, 0);
}

#[tokio::test]
async fn consolidation_is_idempotent_without_new_episodes() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-a", "we chose rust for the rewrite", 0))
        .await
        .unwrap();
    h.engine
        .add_episode(episode("ep-b", "the rewrite starts next sprint", 5))
        .await
        .unwrap();
    h.model.push_response(
        r#"{"edges":[{"from_id":"ep-a","to_id":"ep-b","relationship":"same project","confidence":0.85}]}"#,
    );

    let cancel = CancellationToken::new();
    h.engine.consolidate(&cancel).await.unwrap();
    let count_after_first = h.store.all_trace_ids().unwrap().len();
    assert_eq!(count_after_first, 1);

    let second = h.engine.consolidate(&cancel).await.unwrap();
    assert_eq!(second.traces_created, 0);
    assert_eq!(h.store.all_trace_ids().unwrap().len(), count_after_first);
}

#[tokio::test]
async fn unparseable_window_output_still_consolidates_singletons() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-x", "first topic entirely alone here", 0))
        .await
        .unwrap();
    h.engine
        .add_episode(episode("ep-y", "second topic also standing alone", 5))
        .await
        .unwrap();
    h.model.push_response("I could not find any structure, sorry!");

    let cancel = CancellationToken::new();
    let report = h.engine.consolidate(&cancel).await.unwrap();
    assert_eq!(report.windows_skipped, 1);
    assert_eq!(report.traces_created, 2);
    assert_eq!(h.store.count_unconsolidated_episodes().unwrap(), 0);
}
