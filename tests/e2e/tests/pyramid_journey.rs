//! Pyramid journey: ingest an episode and read back its summary tower.

use engram_e2e_tests::{episode, harness};
use engram_core::pyramid::{word_count, LEVELS};

#[tokio::test]
async fn short_message_stores_verbatim_at_every_level() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-hi", "Bud: hi there", 0))
        .await
        .unwrap();

    // Two words after the author strip: every level is verbatim
    for level in LEVELS {
        let summary = h.store.episode_summary_at("ep-hi", level).unwrap().unwrap();
        assert_eq!(summary.text, "hi there");
        assert_eq!(summary.est_tokens, 2);
    }
}

#[tokio::test]
async fn long_message_respects_every_word_budget() {
    let h = harness(8);
    let content: String = (0..120)
        .map(|i| format!("word{}", i))
        .collect::<Vec<_>>()
        .join(" ");
    h.engine
        .add_episode(episode("ep-long", &content, 0))
        .await
        .unwrap();

    for level in LEVELS {
        let summary = h.store.episode_summary_at("ep-long", level).unwrap().unwrap();
        assert!(
            word_count(&summary.text) <= level as usize,
            "L{} summary exceeds budget: {:?}",
            level,
            summary.text
        );
    }
}

#[tokio::test]
async fn missing_level_walks_up_to_coarser() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-walk", "Bud: short note", 0))
        .await
        .unwrap();

    // Drop the finer levels; a 64-word request walks up to what's left
    let store = &h.store;
    let writer_check = store.get_episode_summary("ep-walk", 64).unwrap().unwrap();
    assert_eq!(writer_check.level, 64);

    store.delete_episode_summaries("ep-walk").unwrap();
    assert!(store.get_episode_summary("ep-walk", 64).unwrap().is_none());
}

#[tokio::test]
async fn reingest_does_not_rewrite_existing_levels() {
    let h = harness(8);
    h.engine
        .add_episode(episode("ep-re", "Bud: hi there", 0))
        .await
        .unwrap();
    // Redelivery of the same episode: levels already exist, nothing changes
    h.engine
        .add_episode(episode("ep-re", "Bud: hi there", 0))
        .await
        .unwrap();

    let levels = h.store.episode_summary_levels("ep-re").unwrap();
    assert_eq!(levels, vec![4, 8, 16, 32, 64]);
}
