//! Episode operations

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::model::{Episode, EpisodeInput, Summary};
use crate::pyramid::LEVELS;
use crate::vector;

use super::Store;

impl Store {
    /// Upsert an episode. Content is immutable: a re-delivered episode keeps
    /// its original content but refreshes metadata.
    pub fn add_episode(&self, input: &EpisodeInput) -> Result<Episode> {
        let now = Utc::now();
        let occurred_at = input.occurred_at.unwrap_or(now);

        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO episodes (
                    id, content, source, author, channel,
                    occurred_at, ingested_at, dialogue_act,
                    entropy_score, token_count, reply_to, has_embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)
                ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    author = excluded.author,
                    channel = excluded.channel,
                    occurred_at = excluded.occurred_at,
                    dialogue_act = excluded.dialogue_act,
                    entropy_score = excluded.entropy_score,
                    token_count = excluded.token_count,
                    reply_to = excluded.reply_to",
                params![
                    input.id,
                    input.content,
                    input.source,
                    input.author,
                    input.channel,
                    occurred_at.to_rfc3339(),
                    now.to_rfc3339(),
                    input.dialogue_act,
                    input.entropy_score,
                    input.token_count,
                    input.reply_to,
                ],
            )?;
        }

        self.get_episode(&input.id)?
            .ok_or_else(|| crate::error::EngineError::NotFound(input.id.clone()))
    }

    /// Get an episode by ID. Missing rows are `Ok(None)`.
    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT * FROM episodes WHERE id = ?1")?;
        let episode = stmt
            .query_row(params![id], Self::row_to_episode)
            .optional()?;
        Ok(episode)
    }

    /// Batch get. Unreadable rows are skipped, never failing the batch.
    pub fn get_episodes(&self, ids: &[String]) -> Result<Vec<Episode>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT * FROM episodes WHERE id = ?1")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match stmt.query_row(params![id], Self::row_to_episode).optional() {
                Ok(Some(ep)) => out.push(ep),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable episode {}: {}", id, e),
            }
        }
        Ok(out)
    }

    /// All episode IDs in ingest order (worker enumeration).
    pub fn all_episode_ids(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare_cached("SELECT id FROM episodes ORDER BY ingested_at ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Episodes not yet linked to any trace (including the ephemeral
    /// sentinel), oldest event first.
    pub fn get_unconsolidated_episodes(&self, limit: usize) -> Result<Vec<Episode>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT e.* FROM episodes e
             LEFT JOIN trace_sources ts ON ts.episode_id = e.id
             WHERE ts.episode_id IS NULL
             ORDER BY e.occurred_at ASC
             LIMIT ?1",
        )?;
        let episodes = stmt
            .query_map(params![limit as i64], Self::row_to_episode)?
            .filter_map(|r| match r {
                Ok(ep) => Some(ep),
                Err(e) => {
                    tracing::warn!("Skipping unreadable episode row: {}", e);
                    None
                }
            })
            .collect();
        Ok(episodes)
    }

    /// Count of episodes awaiting consolidation.
    pub fn count_unconsolidated_episodes(&self) -> Result<i64> {
        let reader = self.reader()?;
        let count = reader.query_row(
            "SELECT COUNT(*) FROM episodes e
             LEFT JOIN trace_sources ts ON ts.episode_id = e.id
             WHERE ts.episode_id IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Store an episode embedding. The vector is L2-normalized before
    /// serialization; embeddings are filled once per episode.
    pub fn set_episode_embedding(&self, episode_id: &str, vector: &[f32]) -> Result<()> {
        let mut normalized = vector.to_vec();
        vector::l2_normalize(&mut normalized);
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO episode_embeddings (episode_id, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                episode_id,
                vector::to_bytes(&normalized),
                normalized.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        writer.execute(
            "UPDATE episodes SET has_embedding = 1 WHERE id = ?1",
            params![episode_id],
        )?;
        Ok(())
    }

    /// Embedding for one episode, if present.
    pub fn get_episode_embedding(&self, episode_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM episode_embeddings WHERE episode_id = ?1",
                params![episode_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| vector::from_bytes(&b)))
    }

    /// Embeddings for a batch of episodes; torn blobs are skipped.
    pub fn get_episode_embeddings(&self, ids: &[String]) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT embedding FROM episode_embeddings WHERE episode_id = ?1",
        )?;
        let mut out = Vec::new();
        for id in ids {
            let bytes: Option<Vec<u8>> = stmt
                .query_row(params![id], |row| row.get(0))
                .optional()?;
            if let Some(v) = bytes.and_then(|b| vector::from_bytes(&b)) {
                out.push((id.clone(), v));
            }
        }
        Ok(out)
    }

    /// Write one pyramid level for an episode (overwrites).
    pub fn put_episode_summary(&self, summary: &Summary) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO episode_summaries (episode_id, level, text, est_tokens)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    summary.owner_id,
                    summary.level as i64,
                    summary.text,
                    summary.est_tokens
                ],
            )?;
        }
        self.cache_summary(&summary.owner_id, summary.level, &summary.text);
        Ok(())
    }

    /// Exact-level summary read; no walk-up.
    pub fn episode_summary_at(&self, episode_id: &str, level: u8) -> Result<Option<Summary>> {
        let reader = self.reader()?;
        let row = reader
            .query_row(
                "SELECT text, est_tokens FROM episode_summaries
                 WHERE episode_id = ?1 AND level = ?2",
                params![episode_id, level as i64],
                |row| {
                    Ok(Summary {
                        owner_id: episode_id.to_string(),
                        level,
                        text: row.get(0)?,
                        est_tokens: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Summary at the requested level, walking up to more-compressed levels
    /// when it is missing. Returns `Ok(None)` when no level exists at all;
    /// the caller falls back to verbatim content.
    pub fn get_episode_summary(&self, episode_id: &str, level: u8) -> Result<Option<Summary>> {
        for candidate in LEVELS.iter().rev().filter(|l| **l <= level) {
            if let Some(text) = self.cached_summary(episode_id, *candidate) {
                return Ok(Some(Summary {
                    owner_id: episode_id.to_string(),
                    level: *candidate,
                    text: text.clone(),
                    est_tokens: crate::pyramid::estimate_tokens(&text),
                }));
            }
            if let Some(summary) = self.episode_summary_at(episode_id, *candidate)? {
                self.cache_summary(episode_id, *candidate, &summary.text);
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }

    /// Pyramid levels present for an episode, ascending.
    pub fn episode_summary_levels(&self, episode_id: &str) -> Result<Vec<u8>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT level FROM episode_summaries WHERE episode_id = ?1 ORDER BY level ASC",
        )?;
        let levels = stmt
            .query_map(params![episode_id], |row| row.get::<_, i64>(0))?
            .filter_map(|r| r.ok())
            .map(|l| l as u8)
            .collect();
        Ok(levels)
    }

    /// Drop all pyramid levels for an episode (worker `--wipe`).
    pub fn delete_episode_summaries(&self, episode_id: &str) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "DELETE FROM episode_summaries WHERE episode_id = ?1",
                params![episode_id],
            )?;
        }
        self.evict_summaries(episode_id);
        Ok(())
    }

    pub(crate) fn row_to_episode(row: &rusqlite::Row) -> rusqlite::Result<Episode> {
        let occurred_at: String = row.get("occurred_at")?;
        let ingested_at: String = row.get("ingested_at")?;
        let has_embedding: i64 = row.get("has_embedding")?;

        Ok(Episode {
            id: row.get("id")?,
            content: row.get("content")?,
            source: row.get("source")?,
            author: row.get("author")?,
            channel: row.get("channel")?,
            occurred_at: Self::parse_timestamp(&occurred_at, "occurred_at")?,
            ingested_at: Self::parse_timestamp(&ingested_at, "ingested_at")?,
            dialogue_act: row.get("dialogue_act")?,
            entropy_score: row.get("entropy_score")?,
            token_count: row.get("token_count")?,
            reply_to: row.get("reply_to")?,
            has_embedding: has_embedding == 1,
        })
    }
}
