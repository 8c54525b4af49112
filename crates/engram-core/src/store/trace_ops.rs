//! Trace operations

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::model::{Summary, Trace, TraceType};
use crate::pyramid::LEVELS;
use crate::vector;

use super::Store;

impl Store {
    /// Insert a freshly materialized trace.
    pub fn insert_trace(&self, trace: &Trace) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO traces (
                id, summary, topic, trace_type, activation, strength,
                created_at, last_accessed, labile_until, has_embedding
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trace.id,
                trace.summary,
                trace.topic,
                trace.trace_type.as_str(),
                trace.activation,
                trace.strength,
                trace.created_at.to_rfc3339(),
                trace.last_accessed.to_rfc3339(),
                trace.labile_until.map(|t| t.to_rfc3339()),
                trace.has_embedding as i64,
            ],
        )?;
        Ok(())
    }

    /// Get a trace by ID. Missing rows are `Ok(None)`.
    pub fn get_trace(&self, id: &str) -> Result<Option<Trace>> {
        let reader = self.reader()?;
        let trace = reader
            .query_row("SELECT * FROM traces WHERE id = ?1", params![id], |row| {
                Self::row_to_trace(row)
            })
            .optional()?;
        Ok(trace)
    }

    /// Batch hydrate traces; unreadable rows are skipped.
    pub fn get_traces(&self, ids: &[String]) -> Result<Vec<Trace>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT * FROM traces WHERE id = ?1")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match stmt.query_row(params![id], Self::row_to_trace).optional() {
                Ok(Some(trace)) => out.push(trace),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable trace {}: {}", id, e),
            }
        }
        Ok(out)
    }

    /// Store a trace embedding (L2-normalized) and refresh the ANN index.
    pub fn set_trace_embedding(&self, trace_id: &str, vec: &[f32]) -> Result<()> {
        let mut normalized = vec.to_vec();
        vector::l2_normalize(&mut normalized);
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO trace_embeddings (trace_id, embedding, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    trace_id,
                    vector::to_bytes(&normalized),
                    normalized.len() as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            writer.execute(
                "UPDATE traces SET has_embedding = 1 WHERE id = ?1",
                params![trace_id],
            )?;
        }

        #[cfg(feature = "vector-search")]
        {
            match self.trace_index.lock() {
                Ok(mut index) => {
                    if let Err(e) = index.upsert(trace_id, &normalized) {
                        tracing::warn!("Vector index upsert failed for {}: {}", trace_id, e);
                    }
                }
                Err(_) => tracing::warn!("Vector index lock poisoned; skipping {}", trace_id),
            }
        }

        Ok(())
    }

    /// Embedding for one trace, if present.
    pub fn get_trace_embedding(&self, trace_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.reader()?;
        let bytes: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM trace_embeddings WHERE trace_id = ?1",
                params![trace_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| vector::from_bytes(&b)))
    }

    /// All trace embeddings; torn blobs are skipped.
    pub fn all_trace_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT trace_id, embedding FROM trace_embeddings")?;
        let out = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, bytes)| vector::from_bytes(&bytes).map(|v| (id, v)))
            .collect();
        Ok(out)
    }

    /// Rebuild the in-memory ANN index from stored blobs (called at open).
    #[cfg(feature = "vector-search")]
    pub(crate) fn load_trace_embeddings_into_index(&self) -> Result<()> {
        let embeddings = self.all_trace_embeddings()?;
        let mut index = self
            .trace_index
            .lock()
            .map_err(|_| crate::error::EngineError::Init("Vector index lock poisoned".into()))?;
        for (trace_id, vec) in embeddings {
            if vec.len() != self.embedding_dim {
                tracing::warn!(
                    "Skipping {}: stored dimensions {} != configured {}",
                    trace_id,
                    vec.len(),
                    self.embedding_dim
                );
                continue;
            }
            if let Err(e) = index.upsert(&trace_id, &vec) {
                tracing::warn!("Failed to index embedding for {}: {}", trace_id, e);
            }
        }
        Ok(())
    }

    /// Link a trace to a source episode. The ephemeral sentinel is a valid
    /// trace_id here even though it has no trace row.
    pub fn link_trace_source(&self, trace_id: &str, episode_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO trace_sources (trace_id, episode_id) VALUES (?1, ?2)",
            params![trace_id, episode_id],
        )?;
        Ok(())
    }

    /// Link a trace to an entity it covers.
    pub fn link_trace_entity(&self, trace_id: &str, entity_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO trace_entities (trace_id, entity_id) VALUES (?1, ?2)",
            params![trace_id, entity_id],
        )?;
        Ok(())
    }

    /// Source episode IDs for a trace, in insertion order.
    pub fn trace_sources(&self, trace_id: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT episode_id FROM trace_sources WHERE trace_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![trace_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Entity IDs linked to a trace.
    pub fn trace_entities(&self, trace_id: &str) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT entity_id FROM trace_entities WHERE trace_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![trace_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Write one pyramid level for a trace (overwrites; also refreshes the
    /// FTS index via triggers when level is 32).
    pub fn put_trace_summary(&self, summary: &Summary) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR REPLACE INTO trace_summaries (trace_id, level, text, est_tokens)
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

    /// Exact-level trace summary; no walk-up.
    pub fn trace_summary_at(&self, trace_id: &str, level: u8) -> Result<Option<Summary>> {
        let reader = self.reader()?;
        let row = reader
            .query_row(
                "SELECT text, est_tokens FROM trace_summaries
                 WHERE trace_id = ?1 AND level = ?2",
                params![trace_id, level as i64],
                |row| {
                    Ok(Summary {
                        owner_id: trace_id.to_string(),
                        level,
                        text: row.get(0)?,
                        est_tokens: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Trace summary at the requested level, walking up to more-compressed
    /// levels when missing; `Ok(None)` when the pyramid is absent entirely.
    pub fn get_trace_summary(&self, trace_id: &str, level: u8) -> Result<Option<Summary>> {
        for candidate in LEVELS.iter().rev().filter(|l| **l <= level) {
            if let Some(text) = self.cached_summary(trace_id, *candidate) {
                return Ok(Some(Summary {
                    owner_id: trace_id.to_string(),
                    level: *candidate,
                    est_tokens: crate::pyramid::estimate_tokens(&text),
                    text,
                }));
            }
            if let Some(summary) = self.trace_summary_at(trace_id, *candidate)? {
                self.cache_summary(trace_id, *candidate, &summary.text);
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }

    /// Insert a trace relation once; re-inserts are ignored.
    pub fn add_trace_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: &str,
        weight: f64,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO trace_relations (from_id, to_id, kind, weight)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (from_id, to_id, kind) DO NOTHING",
            params![from_id, to_id, kind, weight],
        )?;
        Ok(())
    }

    /// Direct relation neighbors of a trace. Relations are stored once but
    /// symmetric in meaning, so both directions are unioned.
    pub fn trace_neighbors(&self, trace_id: &str, cap: usize) -> Result<Vec<(String, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT to_id AS neighbor, weight FROM trace_relations WHERE from_id = ?1
             UNION ALL
             SELECT from_id AS neighbor, weight FROM trace_relations WHERE to_id = ?1
             ORDER BY weight DESC
             LIMIT ?2",
        )?;
        let neighbors = stmt
            .query_map(params![trace_id, cap as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(neighbors)
    }

    /// Traces sharing at least one entity with the given trace, with the
    /// shared-entity count (entity-bridged edges for spreading activation).
    pub fn trace_entity_neighbors(&self, trace_id: &str) -> Result<Vec<(String, i64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT te2.trace_id, COUNT(*) AS shared
             FROM trace_entities te1
             JOIN trace_entities te2 ON te1.entity_id = te2.entity_id
             WHERE te1.trace_id = ?1 AND te2.trace_id != ?1
             GROUP BY te2.trace_id
             ORDER BY shared DESC",
        )?;
        let neighbors = stmt
            .query_map(params![trace_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(neighbors)
    }

    /// Advisory activation write; callers swallow the error.
    pub fn update_trace_activation(&self, trace_id: &str, activation: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE traces SET activation = ?1 WHERE id = ?2",
            params![activation.clamp(0.0, 1.0), trace_id],
        )?;
        Ok(())
    }

    /// Batch of advisory activation writes under one writer lock; row-level
    /// failures are logged and skipped.
    pub fn apply_activation_updates(&self, updates: &[(String, f64)]) -> Result<()> {
        let writer = self.writer()?;
        let mut stmt =
            writer.prepare_cached("UPDATE traces SET activation = ?1 WHERE id = ?2")?;
        for (trace_id, activation) in updates {
            if let Err(e) = stmt.execute(params![activation.clamp(0.0, 1.0), trace_id]) {
                tracing::warn!("Activation update failed for {}: {}", trace_id, e);
            }
        }
        Ok(())
    }

    /// Access boost: bump last_accessed and add to activation, clipped at 1.
    pub fn boost_trace_access(&self, trace_id: &str, boost: f64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE traces SET
                last_accessed = ?1,
                activation = MIN(1.0, activation + ?2)
             WHERE id = ?3",
            params![Utc::now().to_rfc3339(), boost, trace_id],
        )?;
        Ok(())
    }

    /// Bump strength on re-observation (embedding EMA handled by the caller).
    pub fn reinforce_trace_strength(&self, trace_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE traces SET strength = strength + 1 WHERE id = ?1",
            params![trace_id],
        )?;
        Ok(())
    }

    /// Decay candidates: (id, type, activation, last_accessed) for every
    /// trace still above the floor.
    pub fn traces_above_floor(
        &self,
        floor: f64,
    ) -> Result<Vec<(String, TraceType, f64, chrono::DateTime<Utc>)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT id, trace_type, activation, last_accessed FROM traces WHERE activation > ?1",
        )?;
        let rows = stmt
            .query_map(params![floor], |row| {
                let last_accessed: String = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    TraceType::parse_name(&row.get::<_, String>(1)?),
                    row.get::<_, f64>(2)?,
                    Self::parse_timestamp(&last_accessed, "last_accessed")?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All trace IDs (tests and maintenance).
    pub fn all_trace_ids(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT id FROM traces ORDER BY created_at ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub(crate) fn row_to_trace(row: &rusqlite::Row) -> rusqlite::Result<Trace> {
        let created_at: String = row.get("created_at")?;
        let last_accessed: String = row.get("last_accessed")?;
        let labile_until: Option<String> = row.get("labile_until")?;
        let trace_type: String = row.get("trace_type")?;
        let has_embedding: i64 = row.get("has_embedding")?;
        Ok(Trace {
            id: row.get("id")?,
            summary: row.get("summary")?,
            topic: row.get("topic")?,
            trace_type: TraceType::parse_name(&trace_type),
            activation: row.get("activation")?,
            strength: row.get("strength")?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
            last_accessed: Self::parse_timestamp(&last_accessed, "last_accessed")?,
            labile_until: Self::opt_timestamp(labile_until),
            has_embedding: has_embedding == 1,
        })
    }
}
