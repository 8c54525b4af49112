//! Episode edge operations

use chrono::Utc;
use rusqlite::params;

use crate::error::Result;
use crate::model::EpisodeEdge;

use super::Store;

impl Store {
    /// Insert an episode edge. Duplicate (from, to, type) inserts are
    /// ignored; returns whether a row was actually written.
    pub fn add_episode_edge(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        relationship: &str,
        confidence: f64,
        weight: f64,
    ) -> Result<bool> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "INSERT INTO episode_edges (from_id, to_id, edge_type, relationship, confidence, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (from_id, to_id, edge_type) DO NOTHING",
            params![
                from_id,
                to_id,
                edge_type,
                relationship,
                confidence,
                weight,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// All edges where both endpoints fall inside the given episode set.
    pub fn edges_within_episodes(&self, episode_ids: &[String]) -> Result<Vec<EpisodeEdge>> {
        if episode_ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_set: std::collections::HashSet<&str> =
            episode_ids.iter().map(|s| s.as_str()).collect();

        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT * FROM episode_edges WHERE from_id = ?1 OR to_id = ?1",
        )?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for episode_id in episode_ids {
            let rows = stmt.query_map(params![episode_id], Self::row_to_edge)?;
            for edge in rows.filter_map(|r| r.ok()) {
                if id_set.contains(edge.from_id.as_str())
                    && id_set.contains(edge.to_id.as_str())
                    && seen.insert(edge.id)
                {
                    out.push(edge);
                }
            }
        }
        Ok(out)
    }

    /// Record that an episode's embedding matched an existing trace it is not
    /// a source of.
    pub fn add_episode_trace_edge(
        &self,
        episode_id: &str,
        trace_id: &str,
        relationship: &str,
    ) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO episode_trace_edges (episode_id, trace_id, relationship)
             VALUES (?1, ?2, ?3)",
            params![episode_id, trace_id, relationship],
        )?;
        Ok(())
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<EpisodeEdge> {
        let created_at: String = row.get("created_at")?;
        Ok(EpisodeEdge {
            id: row.get("id")?,
            from_id: row.get("from_id")?,
            to_id: row.get("to_id")?,
            edge_type: row.get("edge_type")?,
            relationship: row.get("relationship")?,
            confidence: row.get("confidence")?,
            weight: row.get("weight")?,
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
        })
    }
}
