//! Store-level search primitives
//!
//! Two query paths, each with a guaranteed fallback:
//! - keyword: FTS5/BM25 over level-32 trace summaries, falling back to a
//!   Rust-side scan when the FTS query fails;
//! - vector: HNSW index over normalized trace embeddings, falling back to an
//!   O(n) scan + cosine.

use rusqlite::params;

use crate::error::Result;
use crate::vector;

use super::Store;

/// Build an FTS5 MATCH expression from pre-extracted keywords. Each token is
/// quoted so user text cannot inject FTS syntax; tokens are OR-ed.
pub fn fts_query_for_keywords(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| k.replace('"', ""))
        .filter(|k| k.len() > 2)
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Store {
    /// BM25-ranked keyword search over trace L32 summaries. Scores are
    /// negated bm25 ranks (higher is better). Falls back to a scan that
    /// counts keyword hits when the FTS query errors.
    pub fn search_trace_summaries(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = fts_query_for_keywords(keywords);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        match self.fts_search(&match_expr, limit) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                tracing::warn!("FTS search failed ({}); falling back to scan", e);
                self.scan_trace_summaries(keywords, limit)
            }
        }
    }

    fn fts_search(&self, match_expr: &str, limit: usize) -> Result<Vec<(String, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT trace_id, bm25(trace_summary_fts) AS rank
             FROM trace_summary_fts
             WHERE trace_summary_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, -row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Scan fallback: count keyword occurrences in L32 summary text.
    fn scan_trace_summaries(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader
            .prepare_cached("SELECT trace_id, text FROM trace_summaries WHERE level = 32")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut scored: Vec<(String, f64)> = rows
            .into_iter()
            .filter_map(|(trace_id, text)| {
                let lower = text.to_lowercase();
                let hits = keywords
                    .iter()
                    .filter(|k| lower.contains(k.to_lowercase().as_str()))
                    .count();
                (hits > 0).then_some((trace_id, hits as f64))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Nearest traces to a query embedding, above a similarity cutoff.
    /// Uses the HNSW index when available, otherwise (or on index failure)
    /// an exact O(n) scan with cosine.
    pub fn similar_traces(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>> {
        #[cfg(feature = "vector-search")]
        {
            match self.trace_index.lock() {
                Ok(index) => match index.nearest(query, limit, min_similarity) {
                    Ok(hits) => return Ok(hits),
                    Err(e) => {
                        tracing::warn!("Vector index search failed ({}); falling back to scan", e)
                    }
                },
                Err(_) => tracing::warn!("Vector index lock poisoned; falling back to scan"),
            }
        }

        self.scan_similar_traces(query, limit, min_similarity)
    }

    /// Exact scan over all stored trace embeddings.
    fn scan_similar_traces(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>> {
        let mut scored: Vec<(String, f32)> = self
            .all_trace_embeddings()?
            .into_iter()
            .map(|(id, v)| {
                let sim = vector::cosine_similarity(query, &v);
                (id, sim)
            })
            .filter(|(_, sim)| *sim >= min_similarity)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Summary, Trace, TraceType};
    use chrono::Utc;

    fn store() -> Store {
        Store::open_in_memory(4).unwrap()
    }

    fn insert_trace_with_summary(s: &Store, id: &str, text: &str) {
        let now = Utc::now();
        s.insert_trace(&Trace {
            id: id.to_string(),
            summary: text.to_string(),
            topic: None,
            trace_type: TraceType::Knowledge,
            activation: 0.1,
            strength: 1,
            created_at: now,
            last_accessed: now,
            labile_until: None,
            has_embedding: false,
        })
        .unwrap();
        s.put_trace_summary(&Summary {
            owner_id: id.to_string(),
            level: 32,
            text: text.to_string(),
            est_tokens: 4,
        })
        .unwrap();
    }

    #[test]
    fn fts_query_quotes_and_filters_tokens() {
        let q = fts_query_for_keywords(&[
            "database".to_string(),
            "ab".to_string(),
            "mi\"gration".to_string(),
        ]);
        assert_eq!(q, "\"database\" OR \"migration\"");
    }

    #[test]
    fn keyword_search_finds_matching_summary() {
        let s = store();
        insert_trace_with_summary(&s, "trace-db", "sarah decided to migrate the database to postgres");
        insert_trace_with_summary(&s, "trace-lunch", "team lunch scheduled for friday noon");

        let hits = s
            .search_trace_summaries(&["database".to_string(), "postgres".to_string()], 10)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "trace-db");
    }

    #[test]
    fn keyword_search_empty_keywords_is_empty() {
        let s = store();
        assert!(s.search_trace_summaries(&[], 10).unwrap().is_empty());
    }

    #[test]
    fn scan_fallback_counts_hits() {
        let s = store();
        insert_trace_with_summary(&s, "trace-a", "alpha beta gamma");
        insert_trace_with_summary(&s, "trace-b", "alpha only");

        let hits = s
            .scan_trace_summaries(&["alpha".to_string(), "beta".to_string()], 10)
            .unwrap();
        assert_eq!(hits[0].0, "trace-a");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn similar_traces_respects_threshold() {
        let s = store();
        insert_trace_with_summary(&s, "trace-x", "x");
        insert_trace_with_summary(&s, "trace-y", "y");
        s.set_trace_embedding("trace-x", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        s.set_trace_embedding("trace-y", &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hits = s.similar_traces(&[1.0, 0.0, 0.0, 0.0], 10, 0.8).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "trace-x");
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn exact_scan_matches_index_results() {
        let s = store();
        insert_trace_with_summary(&s, "trace-x", "x");
        s.set_trace_embedding("trace-x", &[0.6, 0.8, 0.0, 0.0]).unwrap();

        let scanned = s.scan_similar_traces(&[0.6, 0.8, 0.0, 0.0], 10, 0.9).unwrap();
        assert_eq!(scanned.len(), 1);
        assert!((scanned[0].1 - 1.0).abs() < 1e-5);
    }
}
