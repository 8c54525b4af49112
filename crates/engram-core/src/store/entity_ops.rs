//! Entity and relation operations
//!
//! Every mutation bumps the entity epoch so the process-wide name/alias
//! regex cache knows to rebuild.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::model::{Entity, EntityKind, EntityRelation, RelationKind};
use crate::vector;

use super::Store;

impl Store {
    /// Insert an entity if its content-addressed ID is new; returns the
    /// stored row either way.
    pub fn add_entity(&self, id: &str, name: &str, kind: EntityKind, salience: f64) -> Result<Entity> {
        let now = Utc::now().to_rfc3339();
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT INTO entities (id, name, kind, salience, created_at, updated_at, has_embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)
                 ON CONFLICT(id) DO NOTHING",
                params![id, name, kind.as_str(), salience.clamp(0.0, 1.0), now],
            )?;
        }
        self.bump_entity_epoch();
        self.get_entity(id)?
            .ok_or_else(|| crate::error::EngineError::NotFound(id.to_string()))
    }

    /// Get an entity (with aliases) by ID.
    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let reader = self.reader()?;
        let entity = reader
            .query_row("SELECT * FROM entities WHERE id = ?1", params![id], |row| {
                Self::row_to_entity(row)
            })
            .optional()?;
        match entity {
            Some(mut e) => {
                e.aliases = Self::aliases_for(&reader, &e.id)?;
                Ok(Some(e))
            }
            None => Ok(None),
        }
    }

    /// Case-insensitive lookup by canonical name or alias.
    pub fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let reader = self.reader()?;
        let by_name = reader
            .query_row(
                "SELECT * FROM entities WHERE name = ?1 COLLATE NOCASE LIMIT 1",
                params![name],
                |row| Self::row_to_entity(row),
            )
            .optional()?;
        let entity = match by_name {
            Some(e) => Some(e),
            None => reader
                .query_row(
                    "SELECT e.* FROM entities e
                     JOIN entity_aliases a ON a.entity_id = e.id
                     WHERE a.alias = ?1 COLLATE NOCASE LIMIT 1",
                    params![name],
                    |row| Self::row_to_entity(row),
                )
                .optional()?,
        };
        match entity {
            Some(mut e) => {
                e.aliases = Self::aliases_for(&reader, &e.id)?;
                Ok(Some(e))
            }
            None => Ok(None),
        }
    }

    /// All entities of one kind (fuzzy person matching).
    pub fn entities_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached("SELECT * FROM entities WHERE kind = ?1")?;
        let mut entities: Vec<Entity> = stmt
            .query_map(params![kind.as_str()], |row| Self::row_to_entity(row))?
            .filter_map(|r| r.ok())
            .collect();
        for e in entities.iter_mut() {
            e.aliases = Self::aliases_for(&reader, &e.id)?;
        }
        Ok(entities)
    }

    /// All entities with aliases, salience-descending (cache rebuild).
    pub fn all_entities(&self) -> Result<Vec<Entity>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare_cached("SELECT * FROM entities ORDER BY salience DESC, name ASC")?;
        let mut entities: Vec<Entity> = stmt
            .query_map([], |row| Self::row_to_entity(row))?
            .filter_map(|r| r.ok())
            .collect();
        for e in entities.iter_mut() {
            e.aliases = Self::aliases_for(&reader, &e.id)?;
        }
        Ok(entities)
    }

    /// Expand the canonical name in place (richer form observed).
    pub fn rename_entity(&self, id: &str, new_name: &str) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE entities SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_name, Utc::now().to_rfc3339(), id],
            )?;
        }
        self.bump_entity_epoch();
        Ok(())
    }

    /// Record an alias; duplicates are ignored.
    pub fn add_entity_alias(&self, entity_id: &str, alias: &str) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "INSERT OR IGNORE INTO entity_aliases (entity_id, alias) VALUES (?1, ?2)",
                params![entity_id, alias],
            )?;
        }
        self.bump_entity_epoch();
        Ok(())
    }

    /// Advisory salience bump, clipped at 1.0.
    pub fn increment_entity_salience(&self, id: &str, delta: f64) -> Result<()> {
        {
            let writer = self.writer()?;
            writer.execute(
                "UPDATE entities SET
                    salience = MIN(1.0, salience + ?1),
                    updated_at = ?2
                 WHERE id = ?3",
                params![delta, Utc::now().to_rfc3339(), id],
            )?;
        }
        self.bump_entity_epoch();
        Ok(())
    }

    /// Store a name embedding for embedding-based resolution.
    pub fn set_entity_embedding(&self, entity_id: &str, vec: &[f32]) -> Result<()> {
        let mut normalized = vec.to_vec();
        vector::l2_normalize(&mut normalized);
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO entity_embeddings (entity_id, embedding, dimensions, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entity_id,
                vector::to_bytes(&normalized),
                normalized.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        writer.execute(
            "UPDATE entities SET has_embedding = 1 WHERE id = ?1",
            params![entity_id],
        )?;
        Ok(())
    }

    /// All entity name embeddings; torn blobs are skipped.
    pub fn entity_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare_cached("SELECT entity_id, embedding FROM entity_embeddings")?;
        let out = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(id, bytes)| vector::from_bytes(&bytes).map(|v| (id, v)))
            .collect();
        Ok(out)
    }

    /// Record that an episode mentions an entity.
    pub fn add_episode_mention(&self, episode_id: &str, entity_id: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO episode_mentions (episode_id, entity_id) VALUES (?1, ?2)",
            params![episode_id, entity_id],
        )?;
        Ok(())
    }

    /// Entity IDs mentioned by each of the given episodes.
    pub fn mentions_for_episodes(
        &self,
        episode_ids: &[String],
    ) -> Result<std::collections::HashMap<String, Vec<String>>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT entity_id FROM episode_mentions WHERE episode_id = ?1",
        )?;
        let mut out = std::collections::HashMap::new();
        for episode_id in episode_ids {
            let entities: Vec<String> = stmt
                .query_map(params![episode_id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            if !entities.is_empty() {
                out.insert(episode_id.clone(), entities);
            }
        }
        Ok(out)
    }

    /// Insert a relation row; returns the new row ID.
    pub fn add_entity_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
        weight: f64,
        source_episode_id: Option<&str>,
    ) -> Result<i64> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO entity_relations (from_id, to_id, kind, weight, valid_at, source_episode_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                from_id,
                to_id,
                kind.as_str(),
                weight,
                Utc::now().to_rfc3339(),
                source_episode_id,
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    /// Active relations from one subject with one predicate.
    pub fn active_relations_from(
        &self,
        from_id: &str,
        kind: RelationKind,
    ) -> Result<Vec<EntityRelation>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT * FROM entity_relations
             WHERE from_id = ?1 AND kind = ?2 AND invalid_at IS NULL",
        )?;
        let relations = stmt
            .query_map(params![from_id, kind.as_str()], |row| {
                Self::row_to_relation(row)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(relations)
    }

    /// Human-readable active relations touching any of the given entities
    /// (context block for the relationship-extraction prompt).
    pub fn active_relation_facts(&self, entity_ids: &[String]) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT ef.name, r.kind, et.name FROM entity_relations r
             JOIN entities ef ON ef.id = r.from_id
             JOIN entities et ON et.id = r.to_id
             WHERE r.invalid_at IS NULL AND (r.from_id = ?1 OR r.to_id = ?1)",
        )?;
        let mut facts = Vec::new();
        for id in entity_ids {
            let rows = stmt.query_map(params![id], |row| {
                Ok(format!(
                    "{} {} {}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?
                ))
            })?;
            for fact in rows.filter_map(|r| r.ok()) {
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
            }
        }
        Ok(facts)
    }

    /// Mark a relation superseded. Rows are never deleted.
    pub fn invalidate_entity_relation(&self, id: i64, invalidated_by: i64) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE entity_relations SET invalid_at = ?1, invalidated_by = ?2
             WHERE id = ?3 AND invalid_at IS NULL",
            params![Utc::now().to_rfc3339(), invalidated_by, id],
        )?;
        Ok(())
    }

    /// Up to `limit` traces that reference an entity.
    pub fn traces_for_entity(&self, entity_id: &str, limit: usize) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT trace_id FROM trace_entities WHERE entity_id = ?1 LIMIT ?2",
        )?;
        let traces = stmt
            .query_map(params![entity_id, limit as i64], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(traces)
    }

    fn aliases_for(conn: &Connection, entity_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT alias FROM entity_aliases WHERE entity_id = ?1 ORDER BY alias ASC",
        )?;
        let aliases = stmt
            .query_map(params![entity_id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(aliases)
    }

    fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let kind: String = row.get("kind")?;
        let has_embedding: i64 = row.get("has_embedding")?;
        Ok(Entity {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: EntityKind::parse_name(&kind),
            salience: row.get("salience")?,
            aliases: Vec::new(),
            created_at: Self::parse_timestamp(&created_at, "created_at")?,
            updated_at: Self::parse_timestamp(&updated_at, "updated_at")?,
            has_embedding: has_embedding == 1,
        })
    }

    fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<EntityRelation> {
        let kind: String = row.get("kind")?;
        let valid_at: String = row.get("valid_at")?;
        let invalid_at: Option<String> = row.get("invalid_at")?;
        Ok(EntityRelation {
            id: row.get("id")?,
            from_id: row.get("from_id")?,
            to_id: row.get("to_id")?,
            kind: RelationKind::parse_name(&kind).unwrap_or(RelationKind::Has),
            weight: row.get("weight")?,
            valid_at: Self::parse_timestamp(&valid_at, "valid_at")?,
            invalid_at: Self::opt_timestamp(invalid_at),
            invalidated_by: row.get("invalidated_by")?,
            source_episode_id: row.get("source_episode_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;

    fn store() -> Store {
        Store::open_in_memory(4).unwrap()
    }

    #[test]
    fn add_is_idempotent_by_id() {
        let s = store();
        let id = ids::entity_id("Sarah");
        let first = s.add_entity(&id, "Sarah", EntityKind::Person, 0.6).unwrap();
        let second = s.add_entity(&id, "sarah", EntityKind::Person, 0.9).unwrap();
        assert_eq!(first.id, second.id);
        // First write wins; later inserts don't clobber
        assert_eq!(second.name, "Sarah");
        assert!((second.salience - 0.6).abs() < 1e-9);
    }

    #[test]
    fn name_and_alias_lookup_is_case_insensitive() {
        let s = store();
        let id = ids::entity_id("Sarah Chen");
        s.add_entity(&id, "Sarah Chen", EntityKind::Person, 0.5).unwrap();
        s.add_entity_alias(&id, "Sarah").unwrap();

        assert_eq!(s.find_entity_by_name("sarah chen").unwrap().unwrap().id, id);
        assert_eq!(s.find_entity_by_name("SARAH").unwrap().unwrap().id, id);
        assert!(s.find_entity_by_name("nobody").unwrap().is_none());

        let entity = s.get_entity(&id).unwrap().unwrap();
        assert_eq!(entity.aliases, vec!["Sarah".to_string()]);
    }

    #[test]
    fn salience_clips_at_one() {
        let s = store();
        let id = ids::entity_id("Acme");
        s.add_entity(&id, "Acme", EntityKind::Org, 0.95).unwrap();
        s.increment_entity_salience(&id, 0.1).unwrap();
        s.increment_entity_salience(&id, 0.1).unwrap();
        let entity = s.get_entity(&id).unwrap().unwrap();
        assert!((entity.salience - 1.0).abs() < 1e-9);
    }

    #[test]
    fn relation_invalidation_keeps_rows() {
        let s = store();
        let sarah = ids::entity_id("Sarah");
        let acme = ids::entity_id("Acme");
        let globex = ids::entity_id("Globex");
        s.add_entity(&sarah, "Sarah", EntityKind::Person, 0.5).unwrap();
        s.add_entity(&acme, "Acme", EntityKind::Org, 0.5).unwrap();
        s.add_entity(&globex, "Globex", EntityKind::Org, 0.5).unwrap();

        let old = s
            .add_entity_relation(&sarah, &acme, RelationKind::AffiliatedWith, 1.0, None)
            .unwrap();
        let new = s
            .add_entity_relation(&sarah, &globex, RelationKind::AffiliatedWith, 1.0, None)
            .unwrap();
        s.invalidate_entity_relation(old, new).unwrap();

        let active = s
            .active_relations_from(&sarah, RelationKind::AffiliatedWith)
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].to_id, globex);

        // Superseded row still exists, marked invalid
        let reader = s.reader().unwrap();
        let invalidated_by: Option<i64> = reader
            .query_row(
                "SELECT invalidated_by FROM entity_relations WHERE id = ?1",
                params![old],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(invalidated_by, Some(new));
    }

    #[test]
    fn mentions_group_by_episode() {
        let s = store();
        let sarah = ids::entity_id("Sarah");
        s.add_entity(&sarah, "Sarah", EntityKind::Person, 0.5).unwrap();
        s.add_episode(&crate::model::EpisodeInput {
            id: "ep-1".to_string(),
            content: "x".to_string(),
            ..Default::default()
        })
        .unwrap();
        s.add_episode_mention("ep-1", &sarah).unwrap();
        s.add_episode_mention("ep-1", &sarah).unwrap();

        let mentions = s
            .mentions_for_episodes(&["ep-1".to_string(), "ep-2".to_string()])
            .unwrap();
        assert_eq!(mentions.get("ep-1").unwrap(), &vec![sarah]);
        assert!(!mentions.contains_key("ep-2"));
    }
}
