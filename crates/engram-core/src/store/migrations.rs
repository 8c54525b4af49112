//! Database migrations
//!
//! The schema evolves through an integer version counter. Migrations are
//! idempotent and append-only; opening an older database applies everything
//! above its recorded version, forward only.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: episodes, entities, relations, traces, edges",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Keyword index over trace summaries (FTS5, BM25)",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Labile window for trace reconsolidation",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS episodes (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    channel TEXT NOT NULL DEFAULT '',
    occurred_at TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    dialogue_act TEXT,
    entropy_score REAL NOT NULL DEFAULT 0.0,
    token_count INTEGER NOT NULL DEFAULT 0,
    reply_to TEXT,
    has_embedding INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_episodes_occurred ON episodes(occurred_at);
CREATE INDEX IF NOT EXISTS idx_episodes_channel ON episodes(channel);

-- Embeddings stored as little-endian f32 blobs, L2-normalized
CREATE TABLE IF NOT EXISTS episode_embeddings (
    episode_id TEXT PRIMARY KEY REFERENCES episodes(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Compression pyramid levels: 4, 8, 16, 32, 64 words
CREATE TABLE IF NOT EXISTS episode_summaries (
    episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    level INTEGER NOT NULL,
    text TEXT NOT NULL,
    est_tokens INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (episode_id, level)
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'OTHER',
    salience REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    has_embedding INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_entities_salience ON entities(salience);

CREATE TABLE IF NOT EXISTS entity_embeddings (
    entity_id TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_aliases (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    alias TEXT NOT NULL,
    PRIMARY KEY (entity_id, alias)
);

CREATE INDEX IF NOT EXISTS idx_aliases_alias ON entity_aliases(alias COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS episode_mentions (
    episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    PRIMARY KEY (episode_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_mentions_entity ON episode_mentions(entity_id);

-- Bitemporal: superseded rows get invalid_at set, never deleted
CREATE TABLE IF NOT EXISTS entity_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    valid_at TEXT NOT NULL,
    invalid_at TEXT,
    invalidated_by INTEGER,
    source_episode_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_relations_from ON entity_relations(from_id, kind);
CREATE INDEX IF NOT EXISTS idx_relations_active ON entity_relations(invalid_at);

CREATE TABLE IF NOT EXISTS traces (
    id TEXT PRIMARY KEY,
    summary TEXT NOT NULL,
    topic TEXT,
    trace_type TEXT NOT NULL DEFAULT 'knowledge',
    activation REAL NOT NULL DEFAULT 0.1,
    strength INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    has_embedding INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_traces_type ON traces(trace_type);
CREATE INDEX IF NOT EXISTS idx_traces_activation ON traces(activation);

CREATE TABLE IF NOT EXISTS trace_embeddings (
    trace_id TEXT PRIMARY KEY REFERENCES traces(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trace_summaries (
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    level INTEGER NOT NULL,
    text TEXT NOT NULL,
    est_tokens INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (trace_id, level)
);

-- No FK on trace_id: the '_ephemeral' sentinel is a reserved string, not a row
CREATE TABLE IF NOT EXISTS trace_sources (
    trace_id TEXT NOT NULL,
    episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    PRIMARY KEY (trace_id, episode_id)
);

CREATE INDEX IF NOT EXISTS idx_trace_sources_episode ON trace_sources(episode_id);

CREATE TABLE IF NOT EXISTS trace_entities (
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    PRIMARY KEY (trace_id, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_trace_entities_entity ON trace_entities(entity_id);

-- Symmetric in meaning, stored once; queries union both directions
CREATE TABLE IF NOT EXISTS trace_relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    UNIQUE (from_id, to_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_trace_relations_to ON trace_relations(to_id);

-- No FK on from/to: a REPLIES_TO edge may point at a not-yet-ingested episode
CREATE TABLE IF NOT EXISTS episode_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    relationship TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 0.0,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    UNIQUE (from_id, to_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_episode_edges_from ON episode_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_episode_edges_to ON episode_edges(to_id);

CREATE TABLE IF NOT EXISTS episode_trace_edges (
    episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    relationship TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (episode_id, trace_id)
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: BM25-ranked keyword index over level-32 trace summaries.
/// The store keeps a Rust-side scan fallback for when FTS5 matching fails.
const MIGRATION_V2_UP: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS trace_summary_fts USING fts5(
    trace_id UNINDEXED,
    text,
    tokenize='porter ascii'
);

-- Sync triggers cover only the indexed level
CREATE TRIGGER IF NOT EXISTS trace_summaries_fts_ai
AFTER INSERT ON trace_summaries WHEN NEW.level = 32 BEGIN
    DELETE FROM trace_summary_fts WHERE trace_id = NEW.trace_id;
    INSERT INTO trace_summary_fts(trace_id, text) VALUES (NEW.trace_id, NEW.text);
END;

CREATE TRIGGER IF NOT EXISTS trace_summaries_fts_ad
AFTER DELETE ON trace_summaries WHEN OLD.level = 32 BEGIN
    DELETE FROM trace_summary_fts WHERE trace_id = OLD.trace_id;
END;

CREATE TRIGGER IF NOT EXISTS trace_summaries_fts_au
AFTER UPDATE ON trace_summaries WHEN NEW.level = 32 BEGIN
    DELETE FROM trace_summary_fts WHERE trace_id = OLD.trace_id;
    INSERT INTO trace_summary_fts(trace_id, text) VALUES (NEW.trace_id, NEW.text);
END;

-- Backfill from any summaries written before this migration
INSERT INTO trace_summary_fts(trace_id, text)
SELECT trace_id, text FROM trace_summaries WHERE level = 32
AND trace_id NOT IN (SELECT trace_id FROM trace_summary_fts);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Reconsolidation - traces stay malleable for a window after creation
const MIGRATION_V3_UP: &str = r#"
ALTER TABLE traces ADD COLUMN labile_until TEXT;

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_contiguous() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as u32 + 1);
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let first = apply_migrations(&conn).unwrap();
        assert_eq!(first as usize, MIGRATIONS.len());
        let second = apply_migrations(&conn).unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.len() as u32
        );
    }
}
