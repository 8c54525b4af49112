//! Entities and their relations
//!
//! Entities are canonical names accumulated across episodes, soft-merged via
//! aliases. Relations are bitemporal: superseded rows are invalidated, never
//! deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of entity kinds the extractor emits.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    /// A person
    Person,
    /// An organization or company
    Org,
    /// A geographic place
    Place,
    /// A named product
    Product,
    /// A named event
    Event,
    /// An email address
    Email,
    /// A monetary amount
    Money,
    /// A date expression
    Date,
    /// Anything else (filtered out before resolution)
    #[default]
    Other,
}

impl EntityKind {
    /// Canonical string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "PERSON",
            EntityKind::Org => "ORG",
            EntityKind::Place => "PLACE",
            EntityKind::Product => "PRODUCT",
            EntityKind::Event => "EVENT",
            EntityKind::Email => "EMAIL",
            EntityKind::Money => "MONEY",
            EntityKind::Date => "DATE",
            EntityKind::Other => "OTHER",
        }
    }

    /// Parse from a (possibly lowercased) label; unknown labels map to OTHER.
    pub fn parse_name(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PERSON" => EntityKind::Person,
            "ORG" | "ORGANIZATION" | "COMPANY" => EntityKind::Org,
            "PLACE" | "LOCATION" | "GPE" => EntityKind::Place,
            "PRODUCT" => EntityKind::Product,
            "EVENT" => EntityKind::Event,
            "EMAIL" => EntityKind::Email,
            "MONEY" => EntityKind::Money,
            "DATE" => EntityKind::Date,
            _ => EntityKind::Other,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A canonical entity in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Content-addressed ID (`entity-<hex>`)
    pub id: String,
    /// Canonical name; may be expanded in place when a richer form arrives
    pub name: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Mention-driven importance in [0, 1]; grows +0.1 per re-mention
    pub salience: f64,
    /// Alternate names that resolve to this entity
    pub aliases: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mention or mutation time
    pub updated_at: DateTime<Utc>,
    /// Whether a name embedding has been stored
    pub has_embedding: bool,
}

/// Closed set of meta-predicates the resolver emits.
///
/// The LLM is free to produce specific predicates; `from_predicate` collapses
/// them so the relational graph stays tractable and the inference prompt
/// stays stable.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Employment, membership, affiliation
    AffiliatedWith,
    /// Family relationship
    KinOf,
    /// Social acquaintance
    Knows,
    /// Geographic or containment location
    LocatedIn,
    /// Possession or attribute
    Has,
}

impl RelationKind {
    /// Canonical string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::AffiliatedWith => "affiliated_with",
            RelationKind::KinOf => "kin_of",
            RelationKind::Knows => "knows",
            RelationKind::LocatedIn => "located_in",
            RelationKind::Has => "has",
        }
    }

    /// Collapse a free-form predicate onto the closed set.
    pub fn from_predicate(predicate: &str) -> Self {
        match predicate.to_lowercase().replace([' ', '-'], "_").as_str() {
            "affiliated_with" | "works_at" | "works_for" | "employed_by" | "member_of"
            | "part_of" | "belongs_to" => RelationKind::AffiliatedWith,
            "kin_of" | "parent_of" | "child_of" | "sibling_of" | "married_to" | "spouse_of"
            | "related_to_family" => RelationKind::KinOf,
            "knows" | "friend_of" | "colleague_of" | "met" | "knows_of" => RelationKind::Knows,
            "located_in" | "lives_in" | "based_in" | "born_in" | "from" => RelationKind::LocatedIn,
            _ => RelationKind::Has,
        }
    }

    /// Parse the canonical database string; `None` for anything else.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "affiliated_with" => Some(RelationKind::AffiliatedWith),
            "kin_of" => Some(RelationKind::KinOf),
            "knows" => Some(RelationKind::Knows),
            "located_in" => Some(RelationKind::LocatedIn),
            "has" => Some(RelationKind::Has),
            _ => None,
        }
    }

    /// Whether a new relation of this kind supersedes prior relations from the
    /// same subject (one primary employer, one location); non-exclusive kinds
    /// only dedupe the exact (from, to, kind) triple.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, RelationKind::AffiliatedWith | RelationKind::LocatedIn)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bitemporal relation between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    /// Row ID
    pub id: i64,
    /// Subject entity
    pub from_id: String,
    /// Object entity
    pub to_id: String,
    /// Meta-predicate
    pub kind: RelationKind,
    /// Relation weight
    pub weight: f64,
    /// When the relation became true
    pub valid_at: DateTime<Utc>,
    /// When the relation stopped being asserted (`None` = still active)
    pub invalid_at: Option<DateTime<Utc>>,
    /// Row ID of the relation that superseded this one
    pub invalidated_by: Option<i64>,
    /// Episode that asserted the relation, if known
    pub source_episode_id: Option<String>,
}

impl EntityRelation {
    /// Whether the relation is currently active.
    pub fn is_active(&self) -> bool {
        self.invalid_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [
            EntityKind::Person,
            EntityKind::Org,
            EntityKind::Place,
            EntityKind::Product,
            EntityKind::Email,
        ] {
            assert_eq!(EntityKind::parse_name(kind.as_str()), kind);
        }
        assert_eq!(EntityKind::parse_name("garbage"), EntityKind::Other);
    }

    #[test]
    fn legacy_predicates_collapse() {
        assert_eq!(
            RelationKind::from_predicate("works_at"),
            RelationKind::AffiliatedWith
        );
        assert_eq!(RelationKind::from_predicate("lives in"), RelationKind::LocatedIn);
        assert_eq!(RelationKind::from_predicate("sibling_of"), RelationKind::KinOf);
        assert_eq!(RelationKind::from_predicate("owns"), RelationKind::Has);
    }

    #[test]
    fn exclusivity_policy() {
        assert!(RelationKind::AffiliatedWith.is_exclusive());
        assert!(RelationKind::LocatedIn.is_exclusive());
        assert!(!RelationKind::Knows.is_exclusive());
        assert!(!RelationKind::Has.is_exclusive());
    }
}
