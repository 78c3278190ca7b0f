//! Structural fingerprints used to decide whether a cached layout is still valid.
//!
//! The digest is SHA-256 over a newline-joined, sorted serialization of the graph's tuples:
//! `(entity_id, community_id)`, `(subject_id, predicate, object_id)`, `(entity_id,
//! observation_count)`, plus similarity rows when present. Insertion order of the inputs never
//! affects the result.

use crate::graph::{Entity, Relation, ResolvedGraph, normalize_community};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Bump when simulation defaults change so persisted layouts are recomputed.
pub const LAYOUT_VERSION: &str = "narwhal-layout/1";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: expected 64 hex characters")]
pub struct ParseFingerprintError;

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| ParseFingerprintError)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of raw entity and relation records, trusting `Entity::community_id`.
///
/// Equals [`fingerprint_resolved`] for the same graph whenever every entity's `community_id`
/// agrees with the community membership lists.
pub fn fingerprint(entities: &[Entity], relations: &[Relation]) -> Fingerprint {
    let entity_rows = entities
        .iter()
        .map(|e| {
            (
                e.id.as_str(),
                normalize_community(e.community_id.as_deref()),
                e.observation_count,
            )
        })
        .collect();
    let relation_rows = relations
        .iter()
        .map(|r| {
            (
                r.subject_id.as_str(),
                r.predicate.as_str(),
                r.object_id.as_str(),
            )
        })
        .collect();
    digest(entity_rows, relation_rows, Vec::new())
}

/// Fingerprint of a validated graph, using resolved community membership.
pub fn fingerprint_resolved(graph: &ResolvedGraph) -> Fingerprint {
    let entity_rows = graph
        .ids
        .iter()
        .enumerate()
        .map(|(idx, id)| {
            (
                id.as_str(),
                graph.community_of(idx),
                graph.observation_count[idx],
            )
        })
        .collect();
    let relation_rows = graph
        .relations
        .iter()
        .map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str()))
        .collect();
    let similarity_rows = graph
        .similarity_rows
        .iter()
        .map(|(a, b, score)| (a.as_str(), b.as_str(), *score))
        .collect();
    digest(entity_rows, relation_rows, similarity_rows)
}

fn digest(
    mut entities: Vec<(&str, Option<&str>, u64)>,
    mut relations: Vec<(&str, &str, &str)>,
    mut similarity: Vec<(&str, &str, f64)>,
) -> Fingerprint {
    entities.sort();
    relations.sort();
    similarity.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)).then(x.2.total_cmp(&y.2)));

    let mut hasher = Sha256::new();
    let mut line = |parts: &[&str]| {
        let mut out = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push('\t');
            }
            escape_into(&mut out, part);
        }
        out.push('\n');
        hasher.update(out.as_bytes());
    };

    line(&["layout_version", LAYOUT_VERSION]);
    for &(id, community, _) in &entities {
        line(&["entity", id, community.unwrap_or("")]);
    }
    for &(s, p, o) in &relations {
        line(&["relation", s, p, o]);
    }
    for &(id, _, count) in &entities {
        line(&["observations", id, count.to_string().as_str()]);
    }
    for &(a, b, score) in &similarity {
        line(&["similarity", a, b, score.to_string().as_str()]);
    }

    Fingerprint(hasher.finalize().into())
}

fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Community, LayoutGraph};

    fn entities() -> Vec<Entity> {
        vec![
            Entity::new("a").in_community("k").with_observations(2),
            Entity::new("b").in_community("k"),
            Entity::new("c"),
        ]
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::new("a", "knows", "b"),
            Relation::new("b", "likes", "c"),
        ]
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut e = entities();
        let mut r = relations();
        let before = fingerprint(&e, &r);
        e.reverse();
        r.reverse();
        assert_eq!(fingerprint(&e, &r), before);
    }

    #[test]
    fn observation_count_changes_the_digest() {
        let e = entities();
        let mut changed = entities();
        changed[1].observation_count = 7;
        assert_ne!(fingerprint(&e, &relations()), fingerprint(&changed, &relations()));
    }

    #[test]
    fn predicate_and_direction_change_the_digest() {
        let base = fingerprint(&entities(), &relations());
        let mut r = relations();
        r[0].predicate = "knew".into();
        assert_ne!(fingerprint(&entities(), &r), base);

        let mut r = relations();
        let rel = &mut r[0];
        std::mem::swap(&mut rel.subject_id, &mut rel.object_id);
        assert_ne!(fingerprint(&entities(), &r), base);
    }

    #[test]
    fn separators_inside_ids_cannot_forge_tuples() {
        let a = [Entity::new("x\tk")];
        let b = [Entity::new("x").in_community("k")];
        assert_ne!(fingerprint(&a, &[]), fingerprint(&b, &[]));
    }

    #[test]
    fn resolved_digest_matches_raw_digest_for_consistent_records() {
        let graph = LayoutGraph::new(
            entities(),
            relations(),
            vec![Community::new("k", ["a", "b"])],
        );
        let resolved = graph.resolve().unwrap();
        assert_eq!(
            fingerprint_resolved(&resolved),
            fingerprint(&entities(), &relations())
        );
    }

    #[test]
    fn hex_round_trips_through_serde() {
        let fp = fingerprint(&entities(), &relations());
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json.len(), 66);
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!("not-hex".parse::<Fingerprint>().is_err());
    }
}
