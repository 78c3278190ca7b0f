use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use nalgebra::Vector3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Entity ids mapped to their layout coordinates.
pub type PositionMap = BTreeMap<String, Position>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub community_id: Option<String>,
    #[serde(default)]
    pub observation_count: u64,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            community_id: None,
            observation_count: 0,
        }
    }

    pub fn in_community(mut self, community_id: impl Into<String>) -> Self {
        self.community_id = Some(community_id.into());
        self
    }

    pub fn with_observations(mut self, count: u64) -> Self {
        self.observation_count = count;
        self
    }
}

/// A directed edge reference. Direction is kept for hashing but does not affect forces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject_id: String,
    pub object_id: String,
    #[serde(default)]
    pub predicate: String,
}

impl Relation {
    pub fn new(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            object_id: object_id.into(),
            predicate: predicate.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    #[serde(default)]
    pub member_entity_ids: Vec<String>,
}

impl Community {
    pub fn new<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            member_entity_ids: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Caller-supplied similarity between two entities (e.g. embedding cosine similarity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub a: String,
    pub b: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn distance(&self, other: &Position) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// The engine's input graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub communities: Vec<Community>,
    #[serde(default)]
    pub similarity: Vec<SimilarityPair>,
}

impl LayoutGraph {
    pub fn new(entities: Vec<Entity>, relations: Vec<Relation>, communities: Vec<Community>) -> Self {
        Self {
            entities,
            relations,
            communities,
            similarity: Vec::new(),
        }
    }

    pub fn with_similarity(mut self, similarity: Vec<SimilarityPair>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Validates the graph and lowers it into index space.
    pub fn resolve(&self) -> Result<ResolvedGraph> {
        ResolvedGraph::build(self)
    }

    pub fn topology(&self) -> Result<Topology> {
        Ok(self.resolve()?.topology())
    }
}

/// What the previous layout was computed from, used to diff against the current graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// entity id -> (community id, observation count)
    pub entities: BTreeMap<String, (Option<String>, u64)>,
    /// (subject id, predicate, object id)
    pub relations: BTreeSet<(String, String, String)>,
}

impl Topology {
    /// Builds a topology directly from entity records, trusting `Entity::community_id`.
    pub fn from_parts(entities: &[Entity], relations: &[Relation]) -> Self {
        Self {
            entities: entities
                .iter()
                .map(|e| {
                    (
                        e.id.clone(),
                        (
                            normalize_community(e.community_id.as_deref()).map(str::to_string),
                            e.observation_count,
                        ),
                    )
                })
                .collect(),
            relations: relations
                .iter()
                .map(|r| {
                    (
                        r.subject_id.clone(),
                        r.predicate.clone(),
                        r.object_id.clone(),
                    )
                })
                .collect(),
        }
    }
}

/// A previously computed layout handed back to the coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousLayout {
    pub positions: PositionMap,
    pub fingerprint: Option<Fingerprint>,
    pub topology: Option<Topology>,
}

impl PreviousLayout {
    pub fn new(positions: PositionMap) -> Self {
        Self {
            positions,
            fingerprint: None,
            topology: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Captures everything the next incremental run needs from a finished layout.
    pub fn from_result(result: &LayoutResult, graph: &LayoutGraph) -> Result<Self> {
        Ok(Self {
            positions: result.positions.clone(),
            fingerprint: Some(result.fingerprint),
            topology: Some(graph.topology()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutPath {
    CacheHit,
    FastPlacement,
    Incremental,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    pub positions: PositionMap,
    #[serde(rename = "layoutHash")]
    pub fingerprint: Fingerprint,
    pub converged: bool,
    pub iterations_run: usize,
    pub path: LayoutPath,
}

pub(crate) fn normalize_community(id: Option<&str>) -> Option<&str> {
    id.filter(|s| !s.is_empty())
}

/// Index-space view of a validated [`LayoutGraph`].
///
/// Nodes are ordered by entity id and edges by `(subject, predicate, object)`, so every iteration
/// order derived from this struct is independent of the caller's collection order.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub(crate) ids: Vec<String>,
    pub(crate) index: FxHashMap<String, usize>,
    pub(crate) community: Vec<Option<usize>>,
    pub(crate) community_ids: Vec<String>,
    pub(crate) observation_count: Vec<u64>,
    /// Sorted `(subject, predicate, object)` triples, self-loops included.
    pub(crate) relations: Vec<(String, String, String)>,
    /// Spring endpoints, one per non-self-loop relation, in `relations` order.
    pub(crate) edges: Vec<(usize, usize)>,
    /// Undirected neighbour lists (sorted, deduplicated).
    pub(crate) adjacency: Vec<Vec<usize>>,
    /// Same-community similarity pairs `(a, b, score)` with `a < b`.
    pub(crate) similarity: Vec<(usize, usize, f64)>,
    /// Raw similarity rows as supplied, sorted; they take part in the fingerprint.
    pub(crate) similarity_rows: Vec<(String, String, f64)>,
}

impl ResolvedGraph {
    fn build(graph: &LayoutGraph) -> Result<Self> {
        let mut ids: Vec<String> = Vec::with_capacity(graph.entities.len());
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for e in &graph.entities {
            if !seen.insert(e.id.as_str()) {
                return Err(Error::DuplicateEntity {
                    entity_id: e.id.clone(),
                });
            }
            ids.push(e.id.clone());
        }
        ids.sort();

        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        index.reserve(ids.len());
        for (idx, id) in ids.iter().enumerate() {
            index.insert(id.clone(), idx);
        }

        // Community membership lists are authoritative; `Entity::community_id` fills the gaps.
        let mut assigned: Vec<Option<&str>> = vec![None; ids.len()];
        for c in &graph.communities {
            for member in &c.member_entity_ids {
                let Some(&idx) = index.get(member.as_str()) else {
                    return Err(Error::UnknownMember {
                        community_id: c.id.clone(),
                        entity_id: member.clone(),
                    });
                };
                match assigned[idx] {
                    Some(prev) if prev != c.id.as_str() => {
                        return Err(Error::OverlappingCommunities {
                            entity_id: member.clone(),
                            first: prev.to_string(),
                            second: c.id.clone(),
                        });
                    }
                    _ => assigned[idx] = normalize_community(Some(c.id.as_str())),
                }
            }
        }

        let mut observation_count = vec![0u64; ids.len()];
        for e in &graph.entities {
            let idx = index[e.id.as_str()];
            observation_count[idx] = e.observation_count;
            if assigned[idx].is_none() {
                assigned[idx] = normalize_community(e.community_id.as_deref());
            } else if let Some(own) = normalize_community(e.community_id.as_deref()) {
                if assigned[idx] != Some(own) {
                    tracing::debug!(
                        entity = %e.id,
                        listed = ?assigned[idx],
                        own,
                        "community membership list overrides entity community_id"
                    );
                }
            }
        }

        let community_ids: Vec<String> = assigned
            .iter()
            .flatten()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let community = assigned
            .iter()
            .map(|c| c.map(|c| community_ids.partition_point(|x| x.as_str() < c)))
            .collect::<Vec<_>>();

        let mut relations: Vec<(String, String, String)> = Vec::with_capacity(graph.relations.len());
        for r in &graph.relations {
            for endpoint in [&r.subject_id, &r.object_id] {
                if !index.contains_key(endpoint.as_str()) {
                    return Err(Error::MissingEndpoint {
                        subject_id: r.subject_id.clone(),
                        predicate: r.predicate.clone(),
                        object_id: r.object_id.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            relations.push((
                r.subject_id.clone(),
                r.predicate.clone(),
                r.object_id.clone(),
            ));
        }
        relations.sort();

        let mut edges: Vec<(usize, usize)> = Vec::with_capacity(relations.len());
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        for (s, _, o) in &relations {
            let a = index[s.as_str()];
            let b = index[o.as_str()];
            if a == b {
                continue;
            }
            edges.push((a, b));
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }

        let mut similarity_rows: Vec<(String, String, f64)> = graph
            .similarity
            .iter()
            .map(|p| (p.a.clone(), p.b.clone(), p.score))
            .collect();
        similarity_rows.sort_by(|x, y| {
            (x.0.as_str(), x.1.as_str())
                .cmp(&(y.0.as_str(), y.1.as_str()))
                .then(x.2.total_cmp(&y.2))
        });

        let mut similarity: Vec<(usize, usize, f64)> = Vec::new();
        for (a, b, score) in &similarity_rows {
            let (Some(&ia), Some(&ib)) = (index.get(a.as_str()), index.get(b.as_str())) else {
                continue;
            };
            if ia == ib || !score.is_finite() || *score <= 0.0 {
                continue;
            }
            if community[ia].is_none() || community[ia] != community[ib] {
                continue;
            }
            similarity.push((ia.min(ib), ia.max(ib), score.min(1.0)));
        }
        similarity.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)).then(x.2.total_cmp(&y.2)));
        similarity.dedup_by(|later, earlier| (later.0, later.1) == (earlier.0, earlier.1));

        Ok(Self {
            ids,
            index,
            community,
            community_ids,
            observation_count,
            relations,
            edges,
            adjacency,
            similarity,
            similarity_rows,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn community_ids(&self) -> &[String] {
        &self.community_ids
    }

    pub fn community_of(&self, idx: usize) -> Option<&str> {
        self.community[idx].map(|c| self.community_ids[c].as_str())
    }

    pub fn neighbors(&self, idx: usize) -> &[usize] {
        &self.adjacency[idx]
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn topology(&self) -> Topology {
        Topology {
            entities: self
                .ids
                .iter()
                .enumerate()
                .map(|(idx, id)| {
                    (
                        id.clone(),
                        (
                            self.community_of(idx).map(str::to_string),
                            self.observation_count[idx],
                        ),
                    )
                })
                .collect(),
            relations: self.relations.iter().cloned().collect(),
        }
    }
}
