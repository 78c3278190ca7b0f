//! Stability-constrained relayout for graphs that changed slightly.
//!
//! Nodes more than `freeze_radius` hops away from anything that changed are pinned, unfrozen
//! nodes may drift at most `max_displacement_fraction` of their distance to their community
//! centroid, and the simulation restarts from the previous positions at a low alpha.

use crate::algo::force::{SimulationSeed, jittered, node_centroids};
use crate::config::LayoutConfig;
use crate::graph::{Position, PositionMap, PreviousLayout, ResolvedGraph};
use crate::hash::Fingerprint;
use indexmap::IndexSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// What changed between the previous layout and the current graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Nodes without a usable previous position.
    pub added: Vec<usize>,
    /// Previously positioned entities that are gone.
    pub removed: Vec<String>,
    /// Nodes whose community or observation count changed.
    pub changed: Vec<usize>,
    /// Current nodes from which freeze distances are measured, in discovery order.
    pub origins: IndexSet<usize>,
    /// Undirected links of removed relations whose endpoints both survive.
    pub removed_links: Vec<(usize, usize)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn diff(previous: &PreviousLayout, graph: &ResolvedGraph) -> Self {
        let mut out = ChangeSet::default();

        for (idx, id) in graph.ids.iter().enumerate() {
            match previous.positions.get(id) {
                Some(p) if p.is_finite() => {}
                Some(_) => {
                    tracing::warn!(entity = %id, "ignoring non-finite cached position");
                    out.added.push(idx);
                }
                None => out.added.push(idx),
            }
        }
        out.removed = previous
            .positions
            .keys()
            .filter(|id| graph.index_of(id).is_none())
            .cloned()
            .collect();
        out.origins.extend(out.added.iter().copied());

        match &previous.topology {
            Some(topology) => {
                for (idx, id) in graph.ids.iter().enumerate() {
                    let current = (
                        graph.community_of(idx).map(str::to_string),
                        graph.observation_count[idx],
                    );
                    match topology.entities.get(id) {
                        Some(prev) if *prev == current => {}
                        _ => {
                            if !out.origins.contains(&idx) {
                                out.changed.push(idx);
                            }
                        }
                    }
                }
                out.origins.extend(out.changed.iter().copied());

                let current: BTreeSet<&(String, String, String)> = graph.relations.iter().collect();
                let before: BTreeSet<&(String, String, String)> =
                    topology.relations.iter().collect();
                for (s, _, o) in current.symmetric_difference(&before) {
                    out.origins.extend(graph.index_of(s));
                    out.origins.extend(graph.index_of(o));
                }
                for (s, _, o) in before.difference(&current) {
                    if let (Some(a), Some(b)) = (graph.index_of(s), graph.index_of(o)) {
                        if a != b {
                            out.removed_links.push((a, b));
                        }
                    }
                }
            }
            None => {
                // Without the previous relations only edges touching new nodes are known to be new.
                for &(a, b) in &graph.edges {
                    let a_new = out.added.binary_search(&a).is_ok();
                    let b_new = out.added.binary_search(&b).is_ok();
                    if a_new || b_new {
                        out.origins.insert(a);
                        out.origins.insert(b);
                    }
                }
            }
        }

        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncrementalPlan {
    /// Nothing reachable changed: keep the previous positions, run zero iterations.
    Unchanged(PositionMap),
    Relax {
        seed: SimulationSeed,
        changes: ChangeSet,
    },
}

pub fn prepare_incremental(
    previous: &PreviousLayout,
    graph: &ResolvedGraph,
    new_fingerprint: Fingerprint,
    centroids: &BTreeMap<String, Position>,
    config: &LayoutConfig,
) -> IncrementalPlan {
    let changes = ChangeSet::diff(previous, graph);
    if previous.fingerprint == Some(new_fingerprint) || changes.is_empty() {
        let kept = graph
            .ids
            .iter()
            .filter_map(|id| {
                previous
                    .positions
                    .get(id)
                    .filter(|p| p.is_finite())
                    .map(|p| (id.clone(), *p))
            })
            .collect::<PositionMap>();
        if kept.len() == graph.len() {
            if previous.fingerprint.is_some_and(|f| f != new_fingerprint) {
                tracing::warn!(
                    cached = kept.len(),
                    "layout hash changed but no entity or relation change could be located; keeping previous positions"
                );
            }
            return IncrementalPlan::Unchanged(kept);
        }
    }

    let hops = hop_distances(graph, &changes);
    let centroid = node_centroids(graph, centroids);

    let n = graph.len();
    let mut positions = Vec::with_capacity(n);
    let mut pinned = Vec::with_capacity(n);
    let mut displacement_cap = Vec::with_capacity(n);
    for idx in 0..n {
        let id = &graph.ids[idx];
        let prev = previous.positions.get(id).copied().filter(Position::is_finite);
        let frozen = hops[idx].is_none_or(|d| d > config.freeze_radius);
        match prev {
            Some(p) => {
                positions.push(p);
                pinned.push(frozen);
                displacement_cap.push(if frozen {
                    None
                } else {
                    Some(
                        config.max_displacement_fraction
                            * (p.to_vector() - centroid[idx]).norm(),
                    )
                });
            }
            None => {
                positions.push(jittered(&centroid[idx], config.seed, id, config.jitter_radius));
                pinned.push(false);
                displacement_cap.push(None);
            }
        }
    }

    let frozen = pinned.iter().filter(|p| **p).count();
    tracing::debug!(
        added = changes.added.len(),
        removed = changes.removed.len(),
        changed = changes.changed.len(),
        origins = changes.origins.len(),
        frozen,
        "prepared incremental relayout"
    );

    IncrementalPlan::Relax {
        seed: SimulationSeed {
            positions,
            pinned,
            displacement_cap,
            alpha: config.alpha_warm,
        },
        changes,
    }
}

/// Hop count from the nearest change origin, over current relations plus removed ones.
fn hop_distances(graph: &ResolvedGraph, changes: &ChangeSet) -> Vec<Option<usize>> {
    let mut extra: Vec<Vec<usize>> = vec![Vec::new(); graph.len()];
    for &(a, b) in &changes.removed_links {
        extra[a].push(b);
        extra[b].push(a);
    }

    let mut dist: Vec<Option<usize>> = vec![None; graph.len()];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for &o in &changes.origins {
        if dist[o].is_none() {
            dist[o] = Some(0);
            queue.push_back(o);
        }
    }
    while let Some(u) = queue.pop_front() {
        let next = dist[u].unwrap_or(0) + 1;
        for &v in graph.neighbors(u).iter().chain(extra[u].iter()) {
            if dist[v].is_none() {
                dist[v] = Some(next);
                queue.push_back(v);
            }
        }
    }
    dist
}
