//! Chooses the cheapest layout path that keeps a cached layout valid.
//!
//! 1. cache hit: the fingerprint matches and every entity already has a position;
//! 2. fast placement: a few unconnected entities are new, everything else is untouched;
//! 3. incremental: warm-start relaxation around whatever changed;
//! 4. full: cold start from the community sphere.

use crate::algo::force::{ProgressSink, SimulationSeed, jittered, node_centroids, simulate};
use crate::algo::incremental::{IncrementalPlan, prepare_incremental};
use crate::algo::sphere::place_communities;
use crate::config::LayoutConfig;
use crate::error::Result;
use crate::graph::{
    LayoutGraph, LayoutPath, LayoutResult, Position, PositionMap, PreviousLayout, ResolvedGraph,
};
use crate::hash::{Fingerprint, fingerprint_resolved};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

pub fn compute_layout(
    graph: &LayoutGraph,
    previous: Option<&PreviousLayout>,
    config: &LayoutConfig,
) -> Result<LayoutResult> {
    compute_layout_with_progress(graph, previous, config, None)
}

/// Like [`compute_layout`], forwarding simulator snapshots to `progress`.
pub fn compute_layout_with_progress(
    graph: &LayoutGraph,
    previous: Option<&PreviousLayout>,
    config: &LayoutConfig,
    progress: Option<ProgressSink<'_>>,
) -> Result<LayoutResult> {
    config.validate()?;
    let resolved = graph.resolve()?;
    let fingerprint = fingerprint_resolved(&resolved);
    let started = Instant::now();

    let result = match previous {
        None => full(&resolved, fingerprint, config, progress)?,
        Some(prev) => {
            if let Some(hit) = cache_hit(&resolved, prev, fingerprint) {
                hit
            } else if let Some(placed) = fast_placement(&resolved, prev, fingerprint, config) {
                placed
            } else {
                incremental(&resolved, prev, fingerprint, config, progress)?
            }
        }
    };

    tracing::debug!(
        nodes = resolved.len(),
        path = ?result.path,
        iterations = result.iterations_run,
        converged = result.converged,
        elapsed_ms = started.elapsed().as_millis() as u64,
        layout_hash = %result.fingerprint,
        "layout computed"
    );
    Ok(result)
}

fn cache_hit(
    graph: &ResolvedGraph,
    previous: &PreviousLayout,
    fingerprint: Fingerprint,
) -> Option<LayoutResult> {
    if previous.fingerprint != Some(fingerprint) {
        return None;
    }
    let positions = previous_positions(graph, previous);
    if positions.len() != graph.len() {
        tracing::warn!(
            cached = positions.len(),
            nodes = graph.len(),
            "fingerprint matches but cached positions are incomplete"
        );
        return None;
    }
    Some(LayoutResult {
        positions,
        fingerprint,
        converged: true,
        iterations_run: 0,
        path: LayoutPath::CacheHit,
    })
}

fn fast_placement(
    graph: &ResolvedGraph,
    previous: &PreviousLayout,
    fingerprint: Fingerprint,
    config: &LayoutConfig,
) -> Option<LayoutResult> {
    let mut positions = previous_positions(graph, previous);
    let missing: Vec<usize> = (0..graph.len())
        .filter(|&idx| !positions.contains_key(&graph.ids[idx]))
        .collect();
    if missing.is_empty() {
        return None;
    }
    let share = missing.len() as f64 / graph.len() as f64;
    if share >= config.fast_placement_threshold {
        return None;
    }
    if missing.iter().any(|&idx| !graph.neighbors(idx).is_empty()) {
        return None;
    }
    if let Some(topology) = &previous.topology {
        let current: BTreeSet<&(String, String, String)> = graph.relations.iter().collect();
        let before: BTreeSet<&(String, String, String)> = topology.relations.iter().collect();
        if current != before {
            return None;
        }
        let touched = (0..graph.len()).any(|idx| {
            let id = &graph.ids[idx];
            positions.contains_key(id)
                && topology.entities.get(id)
                    != Some(&(
                        graph.community_of(idx).map(str::to_string),
                        graph.observation_count[idx],
                    ))
        });
        if touched {
            return None;
        }
    }

    let centroids = place_communities(graph.community_ids(), config.sphere_radius);
    let centroid = node_centroids(graph, &centroids);
    for &idx in &missing {
        let id = &graph.ids[idx];
        positions.insert(
            id.clone(),
            jittered(&centroid[idx], config.seed, id, config.jitter_radius),
        );
    }
    tracing::debug!(placed = missing.len(), share, "fast placement");

    Some(LayoutResult {
        positions,
        fingerprint,
        converged: true,
        iterations_run: 0,
        path: LayoutPath::FastPlacement,
    })
}

fn incremental(
    graph: &ResolvedGraph,
    previous: &PreviousLayout,
    fingerprint: Fingerprint,
    config: &LayoutConfig,
    progress: Option<ProgressSink<'_>>,
) -> Result<LayoutResult> {
    let centroids = place_communities(graph.community_ids(), config.sphere_radius);
    match prepare_incremental(previous, graph, fingerprint, &centroids, config) {
        IncrementalPlan::Unchanged(positions) => Ok(LayoutResult {
            positions,
            fingerprint,
            converged: true,
            iterations_run: 0,
            path: LayoutPath::Incremental,
        }),
        IncrementalPlan::Relax { seed, .. } => run(
            graph,
            &centroids,
            seed,
            fingerprint,
            config,
            progress,
            LayoutPath::Incremental,
        ),
    }
}

fn full(
    graph: &ResolvedGraph,
    fingerprint: Fingerprint,
    config: &LayoutConfig,
    progress: Option<ProgressSink<'_>>,
) -> Result<LayoutResult> {
    let centroids = place_communities(graph.community_ids(), config.sphere_radius);
    let seed = SimulationSeed::cold(graph, &centroids, config);
    run(graph, &centroids, seed, fingerprint, config, progress, LayoutPath::Full)
}

fn run(
    graph: &ResolvedGraph,
    centroids: &BTreeMap<String, Position>,
    seed: SimulationSeed,
    fingerprint: Fingerprint,
    config: &LayoutConfig,
    progress: Option<ProgressSink<'_>>,
    path: LayoutPath,
) -> Result<LayoutResult> {
    let outcome = simulate(graph, centroids, seed, config, progress)?;
    let positions = graph
        .ids
        .iter()
        .cloned()
        .zip(outcome.positions)
        .collect::<PositionMap>();
    Ok(LayoutResult {
        positions,
        fingerprint,
        converged: outcome.converged,
        iterations_run: outcome.iterations_run,
        path,
    })
}

/// Finite cached positions of the entities that still exist.
fn previous_positions(graph: &ResolvedGraph, previous: &PreviousLayout) -> PositionMap {
    graph
        .ids
        .iter()
        .filter_map(|id| {
            previous
                .positions
                .get(id)
                .filter(|p| p.is_finite())
                .map(|p| (id.clone(), *p))
        })
        .collect()
}
