//! Force simulation.
//!
//! Forces per iteration, summed per node before a single position update:
//!
//! - community attraction: spring toward the node's community centroid (origin when the node has
//!   no community),
//! - similarity attraction: springs between same-community pairs, shorter for higher similarity,
//! - global repulsion: inverse-square charge, skipped beyond `repulsion_radius`,
//! - relation springs: weak springs along every relation.
//!
//! Integration is semi-implicit Euler with velocity damping. `alpha` scales all forces and decays
//! geometrically; the run stops when alpha falls below `alpha_min`, when no node moves more than
//! `rest_epsilon`, or at `max_iterations`.

mod grid;

use crate::algo::rng::XorShift64Star;
use crate::config::LayoutConfig;
use crate::error::{Error, Result};
use crate::graph::{Position, PositionMap, ResolvedGraph};
use grid::RepulsionGrid;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Intermediate snapshot for live "settling" views. Only non-pinned nodes are included.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub iteration: usize,
    /// Completion estimate in `[0, 1]`.
    pub progress: f64,
    pub positions: PositionMap,
}

/// Receives progress snapshots; returning `ControlFlow::Break` abandons the run.
pub type ProgressSink<'a> = &'a mut dyn FnMut(Progress) -> ControlFlow<()>;

/// Starting state for one simulation run, index-aligned with [`ResolvedGraph::ids`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSeed {
    pub positions: Vec<Position>,
    /// Pinned nodes keep their position and only act as force sources.
    pub pinned: Vec<bool>,
    /// Largest allowed distance from the starting position, per node.
    pub displacement_cap: Vec<Option<f64>>,
    pub alpha: f64,
}

impl SimulationSeed {
    /// Cold start: every node at its community centroid at `alpha_start`. The first node of each
    /// community (in id order) sits exactly on the centroid, the rest get seeded jitter.
    pub fn cold(
        graph: &ResolvedGraph,
        centroids: &BTreeMap<String, Position>,
        config: &LayoutConfig,
    ) -> Self {
        let node_centroids = node_centroids(graph, centroids);
        let mut occupied = vec![false; graph.community_ids.len() + 1];
        let positions = (0..graph.len())
            .map(|idx| {
                let slot = graph.community[idx].unwrap_or(graph.community_ids.len());
                let c = node_centroids[idx];
                if !std::mem::replace(&mut occupied[slot], true) {
                    return Position::from_vector(&c);
                }
                jittered(&c, config.seed, &graph.ids[idx], config.jitter_radius)
            })
            .collect();
        Self {
            positions,
            pinned: vec![false; graph.len()],
            displacement_cap: vec![None; graph.len()],
            alpha: config.alpha_start,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub positions: Vec<Position>,
    pub converged: bool,
    pub iterations_run: usize,
    /// Number of non-finite force or velocity values that were clamped away.
    pub instabilities: usize,
}

/// Centroid for every node: its community's point, or the origin for community-less nodes.
pub(crate) fn node_centroids(
    graph: &ResolvedGraph,
    centroids: &BTreeMap<String, Position>,
) -> Vec<Vector3<f64>> {
    (0..graph.len())
        .map(|idx| {
            graph
                .community_of(idx)
                .and_then(|c| centroids.get(c))
                .map(|p| p.to_vector())
                .unwrap_or_else(Vector3::zeros)
        })
        .collect()
}

/// `centroid` plus a random offset inside `radius`, drawn from a stream keyed by the entity id.
pub(crate) fn jittered(centroid: &Vector3<f64>, seed: u64, id: &str, radius: f64) -> Position {
    let mut rng = XorShift64Star::keyed(seed, id);
    Position::from_vector(&(centroid + rng.in_ball(radius)))
}

pub fn simulate(
    graph: &ResolvedGraph,
    centroids: &BTreeMap<String, Position>,
    seed: SimulationSeed,
    config: &LayoutConfig,
    mut progress: Option<ProgressSink<'_>>,
) -> Result<SimulationOutcome> {
    let n = graph.len();
    let centroid = node_centroids(graph, centroids);

    let mut instabilities = 0usize;
    let mut pos: Vec<Vector3<f64>> = Vec::with_capacity(n);
    for idx in 0..n {
        let p = seed.positions.get(idx).copied().unwrap_or_default();
        if p.is_finite() {
            pos.push(p.to_vector());
        } else {
            tracing::warn!(entity = %graph.ids[idx], "non-finite start position reset to centroid");
            instabilities += 1;
            pos.push(centroid[idx]);
        }
    }
    let start = pos.clone();
    let pinned: Vec<bool> = (0..n)
        .map(|i| seed.pinned.get(i).copied().unwrap_or(false))
        .collect();
    let cap: Vec<Option<f64>> = (0..n)
        .map(|i| seed.displacement_cap.get(i).copied().flatten())
        .collect();
    let active: Vec<usize> = (0..n).filter(|&i| !pinned[i]).collect();

    let to_outcome = |pos: &[Vector3<f64>], converged, iterations_run, instabilities| {
        SimulationOutcome {
            positions: pos.iter().map(Position::from_vector).collect(),
            converged,
            iterations_run,
            instabilities,
        }
    };

    if active.is_empty() {
        return Ok(to_outcome(&pos, true, 0, instabilities));
    }

    let charge: Vec<f64> = graph
        .observation_count
        .iter()
        .map(|&c| config.charge * (1.0 + config.observation_charge_factor * (c as f64).ln_1p()))
        .collect();
    let similarity_span = config.similarity_rest_max - config.similarity_rest_min;
    let repulsion_enabled = config.charge > 0.0 && config.repulsion_radius > 0.0;
    let radius_sq = config.repulsion_radius * config.repulsion_radius;

    let alpha_start = seed.alpha;
    let mut alpha = seed.alpha;
    let mut rng = XorShift64Star::new(config.seed);

    // Scratch arenas reused by every iteration.
    let mut vel: Vec<Vector3<f64>> = vec![Vector3::zeros(); n];
    let mut force: Vec<Vector3<f64>> = vec![Vector3::zeros(); n];

    let mut iterations = 0usize;
    let mut converged = false;
    loop {
        if alpha < config.alpha_min {
            converged = true;
            break;
        }
        if iterations >= config.max_iterations {
            break;
        }
        iterations += 1;

        force.fill(Vector3::zeros());

        for &i in &active {
            force[i] += (centroid[i] - pos[i]) * config.community_stiffness;
        }

        if config.similarity_stiffness > 0.0 {
            for &(a, b, score) in &graph.similarity {
                if pinned[a] && pinned[b] {
                    continue;
                }
                let rest = config.similarity_rest_max - similarity_span * score;
                let f = spring(&pos[a], &pos[b], rest, config.similarity_stiffness * score);
                force[a] += f;
                force[b] -= f;
            }
        }

        if config.link_stiffness > 0.0 {
            for &(a, b) in &graph.edges {
                if pinned[a] && pinned[b] {
                    continue;
                }
                let f = spring(&pos[a], &pos[b], config.link_distance, config.link_stiffness);
                force[a] += f;
                force[b] -= f;
            }
        }

        if repulsion_enabled {
            if let Some(grid) = RepulsionGrid::build(&pos, config.repulsion_radius) {
                for i in 0..n {
                    grid.for_each_candidate(i, &pos, |j| {
                        if pinned[i] && pinned[j] {
                            return;
                        }
                        let delta = pos[i] - pos[j];
                        let dist_sq = delta.norm_squared();
                        if dist_sq > radius_sq {
                            return;
                        }
                        let mut dist = dist_sq.sqrt();
                        let dir = if dist < 1e-12 {
                            rng.unit_vector()
                        } else {
                            delta / dist
                        };
                        if dist < config.min_distance {
                            dist = config.min_distance;
                        }
                        let magnitude = 0.5 * (charge[i] + charge[j]) / (dist * dist);
                        let f = dir * magnitude;
                        force[i] += f;
                        force[j] -= f;
                    });
                }
            }
        }

        let mut clamped = 0usize;
        let mut max_step = 0.0f64;
        for &i in &active {
            let mut f = force[i];
            if !finite(&f) {
                clamped += 1;
                f = Vector3::zeros();
            }
            let magnitude = f.norm();
            if magnitude > config.max_force {
                f *= config.max_force / magnitude;
            }

            let mut v = (vel[i] + f * alpha) * (1.0 - config.velocity_decay);
            if !finite(&v) {
                clamped += 1;
                v = Vector3::zeros();
            }
            let mut next = pos[i] + v;
            if !finite(&next) {
                clamped += 1;
                next = pos[i];
                v = Vector3::zeros();
            }
            if let Some(limit) = cap[i] {
                let offset = next - start[i];
                let len = offset.norm();
                if len > limit {
                    next = if len > 0.0 {
                        start[i] + offset * (limit / len)
                    } else {
                        start[i]
                    };
                    v = next - pos[i];
                }
            }

            max_step = max_step.max((next - pos[i]).norm());
            vel[i] = v;
            pos[i] = next;
        }
        if clamped > 0 {
            instabilities += clamped;
            tracing::warn!(
                iteration = iterations,
                clamped,
                "clamped non-finite force values during layout"
            );
        }

        alpha *= 1.0 - config.alpha_decay;

        if let Some(sink) = progress.as_mut() {
            if config.progress_interval > 0 && iterations.is_multiple_of(config.progress_interval)
            {
                let snapshot = Progress {
                    iteration: iterations,
                    progress: progress_fraction(
                        iterations,
                        alpha,
                        alpha_start,
                        config.alpha_min,
                        config.max_iterations,
                    ),
                    positions: active
                        .iter()
                        .map(|&i| (graph.ids[i].clone(), Position::from_vector(&pos[i])))
                        .collect(),
                };
                if sink(snapshot).is_break() {
                    tracing::debug!(iteration = iterations, "layout simulation cancelled");
                    return Err(Error::Cancelled);
                }
            }
        }

        if max_step < config.rest_epsilon {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            iterations,
            alpha,
            "layout hit the iteration cap before alpha decayed below threshold"
        );
    }
    tracing::debug!(
        nodes = n,
        active = active.len(),
        edges = graph.edges.len(),
        iterations,
        converged,
        "force simulation finished"
    );

    Ok(to_outcome(&pos, converged, iterations, instabilities))
}

/// Force on `a` from a spring between `a` and `b` with the given rest length and stiffness.
fn spring(a: &Vector3<f64>, b: &Vector3<f64>, rest: f64, stiffness: f64) -> Vector3<f64> {
    let delta = b - a;
    let len = delta.norm();
    if len < 1e-12 {
        return Vector3::zeros();
    }
    delta * (stiffness * (len - rest) / len)
}

fn finite(v: &Vector3<f64>) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

fn progress_fraction(
    iteration: usize,
    alpha: f64,
    alpha_start: f64,
    alpha_min: f64,
    max_iterations: usize,
) -> f64 {
    let by_iterations = iteration as f64 / max_iterations.max(1) as f64;
    let by_alpha = if alpha_start > alpha_min && alpha > 0.0 {
        (alpha_start / alpha).ln() / (alpha_start / alpha_min).ln()
    } else {
        1.0
    };
    by_iterations.max(by_alpha).clamp(0.0, 1.0)
}
