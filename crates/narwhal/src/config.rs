use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Every tunable of the layout engine.
///
/// All values are engine inputs; nothing is read from the environment. Deserialization is
/// lenient (missing fields take their defaults) so callers can override a handful of knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Seed for every random draw (cold-start jitter, fast placement, coincident-point
    /// tie-breaking).
    pub seed: u64,

    /// Cold-start simulation intensity.
    pub alpha_start: f64,
    /// Warm-start intensity used by incremental relayouts.
    pub alpha_warm: f64,
    /// Convergence threshold: the run stops once alpha decays below it.
    pub alpha_min: f64,
    /// Geometric decay applied to alpha after every iteration.
    pub alpha_decay: f64,
    /// Fraction of velocity removed after every iteration.
    pub velocity_decay: f64,
    pub max_iterations: usize,
    /// Largest per-node step (world units) below which the system counts as at rest.
    pub rest_epsilon: f64,
    /// Emit a progress snapshot every N iterations (0 disables progress).
    pub progress_interval: usize,

    /// Hop count beyond which nodes stay pinned during an incremental relayout.
    pub freeze_radius: usize,
    /// Cap on an unfrozen node's displacement, as a fraction of its distance to its centroid.
    pub max_displacement_fraction: f64,
    /// Largest share of unpositioned nodes that still uses the fast placement path.
    pub fast_placement_threshold: f64,

    pub sphere_radius: f64,
    /// Radius of the random offset applied around a community centroid.
    pub jitter_radius: f64,

    pub community_stiffness: f64,
    pub similarity_stiffness: f64,
    /// Rest distance for a pair with similarity 1.
    pub similarity_rest_min: f64,
    /// Rest distance for a pair with similarity approaching 0.
    pub similarity_rest_max: f64,
    pub charge: f64,
    /// Pairs farther apart than this do not repel.
    pub repulsion_radius: f64,
    /// Distance floor applied before the inverse-square term.
    pub min_distance: f64,
    pub link_stiffness: f64,
    pub link_distance: f64,
    /// Largest net force magnitude applied to a node in one iteration.
    pub max_force: f64,
    /// Charge growth per `ln(1 + observation_count)`.
    pub observation_charge_factor: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            alpha_start: 1.0,
            alpha_warm: 0.1,
            alpha_min: 0.001,
            alpha_decay: 0.0228,
            velocity_decay: 0.4,
            max_iterations: 300,
            rest_epsilon: 1e-6,
            progress_interval: 10,
            freeze_radius: 3,
            max_displacement_fraction: 0.2,
            fast_placement_threshold: 0.1,
            sphere_radius: 200.0,
            jitter_radius: 15.0,
            community_stiffness: 0.08,
            similarity_stiffness: 0.05,
            similarity_rest_min: 8.0,
            similarity_rest_max: 40.0,
            charge: 300.0,
            repulsion_radius: 60.0,
            min_distance: 1.0,
            link_stiffness: 0.02,
            link_distance: 30.0,
            max_force: 50.0,
            observation_charge_factor: 0.25,
        }
    }
}

impl LayoutConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
            Error::InvalidConfig {
                field,
                reason: reason.into(),
            }
        }

        let non_negative = [
            ("sphereRadius", self.sphere_radius),
            ("jitterRadius", self.jitter_radius),
            ("communityStiffness", self.community_stiffness),
            ("similarityStiffness", self.similarity_stiffness),
            ("similarityRestMin", self.similarity_rest_min),
            ("charge", self.charge),
            ("repulsionRadius", self.repulsion_radius),
            ("linkStiffness", self.link_stiffness),
            ("linkDistance", self.link_distance),
            ("observationChargeFactor", self.observation_charge_factor),
            ("restEpsilon", self.rest_epsilon),
        ];
        for (field, v) in non_negative {
            if !(v.is_finite() && v >= 0.0) {
                return Err(invalid(field, format!("must be finite and >= 0 (got {v})")));
            }
        }

        let positive = [
            ("alphaStart", self.alpha_start),
            ("alphaWarm", self.alpha_warm),
            ("alphaMin", self.alpha_min),
            ("minDistance", self.min_distance),
            ("maxForce", self.max_force),
        ];
        for (field, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(invalid(field, format!("must be finite and > 0 (got {v})")));
            }
        }

        let open_unit = [
            ("alphaDecay", self.alpha_decay),
            ("velocityDecay", self.velocity_decay),
        ];
        for (field, v) in open_unit {
            if !(v > 0.0 && v < 1.0) {
                return Err(invalid(field, format!("must lie in (0, 1) (got {v})")));
            }
        }

        let closed_unit = [
            ("maxDisplacementFraction", self.max_displacement_fraction),
            ("fastPlacementThreshold", self.fast_placement_threshold),
        ];
        for (field, v) in closed_unit {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(field, format!("must lie in [0, 1] (got {v})")));
            }
        }

        if self.similarity_rest_max < self.similarity_rest_min || !self.similarity_rest_max.is_finite()
        {
            return Err(invalid(
                "similarityRestMax",
                "must be finite and >= similarityRestMin",
            ));
        }
        if self.max_iterations == 0 {
            return Err(invalid("maxIterations", "must be at least 1"));
        }
        Ok(())
    }
}
