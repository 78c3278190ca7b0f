pub mod force;
pub mod incremental;
pub(crate) mod rng;
pub mod sphere;
