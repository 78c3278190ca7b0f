#![forbid(unsafe_code)]

//! Deterministic, incremental 3D layout for knowledge graphs.
//!
//! Communities are spread over a sphere, entities settle around their community through a seeded
//! force simulation, and later runs reuse the previous layout: unchanged graphs are a cache hit,
//! small changes only move the neighbourhood of what changed.

pub mod algo;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod hash;
pub mod similarity;
pub mod store;
pub mod worker;

pub use algo::force::{Progress, ProgressSink};
pub use config::LayoutConfig;
pub use coordinator::{compute_layout, compute_layout_with_progress};
pub use error::{Error, ErrorKind, Result};
pub use graph::{
    Community, Entity, LayoutGraph, LayoutPath, LayoutResult, Position, PositionMap,
    PreviousLayout, Relation, ResolvedGraph, SimilarityPair, Topology,
};
pub use hash::{Fingerprint, LAYOUT_VERSION, fingerprint, fingerprint_resolved};
pub use store::{DEFAULT_SCOPE, JsonFileStore, MemoryStore, PositionStore, StoredLayout};
pub use worker::{ComputeRequest, LayoutWorker, WorkerMessage, WorkerRequest, run_compute};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
