//! Message-passing boundary around the coordinator.
//!
//! One `compute` request produces zero or more `progress` messages followed by exactly one
//! terminal `positions` or `error` message. [`LayoutWorker`] runs requests on a dedicated thread;
//! [`run_compute`] is the same contract driven synchronously by the caller.

use crate::algo::force::Progress;
use crate::config::LayoutConfig;
use crate::coordinator::compute_layout_with_progress;
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{
    Community, Entity, LayoutGraph, LayoutResult, PositionMap, PreviousLayout, Relation,
    SimilarityPair,
};
use crate::hash::Fingerprint;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    Compute(ComputeRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeRequest {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub communities: Vec<Community>,
    #[serde(default)]
    pub existing_positions: PositionMap,
    /// `false` ignores `existing_positions` and lays the graph out from scratch.
    #[serde(default)]
    pub is_incremental: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_hash: Option<Fingerprint>,
    /// The graph `existing_positions` was computed for; enables exact change detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_entities: Option<Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_relations: Option<Vec<Relation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_communities: Option<Vec<Community>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similarity: Vec<SimilarityPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<LayoutConfig>,
}

impl ComputeRequest {
    pub fn graph(&self) -> LayoutGraph {
        LayoutGraph::new(
            self.entities.clone(),
            self.relations.clone(),
            self.communities.clone(),
        )
        .with_similarity(self.similarity.clone())
    }

    /// The cached layout this request refers to, if the request is incremental and carries one.
    pub fn previous(&self) -> Result<Option<PreviousLayout>> {
        if !self.is_incremental || self.existing_positions.is_empty() {
            return Ok(None);
        }
        let mut previous = PreviousLayout::new(self.existing_positions.clone());
        previous.fingerprint = self.layout_hash;
        if let Some(entities) = &self.previous_entities {
            let graph = LayoutGraph::new(
                entities.clone(),
                self.previous_relations.clone().unwrap_or_default(),
                self.previous_communities.clone().unwrap_or_default(),
            );
            previous.topology = Some(graph.topology()?);
        }
        Ok(Some(previous))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Snapshot of the nodes still moving.
    Progress { positions: PositionMap, progress: f64 },
    Positions(LayoutResult),
    Error { kind: ErrorKind, message: String },
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress { .. })
    }

    fn from_error(err: &Error) -> Self {
        WorkerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn worker_failure(message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            kind: ErrorKind::WorkerFailure,
            message: message.into(),
        }
    }
}

/// Runs one request on the current thread and returns its terminal message.
///
/// `on_progress` receives every progress message; returning `Break` cancels the run. A request
/// `config` replaces `defaults` wholesale. Panics are caught and reported as `workerFailure`.
pub fn run_compute(
    request: &ComputeRequest,
    defaults: &LayoutConfig,
    on_progress: &mut dyn FnMut(WorkerMessage) -> ControlFlow<()>,
) -> WorkerMessage {
    guarded(|| {
        let config = request.config.as_ref().unwrap_or(defaults);
        let previous = request.previous()?;
        let mut sink = |p: Progress| {
            on_progress(WorkerMessage::Progress {
                positions: p.positions,
                progress: p.progress,
            })
        };
        compute_layout_with_progress(&request.graph(), previous.as_ref(), config, Some(&mut sink))
    })
}

fn guarded(f: impl FnOnce() -> Result<LayoutResult>) -> WorkerMessage {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(result)) => WorkerMessage::Positions(result),
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "compute request failed");
            WorkerMessage::from_error(&err)
        }
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(panic = %detail, "layout worker panicked");
            WorkerMessage::worker_failure(format!("layout worker panicked: {detail}"))
        }
    }
}

struct Job {
    request: ComputeRequest,
    reply: mpsc::Sender<WorkerMessage>,
}

/// Long-lived layout thread serving requests one at a time.
///
/// Dropping the receiver returned by [`LayoutWorker::submit`] cancels that request at its next
/// progress point.
#[derive(Debug)]
pub struct LayoutWorker {
    jobs: Option<mpsc::Sender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LayoutWorker {
    pub fn spawn(defaults: LayoutConfig) -> Result<Self> {
        defaults.validate()?;
        let (jobs, inbox) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("narwhal-layout".to_string())
            .spawn(move || {
                for job in inbox {
                    let reply = job.reply;
                    let terminal = run_compute(&job.request, &defaults, &mut |msg| {
                        match reply.send(msg) {
                            Ok(()) => ControlFlow::Continue(()),
                            Err(_) => ControlFlow::Break(()),
                        }
                    });
                    if reply.send(terminal).is_err() {
                        tracing::debug!("layout requester went away before the result");
                    }
                }
                tracing::debug!("layout worker stopped");
            })?;
        Ok(Self {
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }

    /// Queues a request. The receiver yields the request's messages, terminal message last.
    pub fn submit(&self, request: ComputeRequest) -> mpsc::Receiver<WorkerMessage> {
        let (reply, messages) = mpsc::channel();
        let job = Job {
            request,
            reply: reply.clone(),
        };
        let queued = match &self.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        };
        if !queued {
            let _ = reply.send(WorkerMessage::worker_failure("layout worker is not running"));
        }
        messages
    }

    /// Finishes queued requests, then stops the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("layout worker thread panicked");
            }
        }
    }
}

impl Drop for LayoutWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let json = r#"{
            "type": "compute",
            "entities": [{"id": "a"}, {"id": "b", "community_id": "k"}],
            "relations": [{"subject_id": "a", "predicate": "knows", "object_id": "b"}],
            "communities": [],
            "existingPositions": {"a": {"x": 1.0, "y": 2.0, "z": 3.0}},
            "isIncremental": true
        }"#;
        let WorkerRequest::Compute(req) = serde_json::from_str(json).unwrap();
        assert_eq!(req.entities.len(), 2);
        assert!(req.is_incremental);
        assert_eq!(req.existing_positions["a"].z, 3.0);
        assert!(req.previous().unwrap().is_some());
    }

    #[test]
    fn non_incremental_requests_ignore_existing_positions() {
        let mut req = ComputeRequest {
            entities: vec![Entity::new("a")],
            ..Default::default()
        };
        req.existing_positions
            .insert("a".into(), crate::graph::Position::ORIGIN);
        assert!(req.previous().unwrap().is_none());
    }

    #[test]
    fn message_wire_shape() {
        let msg = WorkerMessage::Error {
            kind: ErrorKind::InvalidInput,
            message: "boom".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["kind"], "invalidInput");
        assert!(msg.is_terminal());
    }

    #[test]
    fn panics_become_worker_failures() {
        let msg = guarded(|| panic!("simulated crash"));
        match msg {
            WorkerMessage::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::WorkerFailure);
                assert!(message.contains("simulated crash"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn invalid_input_is_reported_not_raised() {
        let req = ComputeRequest {
            entities: vec![Entity::new("a")],
            relations: vec![Relation::new("a", "r", "ghost")],
            ..Default::default()
        };
        let msg = run_compute(&req, &LayoutConfig::default(), &mut |_| ControlFlow::Continue(()));
        assert!(matches!(
            msg,
            WorkerMessage::Error {
                kind: ErrorKind::InvalidInput,
                ..
            }
        ));
    }
}
