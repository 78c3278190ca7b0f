use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "relation {subject_id} -[{predicate}]-> {object_id} references a missing entity: {missing}"
    )]
    MissingEndpoint {
        subject_id: String,
        predicate: String,
        object_id: String,
        missing: String,
    },
    #[error("community {community_id} references a missing entity: {entity_id}")]
    UnknownMember {
        community_id: String,
        entity_id: String,
    },
    #[error("duplicate entity id: {entity_id}")]
    DuplicateEntity { entity_id: String },
    #[error("entity {entity_id} is a member of both community {first} and community {second}")]
    OverlappingCommunities {
        entity_id: String,
        first: String,
        second: String,
    },
    #[error("invalid layout config: `{field}` {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("layout computation was cancelled")]
    Cancelled,
    #[error("position store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classes as they cross the worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidInput,
    InvalidConfig,
    Cancelled,
    Storage,
    WorkerFailure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingEndpoint { .. }
            | Error::UnknownMember { .. }
            | Error::DuplicateEntity { .. }
            | Error::OverlappingCommunities { .. } => ErrorKind::InvalidInput,
            Error::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) | Error::Json(_) => ErrorKind::Storage,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
