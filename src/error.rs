use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No port available on host {0}")]
    NoPortAvailable(String),

    #[error("Artifact storage failure at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact entry {entry:?} for worker {uid}")]
    InvalidEntry { uid: String, entry: String },

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid worker payload: {0}")]
    InvalidPayload(String),

    #[error("Payload decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Worker sync finished with partial failures")]
    PartialFailure,

    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// `NotFound` is a benign precondition on teardown paths; everything else
    /// aborts the operation that raised it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FleetError::NotFound(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound(_))
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FleetError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<FleetError> for tonic::Status {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NotFound(msg) => tonic::Status::not_found(msg),
            FleetError::NodeNotFound(name) => {
                tonic::Status::not_found(format!("node not found: {}", name))
            }
            FleetError::NoPortAvailable(host) => {
                tonic::Status::resource_exhausted(format!("no port available on {}", host))
            }
            e @ (FleetError::InvalidPayload(_)
            | FleetError::Decode(_)
            | FleetError::InvalidEntry { .. }) => tonic::Status::invalid_argument(e.to_string()),
            FleetError::Rpc(status) => status,
            e => tonic::Status::internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
