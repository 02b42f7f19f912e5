use std::path::PathBuf;

use thiserror::Error;

use crate::dialogue::node::NodeId;
use crate::dialogue::tree::DataInjection;

/// Failures while turning a JSON definition into a [`Tree`](crate::dialogue::tree::Tree).
/// Any of these aborts construction; the caller gets no tree.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("failed to read tree definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed tree definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node {node}: {source}")]
    InvalidNode {
        node: NodeId,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid node id '{0}'")]
    InvalidNodeId(String),

    #[error("node {node}: expected a number, got '{value}'")]
    InvalidNumber { node: NodeId, value: String },

    #[error("duplicate node id {0}")]
    DuplicateNodeId(NodeId),
}

/// Failures that end an interpreter session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("data injection {0:?} must happen before a session starts")]
    PendingInjection(DataInjection),

    #[error("tree has no root node (id 1)")]
    MissingRoot,

    #[error("node {0} routed to no successor but is not an end node")]
    RoutingFallthrough(NodeId),

    #[error("session already finished")]
    Finished,

    #[error("input closed before the dialogue finished")]
    InputClosed,

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
