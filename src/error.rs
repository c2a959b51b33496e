//! # Error Types
//!
//! Typed failures raised by the analytics core. Boundary code (config
//! loading, catalog gateways) uses `anyhow` with context instead; only the
//! conditions a caller is expected to match on live here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// Structural precondition: the operation needs a single connected component.
    #[error("graph is not connected ({components} components)")]
    DisconnectedGraph { components: usize },

    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("invalid edge {from} -- {to}: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    #[error("attribute '{key}' on {node} is {found}, expected {expected}")]
    AttributeType {
        node: String,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("attribute '{key}' is not set on {node}")]
    MissingAttribute { node: String, key: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("computation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
