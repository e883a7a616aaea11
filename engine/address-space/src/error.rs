//! Error types for the address space and its clients

use thiserror::Error;

use crate::node::NodeId;

/// Errors returned by address space operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AddressSpaceError {
    #[error("Namespace index {0} is not registered")]
    UnknownNamespace(u16),

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Node {0} is not a variable")]
    NotAVariable(NodeId),

    #[error("Node {node}: expected {expected} value, got {found}")]
    TypeMismatch { node: NodeId, expected: &'static str, found: &'static str },

    #[error("Node {parent} already has a child named {name:?}")]
    DuplicateBrowseName { parent: NodeId, name: String },
}

/// Connection-level failures between a client and a server.
///
/// Recoverable by reconnecting; [`RetryPolicy`](crate::RetryPolicy) turns
/// repeated failures into [`TransportError::RetriesExhausted`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Disconnected from {0}")]
    Disconnected(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Gave up on {what} after {attempts} attempts: {last_error}")]
    RetriesExhausted { what: String, attempts: u32, last_error: String },
}
