//! Defines the error type shared by the registry, the graph and the evaluators.
use crate::store::{TypeConstraint, ValueType};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Name already in use: '{name}'")]
    DuplicateName { name: String },
    #[error("Unregistered node type: '{name}'")]
    UnknownType { name: String },
    #[error("Unknown node: '{name}'")]
    UnknownNode { name: String },
    #[error("Node '{node}' has no slot named '{slot}'")]
    UnknownSlot { node: String, slot: String },
    #[error("'{path}' must be a {expected}")]
    SlotKind { path: String, expected: &'static str },
    #[error("'{slot}' must be {expected}, not {found}")]
    TypeMismatch { slot: String, expected: TypeConstraint, found: ValueType },
    #[error("Incompatible types: '{source_slot}' ({source_type}) cannot feed '{dest_slot}' ({dest_type})")]
    IncompatibleSlots {
        source_slot: String,
        source_type: TypeConstraint,
        dest_slot: String,
        dest_type: TypeConstraint,
    },
    #[error("'{slot}' has an incoming connection")]
    ConnectedSlot { slot: String },
    #[error("'{source_slot}' is not connected to '{dest_slot}'")]
    NotConnected { source_slot: String, dest_slot: String },
    #[error("Cycle detected: connecting '{source_slot}' to '{dest_slot}'")]
    Cycle { source_slot: String, dest_slot: String },
    #[error("Invalid signature for '{name}': {reason}")]
    InvalidSignature { name: String, reason: String },
    #[error("Node '{node}' failed: {message}")]
    Execution { node: String, message: String },
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
    #[error("Evaluation stalled with {remaining} dirty node(s) and none ready")]
    Stalled { remaining: usize },
}

impl GraphError {
    /// A literal, result or connection violated a type constraint.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, GraphError::TypeMismatch { .. } | GraphError::IncompatibleSlots { .. })
    }

    /// True for the structural errors that are rejected before any mutation.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            GraphError::Execution { .. } | GraphError::WorkerPool(_) | GraphError::Stalled { .. }
        )
    }
}
