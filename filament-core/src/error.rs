//! Error types for the reactive engine.
//!
//! Propagation itself never fails: unknown state has no subscribers and
//! unchanged writes do nothing. Computations that fail do so by panicking,
//! and the engine restores its execution stack on the way out. The errors
//! here cover the data side: walking observed containers and moving them
//! in and out of JSON.

use thiserror::Error;

use crate::reactive::ContainerId;

/// Error produced when reading or converting observed data.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReactiveError {
    /// A path hop, or a JSON document root, is not a container.
    #[error("value at `{path}` is not a container")]
    NotAContainer {
        /// Dotted path of the offending value (`$` for a document root).
        path: String,
    },

    /// An empty path was given where at least one field is required.
    #[error("path is empty")]
    EmptyPath,

    /// The JSON value has no representation as container data.
    #[error("unsupported JSON value: {kind}")]
    UnsupportedJson {
        /// The JSON kind that was rejected.
        kind: &'static str,
    },

    /// A container reaches itself, so it cannot be exported as a tree.
    #[error("container {container} contains itself")]
    Cycle {
        /// The container that was reached twice.
        container: ContainerId,
    },

    /// Malformed JSON text.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReactiveError::NotAContainer { .. } => "not_a_container",
            ReactiveError::EmptyPath => "empty_path",
            ReactiveError::UnsupportedJson { .. } => "unsupported_json",
            ReactiveError::Cycle { .. } => "container_cycle",
            ReactiveError::Json(_) => "invalid_json",
        }
    }
}
