//! Error types for tree construction and insertion.
//!
//! Lookups never fail: a missing element is reported as `None` (or `false`
//! for [`erase`](crate::UnrolledAvlTree::erase)). The only failures are a
//! rejected configuration and an allocation that could not be satisfied.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors returned by [`UnrolledAvlTree`](crate::UnrolledAvlTree).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The requested node capacity cannot be used.
    ///
    /// Raised at construction time, before any node has been allocated.
    #[error("node capacity {capacity} is outside the supported range {min}..={max}")]
    InvalidConfiguration {
        capacity: usize,
        min: usize,
        max: usize,
    },

    /// Memory for a node or its element run could not be reserved.
    ///
    /// The tree is left exactly as it was before the failing call.
    #[error("out of memory while allocating a tree node")]
    OutOfMemory(#[from] TryReserveError),

    /// Every node index is in use.
    #[error("node limit of {limit} reached")]
    NodeLimit { limit: usize },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeError>;
