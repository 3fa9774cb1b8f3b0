//! Errors that abort a build.  They travel inside `anyhow::Error` and can be
//! recovered with `downcast_ref` by callers that care which one it was.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The build-order walk found a back edge.  `cycle` lists the node names
    /// from the repeated node around to itself.
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    NotADag { cycle: Vec<String> },

    #[error("unknown target {0:?}")]
    UnknownTarget(String),

    #[error("{node:?} is produced by more than one task")]
    DuplicateOwner { node: String },

    #[error("{failed} task(s) failed ({ran} ran)")]
    TasksFailed { failed: usize, ran: usize },

    #[error("build stalled: no task ready and none running")]
    Stalled,
}
