//! Error types for the CFG construction engine.
//!
//! Mirrors the error *kinds* named by the engine's contract: an invalid
//! construction argument, an allocation failure, or a trace that violates the
//! per-opcode fan-out discipline.

use thiserror::Error;

/// Errors the builder and its collaborators can surface.
///
/// Recovery policy: after [`BuilderError::InconsistentTrace`] the builder is
/// still usable — the offending observation was simply dropped. After
/// [`BuilderError::AllocationFailure`] the builder should be considered
/// tainted and torn down by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// Zero size, empty opcode buffer, or a zero-sized table.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An underlying allocation was refused.
    #[error("allocation failure while inserting node at 0x{0:x}")]
    AllocationFailure(u64),

    /// A `basic` node would gain a second successor, or a `branch` a third.
    #[error("inconsistent trace: {0}")]
    InconsistentTrace(String),
}
