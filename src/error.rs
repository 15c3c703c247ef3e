use thiserror::Error;

use crate::cfg::BlockId;

/// The error type covering every structural failure this library can report.
///
/// All variants describe *internal invariant violations*: the expression tree
/// handed to the reducer, or the reducer itself, broke a structural
/// precondition. None of them represent user-facing source errors — those are
/// routed through [`crate::diag::Diagnostics`] and never abort translation.
///
/// # Error Categories
///
/// ## Reducer errors
/// - [`Error::ContinuationMismatch`] - A local recursive function is called
///   under two different continuations
/// - [`Error::ArityMismatch`] - A jump supplies the wrong number of arguments
/// - [`Error::ScopeMismatch`] - Scope stack popped out of push order
///
/// ## Normalization errors
/// - [`Error::UnreachableBlocks`] - Blocks unreachable from the entry or exit
///   after a topological sort
///
/// ## Drive-state errors
/// - [`Error::Invariant`] - A block was started twice, a value was produced
///   with no open block, or similar internal inconsistencies
#[derive(Error, Debug)]
pub enum Error {
    /// A local function reachable from several call sites was called under
    /// two different continuations.
    ///
    /// Every call to a block-lowered local function is a tail call: all call
    /// sites must return to the same join block. The first call site fixes
    /// the continuation; any later call site that would need a different one
    /// cannot be expressed as a jump.
    #[error("cannot express call to block {block} as a tail call: a different continuation was already adopted")]
    ContinuationMismatch {
        /// The target block whose continuation was already fixed.
        block: BlockId,
    },

    /// A jump supplied a different number of arguments than the target block
    /// has phi arguments.
    ///
    /// Goto arguments map positionally onto the target's phi slots, so the
    /// counts must match exactly.
    #[error("goto to block {target} supplies {supplied} argument(s), but the block takes {expected}")]
    ArityMismatch {
        /// The jump target.
        target: BlockId,
        /// The target's phi-argument count.
        expected: usize,
        /// The number of arguments the jump carried.
        supplied: usize,
    },

    /// A topological sort left blocks unvisited.
    ///
    /// The reducer is expected to produce a fully connected graph from entry
    /// to exit; a non-zero count indicates a defect in CFG construction, not
    /// a recoverable condition.
    #[error("control-flow graph is malformed: {count} block(s) unreachable from the {from}")]
    UnreachableBlocks {
        /// Number of blocks the sort never reached.
        count: usize,
        /// Which end of the graph the sort started from (`"entry"` or
        /// `"exit"`).
        from: &'static str,
    },

    /// The variable scope stack was popped out of order.
    ///
    /// Declarations must be popped in exact reverse order of their pushes;
    /// this is enforced by name equality.
    #[error("scope stack mismatch: expected to pop '{expected}', found '{found}'")]
    ScopeMismatch {
        /// The name the caller expected on top of the stack.
        expected: String,
        /// The name actually found.
        found: String,
    },

    /// An internal drive-state invariant of the reducer was violated.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}
