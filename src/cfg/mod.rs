//! Control-flow graph types: blocks, terminators, the graph container and
//! the normalization passes.
//!
//! A [`Scfg`] is produced by [`crate::lower::CfgReducer`] and brought into
//! normal form by [`Scfg::compute_normal_form`], after which block order,
//! instruction numbering and both dominator trees are final.

mod block;
mod graph;
mod normalize;

pub use block::{BasicBlock, BlockId, Terminator, TreeNode};
pub use graph::Scfg;
