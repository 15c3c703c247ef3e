//! Basic blocks, terminators and dominator-tree records.

use std::fmt;

use crate::ir::{Expr, ExprArena, ExprId};

/// A strongly-typed index of a basic block within an [`super::Scfg`].
///
/// Block storage is stable: a `BlockId` is the index into the graph's block
/// vector and never changes, even when normalization renumbers the blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    /// Creates a `BlockId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the raw index value.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// The control transfer ending a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// An unconditional jump.
    Goto {
        /// The jump target.
        target: BlockId,
        /// The predecessor-edge index this jump occupies in the target's
        /// phi operand lists.
        phi_index: usize,
    },
    /// A two-way conditional jump. Branch targets take no phi arguments.
    Branch {
        /// The branch condition.
        condition: ExprId,
        /// Target when the condition is true.
        then_block: BlockId,
        /// Target when the condition is false.
        else_block: BlockId,
    },
    /// Function return.
    Return {
        /// The returned value.
        value: ExprId,
    },
}

impl Terminator {
    /// Returns the successor blocks this terminator can transfer to.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto { target, .. } => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return { .. } => Vec::new(),
        }
    }
}

/// One node of a dominator or post-dominator tree.
///
/// After normalization, tree membership is answered in O(1): block ids are
/// assigned so every subtree occupies a contiguous interval, and `A`
/// dominates `B` exactly when `B`'s id falls inside `A`'s interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeNode {
    /// The immediate (post-)dominator, `None` for the tree root.
    pub parent: Option<BlockId>,
    /// Number of blocks in this node's subtree, itself included.
    pub subtree_size: usize,
    /// Position in the Euler-interval numbering of the tree.
    pub id: usize,
}

impl TreeNode {
    /// Returns `true` if this node's subtree interval contains `other`.
    ///
    /// Reflexive: every node encloses itself.
    #[must_use]
    pub fn encloses(&self, other: &TreeNode) -> bool {
        other.id >= self.id && other.id - self.id < self.subtree_size
    }
}

/// A basic block: phi arguments, a straight-line instruction list and one
/// terminator.
///
/// Instructions and phi arguments are [`ExprId`]s into the compilation
/// unit's [`ExprArena`]. Predecessor edges and phi operand slots grow in
/// lock-step through [`BasicBlock::add_predecessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Position in the final topological order (entry = 0).
    pub(crate) block_id: usize,
    /// Position in the final post-topological order (exit = 0).
    pub(crate) post_block_id: usize,
    /// Block-entry phi nodes, one operand slot per predecessor edge.
    pub(crate) arguments: Vec<ExprId>,
    /// Straight-line instructions in execution order.
    pub(crate) instructions: Vec<ExprId>,
    /// The terminator, `None` while the block is still open.
    pub(crate) terminator: Option<Terminator>,
    /// Predecessor blocks in edge order.
    pub(crate) predecessors: Vec<BlockId>,
    /// Whether the block was ever started; unstarted blocks are not part of
    /// the graph and are skipped by normalization.
    pub(crate) in_graph: bool,
    /// Scratch flag for the topological sorts.
    pub(crate) visited: bool,
    /// Dominator-tree record.
    pub(crate) dom: TreeNode,
    /// Post-dominator-tree record.
    pub(crate) post_dom: TreeNode,
}

impl BasicBlock {
    pub(crate) fn new() -> Self {
        BasicBlock {
            block_id: 0,
            post_block_id: 0,
            arguments: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
            predecessors: Vec::new(),
            in_graph: false,
            visited: false,
            dom: TreeNode::default(),
            post_dom: TreeNode::default(),
        }
    }

    /// Returns the block's position in the final topological order.
    #[must_use]
    pub fn block_id(&self) -> usize {
        self.block_id
    }

    /// Returns the block's position in the final post-topological order.
    #[must_use]
    pub fn post_block_id(&self) -> usize {
        self.post_block_id
    }

    /// Returns the block-entry phi nodes.
    #[must_use]
    pub fn arguments(&self) -> &[ExprId] {
        &self.arguments
    }

    /// Returns the straight-line instructions in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[ExprId] {
        &self.instructions
    }

    /// Returns the terminator, or `None` if the block is still open.
    #[must_use]
    pub fn terminator(&self) -> Option<&Terminator> {
        self.terminator.as_ref()
    }

    /// Returns the predecessor blocks in edge order.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Returns the dominator-tree record.
    #[must_use]
    pub fn dominator_node(&self) -> &TreeNode {
        &self.dom
    }

    /// Returns the post-dominator-tree record.
    #[must_use]
    pub fn post_dominator_node(&self) -> &TreeNode {
        &self.post_dom
    }

    /// Appends a predecessor edge, growing every phi argument by one unset
    /// operand slot, and returns the new edge's index.
    pub(crate) fn add_predecessor(&mut self, pred: BlockId, arena: &mut ExprArena) -> usize {
        let edge_index = self.predecessors.len();
        self.predecessors.push(pred);
        for &arg in &self.arguments {
            if let Expr::Phi(phi) = arena.expr_mut(arg) {
                phi.push_slot();
            }
        }
        edge_index
    }

    /// Pre-sizes predecessor and phi operand storage for `additional` more
    /// edges.
    pub(crate) fn reserve_predecessors(&mut self, additional: usize, arena: &mut ExprArena) {
        self.predecessors.reserve(additional);
        for &arg in &self.arguments {
            if let Expr::Phi(phi) = arena.expr_mut(arg) {
                phi.reserve_slots(additional);
            }
        }
    }

    /// Assigns sequential instruction ids to the block's phi arguments and
    /// instructions, starting at `next_id`, and returns the next free id.
    ///
    /// Id 0 means "unnumbered", so numbering starts at 1.
    pub(crate) fn renumber_instructions(&self, arena: &mut ExprArena, mut next_id: u32) -> u32 {
        for &arg in &self.arguments {
            arena.set_instr_id(arg, next_id);
            next_id += 1;
        }
        for &instr in &self.instructions {
            arena.set_instr_id(instr, next_id);
            next_id += 1;
        }
        next_id
    }
}
