//! The SSA-ready control-flow graph container.

use std::fmt::Write as _;

use crate::{
    cfg::{BasicBlock, BlockId, Terminator},
    ir::{ExprArena, ExprId},
};

/// A control-flow graph of basic blocks with a single entry and a single
/// exit.
///
/// Blocks live in stable storage: a [`BlockId`] indexes the block vector and
/// never moves, even when normalization assigns new block numbers. The
/// topological and post-topological orders are kept as separate id vectors,
/// filled by [`Scfg::compute_normal_form`].
///
/// The exit block carries exactly one phi argument; every value "returned"
/// from the graph arrives there through a jump, and the exit's terminator
/// returns that phi.
#[derive(Debug, Clone, PartialEq)]
pub struct Scfg {
    pub(crate) blocks: Vec<BasicBlock>,
    entry: BlockId,
    exit: BlockId,
    pub(crate) topo_order: Vec<BlockId>,
    pub(crate) post_order: Vec<BlockId>,
    normalized: bool,
}

impl Scfg {
    /// Creates a graph containing an empty entry block and an exit block
    /// with one phi argument returned by the exit's terminator.
    #[must_use]
    pub fn new(arena: &mut ExprArena) -> Self {
        let mut entry_block = BasicBlock::new();
        entry_block.in_graph = true;

        let exit_phi = arena.alloc_phi();
        let mut exit_block = BasicBlock::new();
        exit_block.in_graph = true;
        exit_block.arguments.push(exit_phi);
        exit_block.terminator = Some(Terminator::Return { value: exit_phi });

        Scfg {
            blocks: vec![entry_block, exit_block],
            entry: BlockId::new(0),
            exit: BlockId::new(1),
            topo_order: Vec::new(),
            post_order: Vec::new(),
            normalized: false,
        }
    }

    /// Returns the entry block's id.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns the exit block's id.
    #[must_use]
    pub fn exit(&self) -> BlockId {
        self.exit
    }

    /// Returns the total number of allocated blocks, whether or not they
    /// ever joined the graph.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the number of blocks that are part of the graph.
    #[must_use]
    pub fn in_graph_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.in_graph).count()
    }

    /// Returns `true` once [`Scfg::compute_normal_form`] has run.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub(crate) fn set_normalized(&mut self) {
        self.normalized = true;
    }

    /// Returns the block stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this graph.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns a mutable reference to the block stored under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this graph.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Iterates over all allocated blocks with their ids.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i), b))
    }

    /// Returns the final topological order (entry first), empty before
    /// normalization.
    #[must_use]
    pub fn topo_order(&self) -> &[BlockId] {
        &self.topo_order
    }

    /// Returns the final post-topological order (exit first), empty before
    /// normalization.
    #[must_use]
    pub fn post_order(&self) -> &[BlockId] {
        &self.post_order
    }

    /// Allocates a new block with `num_args` fresh phi arguments.
    ///
    /// The block is not part of the graph until it is started; blocks
    /// allocated for local functions that are never reached stay out of the
    /// graph entirely.
    pub fn add_block(&mut self, arena: &mut ExprArena, num_args: usize) -> BlockId {
        let mut block = BasicBlock::new();
        block.arguments = (0..num_args).map(|_| arena.alloc_phi()).collect();
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(block);
        id
    }

    /// Marks a block as part of the graph. Called when emission into the
    /// block begins.
    pub(crate) fn add_to_graph(&mut self, id: BlockId) {
        self.blocks[id.index()].in_graph = true;
    }

    /// Appends a predecessor edge to `target`, growing its phi operand
    /// slots, and returns the edge index.
    pub(crate) fn add_predecessor(
        &mut self,
        target: BlockId,
        pred: BlockId,
        arena: &mut ExprArena,
    ) -> usize {
        self.blocks[target.index()].add_predecessor(pred, arena)
    }

    /// Pre-sizes predecessor and phi operand storage of `target` for
    /// `additional` more edges.
    pub fn reserve_predecessors(
        &mut self,
        target: BlockId,
        additional: usize,
        arena: &mut ExprArena,
    ) {
        self.blocks[target.index()].reserve_predecessors(additional, arena);
    }

    /// Assigns sequential instruction ids (starting at 1) across all blocks
    /// in the final topological order.
    pub(crate) fn renumber(&mut self, arena: &mut ExprArena) {
        let mut next_id = 1;
        for i in 0..self.topo_order.len() {
            let block = &self.blocks[self.topo_order[i].index()];
            next_id = block.renumber_instructions(arena, next_id);
        }
    }

    /// Returns `true` if `a` dominates `b` (reflexively).
    ///
    /// Valid only after normalization; O(1) via the dominator-tree
    /// interval numbering.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.block(a).dom.encloses(&self.block(b).dom)
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns `true` if `a` post-dominates `b` (reflexively).
    #[must_use]
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.block(a).post_dom.encloses(&self.block(b).post_dom)
    }

    /// Returns `true` if `a` post-dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.post_dominates(a, b)
    }

    /// Returns the immediate dominator of `id`, `None` for the entry block.
    #[must_use]
    pub fn immediate_dominator(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).dom.parent
    }

    /// Returns the immediate post-dominator of `id`, `None` for the exit
    /// block.
    #[must_use]
    pub fn immediate_post_dominator(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).post_dom.parent
    }

    /// Renders the graph in Graphviz DOT format.
    ///
    /// Blocks are boxes listing phi arguments and instructions; the entry
    /// and exit blocks are highlighted. Unstarted blocks are omitted.
    #[must_use]
    pub fn to_dot(&self, arena: &ExprArena) -> String {
        let mut dot = String::from("digraph cfg {\n");
        dot.push_str("  node [shape=box fontname=\"monospace\"];\n");

        for (id, block) in self.blocks() {
            if !block.in_graph {
                continue;
            }
            let mut label = format!("{id} [#{}]", block.block_id);
            for &arg in &block.arguments {
                let _ = write!(label, "\\l{}", arena.summary(arg));
            }
            for &instr in &block.instructions {
                let _ = write!(label, "\\l{}", arena.summary(instr));
            }
            match &block.terminator {
                Some(Terminator::Goto { target, .. }) => {
                    let _ = write!(label, "\\lgoto {target}");
                }
                Some(Terminator::Branch { condition, .. }) => {
                    let _ = write!(label, "\\lbranch {}", arena.operand(*condition));
                }
                Some(Terminator::Return { value }) => {
                    let _ = write!(label, "\\lreturn {}", arena.operand(*value));
                }
                None => {
                    label.push_str("\\l<open>");
                }
            }
            label.push_str("\\l");

            let style = if id == self.entry || id == self.exit {
                " style=bold"
            } else {
                ""
            };
            let _ = writeln!(dot, "  \"{id}\" [label=\"{label}\"{style}];");
        }

        for (id, block) in self.blocks() {
            if !block.in_graph {
                continue;
            }
            if let Some(term) = &block.terminator {
                match term {
                    Terminator::Branch {
                        then_block,
                        else_block,
                        ..
                    } => {
                        let _ = writeln!(dot, "  \"{id}\" -> \"{then_block}\" [label=\"T\"];");
                        let _ = writeln!(dot, "  \"{id}\" -> \"{else_block}\" [label=\"F\"];");
                    }
                    _ => {
                        for succ in term.successors() {
                            let _ = writeln!(dot, "  \"{id}\" -> \"{succ}\";");
                        }
                    }
                }
            }
        }

        dot.push_str("}\n");
        dot
    }

    /// Renders a one-line-per-instruction textual listing in topological
    /// order, mainly for tests and debugging.
    #[must_use]
    pub fn to_listing(&self, arena: &ExprArena) -> String {
        let mut out = String::new();
        let order: Vec<BlockId> = if self.topo_order.is_empty() {
            self.blocks()
                .filter(|(_, b)| b.in_graph)
                .map(|(id, _)| id)
                .collect()
        } else {
            self.topo_order.clone()
        };
        for id in order {
            let block = self.block(id);
            let _ = writeln!(out, "{id}:");
            for &arg in &block.arguments {
                let _ = writeln!(out, "  {}", arena.summary(arg));
            }
            for &instr in &block.instructions {
                let _ = writeln!(out, "  {}", arena.summary(instr));
            }
            match &block.terminator {
                Some(Terminator::Goto { target, .. }) => {
                    let _ = writeln!(out, "  goto {target}");
                }
                Some(Terminator::Branch {
                    condition,
                    then_block,
                    else_block,
                }) => {
                    let _ = writeln!(
                        out,
                        "  branch {} ? {then_block} : {else_block}",
                        arena.operand(*condition)
                    );
                }
                Some(Terminator::Return { value }) => {
                    let _ = writeln!(out, "  return {}", arena.operand(*value));
                }
                None => {
                    let _ = writeln!(out, "  <open>");
                }
            }
        }
        out
    }

    /// Returns the phi argument of the exit block.
    ///
    /// # Panics
    ///
    /// Panics if the exit block was tampered with; by construction it always
    /// carries exactly one argument.
    #[must_use]
    pub fn exit_phi(&self) -> ExprId {
        self.blocks[self.exit.index()].arguments[0]
    }
}
