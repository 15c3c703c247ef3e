//! Graph normalization: topological orders, dominator and post-dominator
//! trees, interval numbering.
//!
//! [`Scfg::compute_normal_form`] runs a fixed pipeline of linear passes,
//! with no fixed-point iteration:
//!
//! 1. post-topological sort from the exit block over predecessor edges;
//! 2. immediate post-dominators, one pass in post order;
//! 3. topological sort from the entry block over successor edges, with the
//!    post-dominator parent explored first so join blocks land next to the
//!    region they close; then block and instruction renumbering;
//! 4. immediate dominators, one pass in topological order; then subtree
//!    sizes and Euler-interval ids for both trees.
//!
//! A single pass per tree suffices because each sort finalizes a block only
//! after every non-back-edge neighbor it depends on: when a block's
//! immediate dominator is computed, all of its forward predecessors already
//! carry final dominator links. Back edges are recognized by order-id
//! comparison and skipped.

use crate::{
    cfg::{BlockId, Scfg},
    ir::ExprArena,
    Error, Result,
};

/// Which of the two trees a pass operates on.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Tree {
    Dominator,
    PostDominator,
}

impl Scfg {
    /// Brings the graph into normal form.
    ///
    /// After this call the topological and post-topological orders are
    /// populated, every block carries final `block_id` / `post_block_id`
    /// numbers, instructions are numbered sequentially, and both dominator
    /// trees answer queries in O(1) through their interval numbering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnreachableBlocks`] if any block in the graph is
    /// unreachable from the exit (walking backwards) or from the entry
    /// (walking forwards), and [`Error::Invariant`] if an edge leads to a
    /// block that never joined the graph or the dominator parent chains fail
    /// to intersect, both of which indicate a malformed graph.
    pub fn compute_normal_form(&mut self, arena: &mut ExprArena) -> Result<()> {
        let entry = self.entry();
        let exit = self.exit();

        self.post_order = self.sort_blocks(exit, Tree::PostDominator)?;
        self.compute_parents(Tree::PostDominator)?;

        self.topo_order = self.sort_blocks(entry, Tree::Dominator)?;
        self.renumber(arena);

        self.compute_parents(Tree::Dominator)?;
        self.compute_tree_metrics();

        self.set_normalized();
        Ok(())
    }

    /// Depth-first sort over the graph, assigning order ids at finish time.
    ///
    /// For the dominator tree the walk starts at the entry and follows
    /// successors, producing a topological order; for the post-dominator
    /// tree it starts at the exit and follows predecessors. The opposite
    /// tree's parent link is explored first as a tie-break; on the very
    /// first sort those links are all unset and the tie-break is inert.
    fn sort_blocks(&mut self, root: BlockId, tree: Tree) -> Result<Vec<BlockId>> {
        let total = self.in_graph_count();
        for block in &mut self.blocks {
            block.visited = false;
        }

        let mut order = vec![root; total];
        let mut next_id = total;

        // Explicit stack: (block, neighbor list, cursor).
        let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();
        self.blocks[root.index()].visited = true;
        let neighbors = self.sort_neighbors(root, tree);
        stack.push((root, neighbors, 0));

        while let Some((block, neighbors, cursor)) = stack.last_mut() {
            if let Some(&next) = neighbors.get(*cursor) {
                *cursor += 1;
                if !self.blocks[next.index()].visited {
                    if !self.blocks[next.index()].in_graph {
                        return Err(Error::Invariant(
                            "edge leads to a block that never joined the graph",
                        ));
                    }
                    self.blocks[next.index()].visited = true;
                    let neighbors = self.sort_neighbors(next, tree);
                    stack.push((next, neighbors, 0));
                }
                continue;
            }

            let block = *block;
            stack.pop();
            next_id -= 1;
            match tree {
                Tree::Dominator => self.blocks[block.index()].block_id = next_id,
                Tree::PostDominator => self.blocks[block.index()].post_block_id = next_id,
            }
            order[next_id] = block;
        }

        if next_id != 0 {
            return Err(Error::UnreachableBlocks {
                count: next_id,
                from: match tree {
                    Tree::Dominator => "entry",
                    Tree::PostDominator => "exit",
                },
            });
        }
        Ok(order)
    }

    /// Neighbor list for [`Scfg::sort_blocks`], tie-break parent first.
    fn sort_neighbors(&self, id: BlockId, tree: Tree) -> Vec<BlockId> {
        let block = &self.blocks[id.index()];
        let mut neighbors = Vec::new();
        match tree {
            Tree::Dominator => {
                if let Some(parent) = block.post_dom.parent {
                    neighbors.push(parent);
                }
                if let Some(term) = &block.terminator {
                    neighbors.extend(term.successors());
                }
            }
            Tree::PostDominator => {
                if let Some(parent) = block.dom.parent {
                    neighbors.push(parent);
                }
                neighbors.extend_from_slice(&block.predecessors);
            }
        }
        neighbors
    }

    /// Order id of a block within the given tree's sort.
    fn order_id(&self, id: BlockId, tree: Tree) -> usize {
        match tree {
            Tree::Dominator => self.blocks[id.index()].block_id,
            Tree::PostDominator => self.blocks[id.index()].post_block_id,
        }
    }

    fn parent_of(&self, id: BlockId, tree: Tree) -> Option<BlockId> {
        match tree {
            Tree::Dominator => self.blocks[id.index()].dom.parent,
            Tree::PostDominator => self.blocks[id.index()].post_dom.parent,
        }
    }

    /// Computes every immediate (post-)dominator in one pass.
    ///
    /// Blocks are processed in ascending order id, so each non-back-edge
    /// neighbor already carries a final parent link when it is consulted.
    fn compute_parents(&mut self, tree: Tree) -> Result<()> {
        let order = match tree {
            Tree::Dominator => self.topo_order.clone(),
            Tree::PostDominator => self.post_order.clone(),
        };
        for &block in &order {
            let my_id = self.order_id(block, tree);
            let neighbors = match tree {
                Tree::Dominator => self.blocks[block.index()].predecessors.clone(),
                Tree::PostDominator => self.blocks[block.index()]
                    .terminator
                    .as_ref()
                    .map(super::Terminator::successors)
                    .unwrap_or_default(),
            };

            let mut candidate: Option<BlockId> = None;
            for neighbor in neighbors {
                // Back edge: the neighbor has not been finalized yet.
                if self.order_id(neighbor, tree) >= my_id {
                    continue;
                }
                candidate = Some(match candidate {
                    None => neighbor,
                    Some(current) => self.intersect(current, neighbor, tree)?,
                });
            }

            match tree {
                Tree::Dominator => self.blocks[block.index()].dom.parent = candidate,
                Tree::PostDominator => self.blocks[block.index()].post_dom.parent = candidate,
            }
        }
        Ok(())
    }

    /// Walks two parent chains to their closest common ancestor.
    ///
    /// Order ids strictly decrease toward the tree root, so stepping the
    /// deeper chain up must converge.
    fn intersect(&self, mut a: BlockId, mut b: BlockId, tree: Tree) -> Result<BlockId> {
        while a != b {
            let stepped = if self.order_id(a, tree) > self.order_id(b, tree) {
                &mut a
            } else {
                &mut b
            };
            *stepped = self.parent_of(*stepped, tree).ok_or(Error::Invariant(
                "dominator parent chains failed to intersect",
            ))?;
        }
        Ok(a)
    }

    /// Fills subtree sizes and Euler-interval ids for both trees.
    ///
    /// Children carry larger order ids than their parent, so a reverse
    /// sweep accumulates sizes bottom-up and a forward sweep resolves the
    /// relative ids top-down.
    fn compute_tree_metrics(&mut self) {
        for block in &mut self.blocks {
            if !block.in_graph {
                continue;
            }
            block.dom.subtree_size = 1;
            block.dom.id = 0;
            block.post_dom.subtree_size = 1;
            block.post_dom.id = 0;
        }

        for tree in [Tree::Dominator, Tree::PostDominator] {
            let order = match tree {
                Tree::Dominator => self.topo_order.clone(),
                Tree::PostDominator => self.post_order.clone(),
            };

            // Bottom-up: each child claims the next free interval offset
            // inside its parent and folds its size into the parent's.
            for &block in order.iter().rev() {
                if let Some(parent) = self.parent_of(block, tree) {
                    let child_size = self.tree_node(block, tree).subtree_size;
                    let offset = self.tree_node(parent, tree).subtree_size;
                    self.tree_node_mut(block, tree).id = offset;
                    self.tree_node_mut(parent, tree).subtree_size = offset + child_size;
                }
            }

            // Top-down: relative offsets become absolute interval ids.
            for &block in &order {
                if let Some(parent) = self.parent_of(block, tree) {
                    let base = self.tree_node(parent, tree).id;
                    self.tree_node_mut(block, tree).id += base;
                }
            }
        }
    }

    fn tree_node(&self, id: BlockId, tree: Tree) -> &super::TreeNode {
        match tree {
            Tree::Dominator => &self.blocks[id.index()].dom,
            Tree::PostDominator => &self.blocks[id.index()].post_dom,
        }
    }

    fn tree_node_mut(&mut self, id: BlockId, tree: Tree) -> &mut super::TreeNode {
        match tree {
            Tree::Dominator => &mut self.blocks[id.index()].dom,
            Tree::PostDominator => &mut self.blocks[id.index()].post_dom,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        cfg::{BlockId, Scfg, Terminator},
        ir::ExprArena,
        Error,
    };

    fn goto(cfg: &mut Scfg, arena: &mut ExprArena, from: BlockId, to: BlockId) {
        let phi_index = cfg.add_predecessor(to, from, arena);
        cfg.block_mut(from).terminator = Some(Terminator::Goto {
            target: to,
            phi_index,
        });
    }

    fn branch(
        cfg: &mut Scfg,
        arena: &mut ExprArena,
        from: BlockId,
        then_block: BlockId,
        else_block: BlockId,
    ) {
        let condition = arena.alloc_bool(true);
        cfg.add_predecessor(then_block, from, arena);
        cfg.add_predecessor(else_block, from, arena);
        cfg.block_mut(from).terminator = Some(Terminator::Branch {
            condition,
            then_block,
            else_block,
        });
    }

    fn new_block(cfg: &mut Scfg, arena: &mut ExprArena) -> BlockId {
        let id = cfg.add_block(arena, 0);
        cfg.add_to_graph(id);
        id
    }

    /// entry -> a -> exit.
    #[test]
    fn test_chain_orders() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        let a = new_block(&mut cfg, &mut arena);

        goto(&mut cfg, &mut arena, entry, a);
        goto(&mut cfg, &mut arena, a, exit);

        cfg.compute_normal_form(&mut arena).unwrap();

        assert_eq!(cfg.topo_order(), &[entry, a, exit]);
        assert_eq!(cfg.post_order(), &[exit, a, entry]);
        assert_eq!(cfg.block(entry).block_id(), 0);
        assert_eq!(cfg.block(exit).block_id(), 2);
        assert_eq!(cfg.block(exit).post_block_id(), 0);
        assert_eq!(cfg.block(entry).post_block_id(), 2);

        assert_eq!(cfg.immediate_dominator(entry), None);
        assert_eq!(cfg.immediate_dominator(a), Some(entry));
        assert_eq!(cfg.immediate_dominator(exit), Some(a));
        assert_eq!(cfg.immediate_post_dominator(exit), None);
        assert_eq!(cfg.immediate_post_dominator(a), Some(exit));
        assert_eq!(cfg.immediate_post_dominator(entry), Some(a));
    }

    /// entry -> {t, e} -> exit.
    #[test]
    fn test_diamond_dominators() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        let t = new_block(&mut cfg, &mut arena);
        let e = new_block(&mut cfg, &mut arena);

        branch(&mut cfg, &mut arena, entry, t, e);
        goto(&mut cfg, &mut arena, t, exit);
        goto(&mut cfg, &mut arena, e, exit);

        cfg.compute_normal_form(&mut arena).unwrap();

        // Neither arm dominates the join; their common dominator does.
        assert_eq!(cfg.immediate_dominator(t), Some(entry));
        assert_eq!(cfg.immediate_dominator(e), Some(entry));
        assert_eq!(cfg.immediate_dominator(exit), Some(entry));
        assert_eq!(cfg.immediate_post_dominator(t), Some(exit));
        assert_eq!(cfg.immediate_post_dominator(e), Some(exit));
        assert_eq!(cfg.immediate_post_dominator(entry), Some(exit));

        assert!(cfg.dominates(entry, exit));
        assert!(cfg.dominates(t, t));
        assert!(!cfg.strictly_dominates(t, t));
        assert!(!cfg.dominates(t, exit));
        assert!(!cfg.dominates(t, e));
        assert!(cfg.post_dominates(exit, entry));
        assert!(!cfg.post_dominates(t, entry));
        assert!(cfg.strictly_post_dominates(exit, t));

        // The dominator-tree interval of the entry spans the whole graph.
        assert_eq!(cfg.block(entry).dominator_node().subtree_size, 4);
        assert_eq!(cfg.block(exit).post_dominator_node().subtree_size, 4);
    }

    /// entry -> h; h -> {b, s}; b -> h (back edge); s -> exit.
    #[test]
    fn test_loop_back_edge() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        let h = new_block(&mut cfg, &mut arena);
        let b = new_block(&mut cfg, &mut arena);
        let s = new_block(&mut cfg, &mut arena);

        goto(&mut cfg, &mut arena, entry, h);
        branch(&mut cfg, &mut arena, h, b, s);
        goto(&mut cfg, &mut arena, b, h);
        goto(&mut cfg, &mut arena, s, exit);

        cfg.compute_normal_form(&mut arena).unwrap();

        // The back edge into the header is ignored by both trees.
        assert_eq!(cfg.immediate_dominator(h), Some(entry));
        assert_eq!(cfg.immediate_dominator(b), Some(h));
        assert_eq!(cfg.immediate_dominator(s), Some(h));
        assert_eq!(cfg.immediate_dominator(exit), Some(s));
        assert_eq!(cfg.immediate_post_dominator(b), Some(h));
        assert_eq!(cfg.immediate_post_dominator(h), Some(s));
        assert_eq!(cfg.immediate_post_dominator(entry), Some(h));

        assert!(cfg.dominates(h, exit));
        assert!(cfg.dominates(h, b));
        assert!(!cfg.dominates(b, s));
        assert!(cfg.post_dominates(s, b));

        // Topological order keeps the header before the loop body.
        let header_pos = cfg.block(h).block_id();
        let body_pos = cfg.block(b).block_id();
        assert!(header_pos < body_pos);
    }

    #[test]
    fn test_unreachable_block_is_rejected() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        goto(&mut cfg, &mut arena, entry, exit);

        // Started but never linked into the graph.
        let orphan = new_block(&mut cfg, &mut arena);
        let _ = orphan;

        let err = cfg.compute_normal_form(&mut arena).unwrap_err();
        assert!(matches!(
            err,
            Error::UnreachableBlocks { count: 1, from: "exit" }
        ));
    }

    #[test]
    fn test_edge_to_unstarted_block_is_rejected() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());

        // The goto targets a block that never joined the graph; the exit
        // still records a predecessor, so the visit count alone balances
        // and would not flag the exit as unreachable.
        let orphan = cfg.add_block(&mut arena, 0);
        goto(&mut cfg, &mut arena, entry, orphan);
        cfg.add_predecessor(exit, entry, &mut arena);

        let err = cfg.compute_normal_form(&mut arena).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_unstarted_block_is_ignored() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());
        goto(&mut cfg, &mut arena, entry, exit);

        // Allocated for a local function that was never reached.
        let _pending = cfg.add_block(&mut arena, 1);

        cfg.compute_normal_form(&mut arena).unwrap();
        assert_eq!(cfg.topo_order().len(), 2);
        assert!(cfg.is_normalized());
    }

    #[test]
    fn test_renumbering_is_sequential() {
        let mut arena = ExprArena::new();
        let mut cfg = Scfg::new(&mut arena);
        let (entry, exit) = (cfg.entry(), cfg.exit());

        let one = arena.alloc_int(1);
        let two = arena.alloc_int(2);
        let sum = arena.alloc_binary(crate::ir::BinaryOp::Add, one, two);
        let double = arena.alloc_binary(crate::ir::BinaryOp::Add, sum, sum);
        cfg.block_mut(entry).instructions.push(sum);
        cfg.block_mut(entry).instructions.push(double);

        goto(&mut cfg, &mut arena, entry, exit);
        cfg.compute_normal_form(&mut arena).unwrap();

        assert_eq!(arena.instr_id(sum), 1);
        assert_eq!(arena.instr_id(double), 2);
        // The exit phi is numbered after the entry's instructions.
        assert_eq!(arena.instr_id(cfg.block(exit).arguments()[0]), 3);
        // Pure subexpressions stay unnumbered.
        assert_eq!(arena.instr_id(one), 0);
    }
}
