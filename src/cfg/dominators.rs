//! Dominator tree construction and traversal.
//!
//! Immediate dominators fall out of a single forward pass over the reverse
//! post order: every block's dominator is the common dominator of its
//! non-backedge predecessors, all of which have smaller ids and are therefore
//! already resolved. No fixed-point iteration is needed; the ordering
//! invariant of the RPO builder carries the whole weight.
//!
//! After the tree is linked, one pre-order walk assigns each block a
//! dominator number and the maximum number in its subtree. "Does A dominate
//! B" then collapses to an interval containment test on those two integers.

use crate::{
    cfg::{
        block::{BlockId, LoopId},
        builder::ControlFlowGraph,
    },
    error::inconsistency,
    ir::{InstGraph, InstId, InstKind},
    utils::BitSet,
    Result,
};

/// Callback seam for the dominator-tree traversals.
///
/// `enter` runs before a block's subtree, `exit` after; the value returned by
/// `enter` is handed back to the matching `exit`. The traversals are
/// iterative, so implementations can carry per-subtree state without
/// worrying about stack depth.
pub trait RecursiveVisitor<V> {
    /// Called when the traversal enters `block`.
    fn enter(&mut self, cfg: &ControlFlowGraph, block: BlockId) -> Option<V>;

    /// Called when the traversal leaves `block`, with the value `enter`
    /// produced for it.
    fn exit(&mut self, cfg: &ControlFlowGraph, block: BlockId, value: Option<V>);
}

/// Computes immediate dominators, the sorted children lists, dominator
/// depths and the pre-order interval numbering.
pub(crate) fn compute_dominators(cfg: &mut ControlFlowGraph) -> Result<()> {
    if !cfg.blocks[BlockId::ENTRY.index()].preds.is_empty() {
        return Err(inconsistency!(
            "entry block has {} predecessors",
            cfg.blocks[BlockId::ENTRY.index()].preds.len()
        ));
    }

    let mut max_depth = 0;
    for i in 1..cfg.blocks.len() {
        let mut dominator: Option<BlockId> = None;
        for j in 0..cfg.blocks[i].preds.len() {
            let pred = cfg.blocks[i].preds[j];
            if cfg.blocks[pred.index()].is_loop_end {
                continue;
            }
            dominator = Some(match dominator {
                None => pred,
                Some(d) => common_dominator_raw(cfg, d, pred),
            });
        }
        let dominator = dominator.ok_or_else(|| {
            inconsistency!("block {} has no forward predecessor", cfg.blocks[i].id)
        })?;

        cfg.blocks[i].dominator = Some(dominator);
        cfg.blocks[i].dominator_depth = cfg.blocks[dominator.index()].dominator_depth + 1;
        max_depth = max_depth.max(cfg.blocks[i].dominator_depth);

        // Blocks arrive in ascending id order, so pushing keeps the children
        // list sorted.
        let id = cfg.blocks[i].id;
        cfg.blocks[dominator.index()].dominated.push(id);
    }
    cfg.max_dominator_depth = max_depth;

    calc_dominator_ranges(cfg);
    Ok(())
}

/// Assigns pre-order dominator numbers and subtree maxima without recursion.
///
/// Children are pushed in list order and hence processed in reverse, which
/// means the first child's subtree is numbered last; when a block is
/// revisited its subtree maximum is simply the first child's maximum.
fn calc_dominator_ranges(cfg: &mut ControlFlowGraph) {
    let mut stack = Vec::with_capacity(cfg.blocks.len());
    stack.push(BlockId::ENTRY);
    let mut next_number = 0;

    while let Some(&cur) = stack.last() {
        let i = cur.index();
        if cfg.blocks[i].dominator_number == -1 {
            cfg.blocks[i].dominator_number = next_number;
            if cfg.blocks[i].dominated.is_empty() {
                cfg.blocks[i].max_child_dominator_number = next_number;
                stack.pop();
            } else {
                stack.extend_from_slice(&cfg.blocks[i].dominated);
            }
            next_number += 1;
        } else {
            let first_child = cfg.blocks[i].dominated[0];
            cfg.blocks[i].max_child_dominator_number =
                cfg.blocks[first_child.index()].max_child_dominator_number;
            stack.pop();
        }
    }
}

/// Common dominator by walking immediate-dominator links: equalize depth,
/// then step both until they meet. Only valid once depths and dominators of
/// both arguments are set, which the forward pass guarantees.
fn common_dominator_raw(cfg: &ControlFlowGraph, a: BlockId, b: BlockId) -> BlockId {
    let a_depth = cfg.blocks[a.index()].dominator_depth;
    let b_depth = cfg.blocks[b.index()].dominator_depth;
    let (mut a, mut b) = if a_depth > b_depth {
        (dominator_up(cfg, a, a_depth - b_depth), b)
    } else {
        (a, dominator_up(cfg, b, b_depth - a_depth))
    };
    while a != b {
        a = cfg.blocks[a.index()].dominator.unwrap_or(BlockId::ENTRY);
        b = cfg.blocks[b.index()].dominator.unwrap_or(BlockId::ENTRY);
    }
    a
}

fn dominator_up(cfg: &ControlFlowGraph, mut block: BlockId, levels: u32) -> BlockId {
    for _ in 0..levels {
        block = cfg.blocks[block.index()].dominator.unwrap_or(BlockId::ENTRY);
    }
    block
}

impl ControlFlowGraph {
    /// Returns `true` if `a` dominates `b` (reflexively). O(1) via the
    /// pre-order interval numbering; requires
    /// [`BuildFlags::DOMINATORS`](crate::cfg::BuildFlags::DOMINATORS).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let a = &self.blocks[a.index()];
        let n = self.blocks[b.index()].dominator_number;
        a.dominator_number <= n && n <= a.max_child_dominator_number
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the nearest common dominator of two blocks.
    #[must_use]
    pub fn common_dominator(&self, a: BlockId, b: BlockId) -> BlockId {
        common_dominator_raw(self, a, b)
    }

    /// Returns the nearest common dominator of the blocks containing the
    /// given instruction nodes, or `None` if the iterator yields no node with
    /// a block.
    #[must_use]
    pub fn common_dominator_for(&self, nodes: impl IntoIterator<Item = InstId>) -> Option<BlockId> {
        let mut common: Option<BlockId> = None;
        for node in nodes {
            if let Some(b) = self.block_for(node) {
                common = Some(match common {
                    None => b,
                    Some(c) => common_dominator_raw(self, c, b),
                });
            }
        }
        common
    }

    /// Returns `true` if `block` leaves a loop in the dominator tree: its
    /// dominator sits in a different loop and `block` is not the header of a
    /// loop nested below it.
    ///
    /// This is deliberately not the same thing as "begins with a loop-exit
    /// marker": a path that unconditionally deoptimizes leaves its loop
    /// without a marker, so the dominator-tree notion is the broader one.
    #[must_use]
    pub fn is_dominator_tree_loop_exit(&self, block: BlockId) -> bool {
        let b = &self.blocks[block.index()];
        let Some(dom) = b.dominator else {
            return false;
        };
        b.loop_id != self.blocks[dom.index()].loop_id
            && (!b.is_loop_header || self.loop_depth(dom) >= self.loop_depth(block))
    }

    /// Like [`ControlFlowGraph::is_dominator_tree_loop_exit`], but also
    /// treats blocks beginning with an explicit loop-exit marker as exits.
    #[must_use]
    pub fn is_dominator_tree_loop_exit_considering_real_exits(
        &self,
        graph: &InstGraph,
        block: BlockId,
    ) -> bool {
        self.is_dominator_tree_loop_exit(block)
            || matches!(
                graph.kind(self.blocks[block.index()].begin),
                InstKind::LoopExit { .. }
            )
    }

    /// Visits the dominator tree, deferring loop exits when the CFG has
    /// loops. See [`ControlFlowGraph::visit_dominator_tree_defer_loop_exits`]
    /// for the deferred variant's guarantees.
    pub fn visit_dominator_tree<V>(
        &self,
        visitor: &mut impl RecursiveVisitor<V>,
        defer_loop_exits: bool,
    ) -> Result<()> {
        if defer_loop_exits && !self.loops.is_empty() {
            self.visit_dominator_tree_defer_loop_exits(visitor)
        } else {
            self.visit_dominator_tree_default(visitor);
            Ok(())
        }
    }

    /// Iterative dominator-tree walk. Within a block's children the walk
    /// descends into the block's postdominator last, so code that is always
    /// reached afterwards is visited after the conditional subtrees.
    pub fn visit_dominator_tree_default<V>(&self, visitor: &mut impl RecursiveVisitor<V>) {
        if self.blocks.is_empty() {
            return;
        }
        // Per level, the child most recently descended into; None on first
        // visit of the level's owner.
        let mut stack: Vec<Option<BlockId>> = Vec::with_capacity(
            self.max_dominator_depth as usize + 1,
        );
        stack.push(None);
        let mut current = BlockId::ENTRY;
        let mut values: Vec<Option<V>> = Vec::new();

        while let Some(&state) = stack.last() {
            let top = stack.len() - 1;
            let came_from_postdom = state.is_some_and(|s| {
                self.blocks[s.index()]
                    .dominator
                    .is_some_and(|d| self.blocks[d.index()].postdominator == Some(s))
            });

            if !came_from_postdom {
                let next = match state {
                    None => {
                        values.push(visitor.enter(self, current));
                        self.skip_post_dom(self.first_dominated(current))
                    }
                    Some(s) => self.skip_post_dom(self.dominated_sibling(s)),
                };
                if let Some(n) = next {
                    stack[top] = Some(n);
                    current = n;
                    stack.push(None);
                    continue;
                }

                // All conditional subtrees done; descend into the
                // postdominator if this block dominates it.
                if let Some(pd) = self.blocks[current.index()].postdominator {
                    if self.blocks[pd.index()].dominator == Some(current) {
                        stack[top] = Some(pd);
                        current = pd;
                        stack.push(None);
                        continue;
                    }
                }
            }

            visitor.exit(self, current, values.pop().flatten());
            stack.pop();
            match self.blocks[current.index()].dominator {
                Some(d) => current = d,
                None => break,
            }
        }
    }

    /// Dominator-tree walk that holds back loop-exit subtrees until the
    /// owning loop's header is exited. Consumers that accumulate loop-local
    /// state (the scheduler's kill sets, for instance) rely on seeing a
    /// loop's entire body before any code that already left it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistency`](crate::Error::Inconsistency) if a
    /// loop-exit block's dominator lies outside any loop, which indicates a
    /// missing exit marker.
    pub fn visit_dominator_tree_defer_loop_exits<V>(
        &self,
        visitor: &mut impl RecursiveVisitor<V>,
    ) -> Result<()> {
        let mut stack: Vec<BlockId> = Vec::with_capacity(self.blocks.len());
        stack.push(BlockId::ENTRY);
        let mut visited = BitSet::new(self.blocks.len());
        let mut deferred_exits: Vec<Vec<BlockId>> = vec![Vec::new(); self.loops.len()];
        let mut values: Vec<Option<V>> = Vec::new();

        while let Some(&cur) = stack.last() {
            if visited.contains(cur.index()) {
                visitor.exit(self, cur, values.pop().flatten());
                stack.pop();
                if self.blocks[cur.index()].is_loop_header {
                    if let Some(loop_id) = self.blocks[cur.index()].loop_id {
                        let drained = std::mem::take(&mut deferred_exits[loop_id.index()]);
                        for &b in drained.iter().rev() {
                            stack.push(b);
                        }
                    }
                }
                continue;
            }
            visited.insert(cur.index());
            values.push(visitor.enter(self, cur));

            // The postdominator is pushed first (visited last) when this
            // block dominates it.
            let always_reached = self.blocks[cur.index()].postdominator.filter(|&pd| {
                self.blocks[pd.index()].dominator == Some(cur)
            });
            if let Some(pd) = always_reached {
                if self.is_dominator_tree_loop_exit(pd) {
                    self.add_deferred_exit(&mut deferred_exits, pd)?;
                } else {
                    stack.push(pd);
                }
            }

            // Children in reverse order so branches are handled before
            // merges.
            for idx in (0..self.blocks[cur.index()].dominated.len()).rev() {
                let child = self.blocks[cur.index()].dominated[idx];
                if Some(child) == always_reached {
                    continue;
                }
                if self.is_dominator_tree_loop_exit(child) {
                    self.add_deferred_exit(&mut deferred_exits, child)?;
                } else {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    /// Registers a deferred exit with the outermost loop it leaves.
    fn add_deferred_exit(
        &self,
        deferred_exits: &mut [Vec<BlockId>],
        block: BlockId,
    ) -> Result<()> {
        let b = &self.blocks[block.index()];
        let dominator = b
            .dominator
            .ok_or_else(|| inconsistency!("deferred exit {} has no dominator", block))?;
        let mut outermost: LoopId = self.blocks[dominator.index()].loop_id.ok_or_else(|| {
            inconsistency!(
                "dominator {} of loop exit {} is outside any loop; an exit marker is missing",
                dominator,
                block
            )
        })?;
        while let Some(parent) = self.loops[outermost.index()].parent() {
            if Some(parent) == b.loop_id {
                break;
            }
            outermost = parent;
        }
        deferred_exits[outermost.index()].push(block);
        Ok(())
    }

    fn first_dominated(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block.index()].dominated.first().copied()
    }

    fn dominated_sibling(&self, block: BlockId) -> Option<BlockId> {
        let dom = self.blocks[block.index()].dominator?;
        let siblings = &self.blocks[dom.index()].dominated;
        let pos = siblings.iter().position(|&s| s == block)?;
        siblings.get(pos + 1).copied()
    }

    /// Skips a child that is its dominator's postdominator; such a block is
    /// always reached and gets visited last instead.
    fn skip_post_dom(&self, block: Option<BlockId>) -> Option<BlockId> {
        let b = block?;
        let dom = self.blocks[b.index()].dominator?;
        if self.blocks[dom.index()].postdominator == Some(b) {
            self.dominated_sibling(b)
        } else {
            Some(b)
        }
    }
}
