//! Control flow graph construction and analysis.
//!
//! This module turns the fixed-node skeleton of an [`InstGraph`](crate::ir::InstGraph)
//! into an analyzed [`ControlFlowGraph`]: basic blocks in a loop-aware
//! reverse post order, plus the optional analyses selected by [`BuildFlags`].
//!
//! ## Pipeline
//!
//! Block identification and ordering always run; everything else is opt-in
//! and computed at most once per instance:
//!
//! 1. **Blocks & order** — maximal straight-line runs of nodes, arranged so
//!    that every block's non-backedge predecessors precede it and every
//!    inner loop is emitted contiguously before its enclosing loop finishes.
//! 2. **Frequencies** ([`BuildFlags::FREQUENCIES`]) — relative execution
//!    frequency per block from static branch probabilities, loops resolved
//!    in two passes over the order instead of a fixed-point iteration.
//! 3. **Loops** ([`BuildFlags::LOOPS`]) — natural loops, nesting, members
//!    and the two distinct exit notions (marker exits vs. natural exits).
//! 4. **Dominators** ([`BuildFlags::DOMINATORS`]) — immediate dominators in
//!    one forward pass, with a pre-order interval numbering that makes
//!    dominance queries O(1), and the dominator-tree visitors built on top.
//! 5. **Postdominators** ([`BuildFlags::POSTDOMINATORS`]) — one reverse
//!    pass; blocks on paths into control sinks legitimately have none.
//!
//! Every analysis leans on the ordering invariant established in step 1;
//! none of them iterates to a fixed point. A structural verifier re-derives
//! all promised invariants the slow way and runs after every build when
//! debug assertions are enabled.
//!
//! ## Caching
//!
//! A [`CfgCache`] keyed by the graph's revision counter lets successive
//! phases of one compilation share an instance; [`ControlFlowGraph::ensure`]
//! extends a cached instance additively instead of rebuilding.

mod block;
mod builder;
mod dominators;
mod frequency;
mod loops;
mod postdom;
mod rpo;
mod verifier;

pub use block::{BasicBlock, BlockId, LoopId, LAST_VALID_BLOCK_INDEX};
pub use builder::{BuildFlags, CfgCache, CfgOptions, ControlFlowGraph};
pub use dominators::RecursiveVisitor;
pub use frequency::{
    multiply_relative_frequencies, FrequencyDivergence, LoopFrequencyData,
    MAX_RELATIVE_FREQUENCY, MIN_RELATIVE_FREQUENCY,
};
pub use loops::{KillSet, Loop};
