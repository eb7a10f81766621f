//! Basic block representation.
//!
//! A [`BasicBlock`] is a maximal straight-line run of instruction nodes with
//! one begin marker and one block-ending node. Blocks are stored in a dense
//! array inside the CFG; [`BlockId`] is the position in that array and, at
//! the same time, the block's position in the loop-aware reverse post order.
//! Most of the fields here are populated by later passes: dominator links by
//! the dominator pass, loop membership by the loop pass, frequencies by the
//! frequency pass.

use smallvec::SmallVec;

use crate::ir::{InstId, ProfileSource};

/// The largest block index the engine supports. Graphs with more begin
/// markers than this are rejected with a retryable bailout because later
/// passes become too slow to be worth compiling.
pub const LAST_VALID_BLOCK_INDEX: usize = u16::MAX as usize - 1;

/// Identifier of a basic block: its dense index in the CFG's block array and
/// its position in the reverse post order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// The entry block; always present, always first in the order.
    pub const ENTRY: BlockId = BlockId(0);

    /// Creates a block id from a dense index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    /// Returns the dense index of this id.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Identifier of a natural loop: its dense index in the CFG's loop list, in
/// discovery order (outer loops before the loops nested inside them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Creates a loop id from a dense index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }

    /// Returns the dense index of this id.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for LoopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One basic block of the control flow graph.
///
/// Edge lists keep the two most common slots inline; the vast majority of
/// blocks have at most two predecessors and two successors. Per-successor
/// branch probabilities are stored parallel to the successor list.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) begin: InstId,
    pub(crate) end: InstId,
    pub(crate) preds: SmallVec<[BlockId; 2]>,
    pub(crate) succs: SmallVec<[BlockId; 2]>,
    pub(crate) succ_probabilities: SmallVec<[f64; 2]>,
    /// Relative execution frequency; -1 until the frequency pass runs.
    pub(crate) relative_frequency: f64,
    pub(crate) frequency_source: ProfileSource,
    pub(crate) dominator: Option<BlockId>,
    /// Immediate dominator-tree children, sorted by id.
    pub(crate) dominated: Vec<BlockId>,
    pub(crate) dominator_depth: u32,
    /// Dominator-tree pre-order number; -1 until the dominator pass runs.
    pub(crate) dominator_number: i32,
    /// Largest pre-order number in this block's dominator subtree.
    pub(crate) max_child_dominator_number: i32,
    pub(crate) postdominator: Option<BlockId>,
    /// The innermost loop containing this block, if any.
    pub(crate) loop_id: Option<LoopId>,
    pub(crate) is_loop_header: bool,
    pub(crate) is_loop_end: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, begin: InstId, end: InstId) -> Self {
        Self {
            id,
            begin,
            end,
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            succ_probabilities: SmallVec::new(),
            relative_frequency: -1.0,
            frequency_source: ProfileSource::Unknown,
            dominator: None,
            dominated: Vec::new(),
            dominator_depth: 0,
            dominator_number: -1,
            max_child_dominator_number: -1,
            postdominator: None,
            loop_id: None,
            is_loop_header: false,
            is_loop_end: false,
        }
    }

    /// Returns this block's id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the begin marker opening this block.
    #[must_use]
    pub fn begin_inst(&self) -> InstId {
        self.begin
    }

    /// Returns the last instruction node of this block.
    #[must_use]
    pub fn end_inst(&self) -> InstId {
        self.end
    }

    /// Returns the predecessor blocks. Except for backedges, every
    /// predecessor id is smaller than this block's id.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.preds
    }

    /// Returns the successor blocks, in branch order for control splits.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.succs
    }

    /// Returns the static branch probability of the i-th successor edge.
    /// 1.0 for single-successor blocks.
    #[must_use]
    pub fn successor_probability(&self, i: usize) -> f64 {
        self.succ_probabilities[i]
    }

    /// Returns the relative execution frequency, or -1 if the frequency
    /// pass has not run.
    #[must_use]
    pub fn relative_frequency(&self) -> f64 {
        self.relative_frequency
    }

    /// Returns the provenance of this block's frequency value.
    #[must_use]
    pub fn frequency_source(&self) -> ProfileSource {
        self.frequency_source
    }

    /// Returns the immediate dominator, or `None` for the entry block (or
    /// before the dominator pass has run).
    #[must_use]
    pub fn dominator(&self) -> Option<BlockId> {
        self.dominator
    }

    /// Returns the immediate dominator-tree children, sorted by id.
    #[must_use]
    pub fn dominated(&self) -> &[BlockId] {
        &self.dominated
    }

    /// Returns this block's depth in the dominator tree (entry = 0).
    #[must_use]
    pub fn dominator_depth(&self) -> u32 {
        self.dominator_depth
    }

    /// Returns the immediate postdominator, or `None` if every path from
    /// this block can reach a control sink without rejoining.
    #[must_use]
    pub fn postdominator(&self) -> Option<BlockId> {
        self.postdominator
    }

    /// Returns the innermost loop containing this block.
    #[must_use]
    pub fn loop_id(&self) -> Option<LoopId> {
        self.loop_id
    }

    /// Returns `true` if this block's begin marker is a loop header.
    #[must_use]
    pub fn is_loop_header(&self) -> bool {
        self.is_loop_header
    }

    /// Returns `true` if this block ends in a backedge.
    #[must_use]
    pub fn is_loop_end(&self) -> bool {
        self.is_loop_end
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}..{}]", self.id, self.begin, self.end)
    }
}
