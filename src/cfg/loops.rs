//! Natural loop discovery and per-loop data.
//!
//! Loops are discovered by scanning the block array in order: every loop
//! header opens a new [`Loop`], whose parent is the innermost loop already
//! claiming the header. Membership is a backward flood fill from each
//! backedge block (and, while the graph still carries explicit exit markers,
//! from each exit marker's predecessor); the fill stops at blocks already
//! claimed, so it never escapes past the header.
//!
//! Two notions of "exit" are kept deliberately distinct. *Natural* exits are
//! successors outside the loop found by scanning member blocks; *marker*
//! exits are the blocks whose begin is an explicit loop-exit node. They
//! differ on paths that leave a loop by deoptimizing, which need no marker,
//! and the frequency and verifier logic depend on the distinction.

use std::{collections::BTreeSet, sync::OnceLock};

use crate::{
    cfg::{
        block::{BlockId, LoopId},
        builder::ControlFlowGraph,
    },
    error::inconsistency,
    ir::{InstGraph, InstId, InstKind, LocationId, MemoryKill},
    Result,
};

/// The set of abstract memory locations a block or loop body may mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSet {
    /// A known set of locations.
    Locations(BTreeSet<LocationId>),
    /// Anything may be mutated (an opaque call was seen).
    Any,
}

impl KillSet {
    /// The empty kill set.
    #[must_use]
    pub fn empty() -> Self {
        KillSet::Locations(BTreeSet::new())
    }

    /// Returns `true` if the given location may be mutated.
    #[must_use]
    pub fn kills(&self, location: LocationId) -> bool {
        match self {
            KillSet::Any => true,
            KillSet::Locations(set) => set.contains(&location),
        }
    }

    /// Returns `true` if any location at all may be mutated.
    #[must_use]
    pub fn kills_any(&self) -> bool {
        match self {
            KillSet::Any => true,
            KillSet::Locations(set) => !set.is_empty(),
        }
    }

    /// Folds a single instruction's memory effect into this set. Returns
    /// `true` once the set has saturated to [`KillSet::Any`], letting
    /// callers short-circuit.
    pub fn absorb(&mut self, kill: MemoryKill) -> bool {
        match (&mut *self, kill) {
            (KillSet::Any, _) => true,
            (_, MemoryKill::Any) => {
                *self = KillSet::Any;
                true
            }
            (KillSet::Locations(set), MemoryKill::Single(loc)) => {
                set.insert(loc);
                false
            }
            (KillSet::Locations(_), MemoryKill::None) => false,
        }
    }

    /// Unions another kill set into this one. Returns `true` once saturated.
    pub fn absorb_set(&mut self, other: &KillSet) -> bool {
        match (&mut *self, other) {
            (KillSet::Any, _) => true,
            (_, KillSet::Any) => {
                *self = KillSet::Any;
                true
            }
            (KillSet::Locations(set), KillSet::Locations(other)) => {
                set.extend(other.iter().copied());
                false
            }
        }
    }
}

/// One natural loop.
#[derive(Debug)]
pub struct Loop {
    pub(crate) index: LoopId,
    pub(crate) parent: Option<LoopId>,
    pub(crate) header: BlockId,
    pub(crate) children: Vec<LoopId>,
    /// All member blocks, including those of nested loops. The header comes
    /// first; the rest are in flood-fill discovery order.
    pub(crate) blocks: Vec<BlockId>,
    /// Out-of-loop successors of member blocks, sorted by id.
    pub(crate) natural_exits: Vec<BlockId>,
    /// Blocks beginning with an explicit exit marker of this loop, sorted by
    /// id. Equal to the natural exits once markers have been folded away.
    pub(crate) loop_exits: Vec<BlockId>,
    pub(crate) depth: u32,
    pub(crate) num_backedges: usize,
    /// Aggregated memory effect of the loop body; computed on first use.
    pub(crate) kill_locations: OnceLock<KillSet>,
}

impl Loop {
    /// Returns this loop's id.
    #[must_use]
    pub fn index(&self) -> LoopId {
        self.index
    }

    /// Returns the enclosing loop, if any.
    #[must_use]
    pub fn parent(&self) -> Option<LoopId> {
        self.parent
    }

    /// Returns the header block; its id is the smallest of all members.
    #[must_use]
    pub fn header(&self) -> BlockId {
        self.header
    }

    /// Returns the loops nested directly inside this one.
    #[must_use]
    pub fn children(&self) -> &[LoopId] {
        &self.children
    }

    /// Returns every member block, including blocks of nested loops.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Returns the out-of-loop successors of member blocks, sorted by id.
    #[must_use]
    pub fn natural_exits(&self) -> &[BlockId] {
        &self.natural_exits
    }

    /// Returns the explicit exit-marker blocks, sorted by id. May differ
    /// from the natural exits on unconditionally deoptimizing paths.
    #[must_use]
    pub fn loop_exits(&self) -> &[BlockId] {
        &self.loop_exits
    }

    /// Returns the nesting depth: 1 for outermost loops.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns the number of backedges into the header.
    #[must_use]
    pub fn num_backedges(&self) -> usize {
        self.num_backedges
    }
}

impl std::fmt::Display for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(header={}, depth={})", self.index, self.header, self.depth)
    }
}

/// Discovers all loops, computes membership, nesting and exits.
pub(crate) fn compute_loop_information(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
) -> Result<()> {
    cfg.loops.clear();
    for i in 0..cfg.blocks.len() {
        if !cfg.blocks[i].is_loop_header {
            continue;
        }
        let header = cfg.blocks[i].id;
        let header_begin = cfg.blocks[i].begin;
        let parent = cfg.blocks[i].loop_id;
        let loop_id = LoopId::new(cfg.loops.len());
        let depth = match parent {
            Some(p) => {
                cfg.loops[p.index()].children.push(loop_id);
                cfg.loops[p.index()].depth + 1
            }
            None => 1,
        };
        cfg.loops.push(Loop {
            index: loop_id,
            parent,
            header,
            children: Vec::new(),
            blocks: vec![header],
            natural_exits: Vec::new(),
            loop_exits: Vec::new(),
            depth,
            num_backedges: graph.loop_ends(header_begin).len(),
            kill_locations: OnceLock::new(),
        });
        cfg.blocks[i].loop_id = Some(loop_id);

        for &len in graph.loop_ends(header_begin) {
            let end_block = cfg.block_for(len).ok_or_else(|| {
                inconsistency!("backedge node {len} of {header} is not in any block")
            })?;
            compute_loop_blocks(cfg, end_block, loop_id, true)?;
        }

        // Nested loops have not been discovered yet at this point, so every
        // member still reports this loop as its innermost one.
        collect_natural_exits(cfg, loop_id)?;

        if graph.exit_markers_valid() {
            for &lex in graph.loop_exits(header_begin) {
                let exit_block = cfg.block_for(lex).ok_or_else(|| {
                    inconsistency!("exit marker {lex} of {header} is not in any block")
                })?;
                if cfg.blocks[exit_block.index()].preds.len() != 1 {
                    return Err(inconsistency!(
                        "exit marker block {exit_block} must have exactly one predecessor"
                    ));
                }
                let pred = cfg.blocks[exit_block.index()].preds[0];
                compute_loop_blocks(cfg, pred, loop_id, true)?;
                cfg.loops[loop_id.index()].loop_exits.push(exit_block);
            }
            cfg.loops[loop_id.index()].loop_exits.sort_unstable();

            fold_in_unexpected_exits(cfg, graph, loop_id, header_begin)?;
        } else {
            let exits = cfg.loops[loop_id.index()].natural_exits.clone();
            cfg.loops[loop_id.index()].loop_exits = exits;
        }
    }
    Ok(())
}

/// Backward (or forward) flood fill claiming blocks for `loop_id`, stopping
/// at blocks already claimed by it.
fn compute_loop_blocks(
    cfg: &mut ControlFlowGraph,
    start: BlockId,
    loop_id: LoopId,
    use_preds: bool,
) -> Result<()> {
    if cfg.blocks[start.index()].loop_id == Some(loop_id) {
        return Ok(());
    }
    claim(cfg, start, loop_id);
    let mut stack = vec![start];
    while let Some(block) = stack.pop() {
        cfg.options.alarm.check_progress()?;
        let edges = if use_preds {
            cfg.blocks[block.index()].preds.clone()
        } else {
            cfg.blocks[block.index()].succs.clone()
        };
        for edge in edges {
            if cfg.blocks[edge.index()].loop_id != Some(loop_id) {
                claim(cfg, edge, loop_id);
                stack.push(edge);
            }
        }
    }
    Ok(())
}

fn claim(cfg: &mut ControlFlowGraph, block: BlockId, loop_id: LoopId) {
    cfg.blocks[block.index()].loop_id = Some(loop_id);
    cfg.loops[loop_id.index()].blocks.push(block);
}

fn collect_natural_exits(cfg: &mut ControlFlowGraph, loop_id: LoopId) -> Result<()> {
    let mut exits = Vec::new();
    for i in 0..cfg.loops[loop_id.index()].blocks.len() {
        let member = cfg.loops[loop_id.index()].blocks[i];
        for j in 0..cfg.blocks[member.index()].succs.len() {
            let succ = cfg.blocks[member.index()].succs[j];
            if cfg.blocks[succ.index()].loop_id != Some(loop_id) {
                if cfg.loop_depth(succ) >= cfg.loops[loop_id.index()].depth {
                    return Err(inconsistency!(
                        "natural exit {succ} of {} is not less deeply nested",
                        cfg.loops[loop_id.index()]
                    ));
                }
                exits.push(succ);
            }
        }
    }
    exits.sort_unstable();
    exits.dedup();
    cfg.loops[loop_id.index()].natural_exits = exits;
    Ok(())
}

/// Sweeps the member list for successors that leave the loop without being a
/// recognized exit-marker target and folds the whole branch into the loop.
/// The member list grows during the sweep; only the snapshot taken at entry
/// is scanned, which matches how the fill can only append already-dominated
/// blocks.
fn fold_in_unexpected_exits(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    loop_id: LoopId,
    header_begin: InstId,
) -> Result<()> {
    let size = cfg.loops[loop_id.index()].blocks.len();
    for i in 0..size {
        let member = cfg.loops[loop_id.index()].blocks[i];
        for j in 0..cfg.blocks[member.index()].succs.len() {
            let succ = cfg.blocks[member.index()].succs[j];
            if cfg.blocks[succ.index()].loop_id == Some(loop_id) {
                continue;
            }
            let succ_begin = cfg.blocks[succ.index()].begin;
            if graph.is_loop_exit_of(header_begin, succ_begin) {
                continue;
            }
            if matches!(graph.kind(succ_begin), InstKind::LoopBegin { .. }) {
                return Err(inconsistency!(
                    "unexpected out-of-loop successor {succ} of {} is a loop header",
                    cfg.loops[loop_id.index()]
                ));
            }
            if cfg.loop_depth(succ) >= cfg.loops[loop_id.index()].depth {
                return Err(inconsistency!(
                    "unexpected out-of-loop successor {succ} of {} is not less deeply nested",
                    cfg.loops[loop_id.index()]
                ));
            }
            compute_loop_blocks(cfg, succ, loop_id, false)?;
        }
    }
    Ok(())
}

impl ControlFlowGraph {
    /// Returns the memory locations the given block may mutate, unioned over
    /// its instruction nodes.
    #[must_use]
    pub fn block_kill_locations(&self, graph: &InstGraph, block: BlockId) -> KillSet {
        let b = &self.blocks[block.index()];
        let mut kills = KillSet::empty();
        let mut cur = b.begin;
        loop {
            if kills.absorb(graph.kill(cur)) || cur == b.end {
                return kills;
            }
            match graph.next(cur) {
                Some(next) => cur = next,
                None => return kills,
            }
        }
    }

    /// Returns the memory locations the loop body may mutate: the union over
    /// directly owned member blocks and the summaries of nested loops.
    /// Computed lazily on first use and cached per loop; saturates early once
    /// any member may mutate anything.
    #[must_use]
    pub fn loop_kill_locations(&self, graph: &InstGraph, loop_id: LoopId) -> &KillSet {
        self.loops[loop_id.index()].kill_locations.get_or_init(|| {
            let mut kills = KillSet::empty();
            for &member in &self.loops[loop_id.index()].blocks {
                if self.blocks[member.index()].loop_id != Some(loop_id) {
                    continue;
                }
                if kills.absorb_set(&self.block_kill_locations(graph, member)) {
                    return kills;
                }
            }
            for &child in &self.loops[loop_id.index()].children {
                if kills.absorb_set(self.loop_kill_locations(graph, child)) {
                    return kills;
                }
            }
            kills
        })
    }
}
