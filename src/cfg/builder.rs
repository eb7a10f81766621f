//! CFG build surface: feature flags, build options and the caller-owned
//! cache.
//!
//! A [`ControlFlowGraph`] is computed from an [`InstGraph`] for a requested
//! set of [`BuildFlags`]. Block identification and the reverse post order
//! always run; frequencies, loops, dominators and postdominators are
//! optional and each is computed at most once. Requesting more features on an
//! existing instance ([`ControlFlowGraph::ensure`]) is strictly additive:
//! already computed results are never discarded or recomputed.
//!
//! The [`CfgCache`] keeps the last computed CFG per compilation unit, keyed
//! by the graph's revision counter, so successive phases of the same
//! compilation can share one instance instead of rebuilding.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::{
    cfg::{
        block::{BasicBlock, BlockId, LoopId},
        dominators,
        frequency::{self, FrequencyDivergence, LoopFrequencyData},
        loops::{self, Loop},
        postdom, rpo, verifier,
    },
    error::inconsistency,
    ir::{InstGraph, InstId},
    utils::CompilationAlarm,
    Result,
};

bitflags! {
    /// The analyses a caller requests from [`ControlFlowGraph::compute`].
    ///
    /// Flags accumulate monotonically on a CFG instance: once an analysis has
    /// been computed its flag stays set, and later requests only add what is
    /// missing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuildFlags: u8 {
        /// Blocks may have their edges edited by later backend stages. Only
        /// affects cache matching; the analysis surface is identical.
        const MODIFIABLE_BLOCKS = 1 << 0;
        /// Wire predecessor/successor edges between blocks.
        const CONNECT_BLOCKS = 1 << 1;
        /// Compute per-block relative execution frequencies.
        const FREQUENCIES = 1 << 2;
        /// Discover natural loops, their nesting and exits.
        const LOOPS = 1 << 3;
        /// Compute the dominator tree and its interval numbering.
        const DOMINATORS = 1 << 4;
        /// Compute postdominators.
        const POSTDOMINATORS = 1 << 5;
    }
}

impl BuildFlags {
    /// The feature set the instruction scheduler needs: everything except
    /// postdominators.
    #[must_use]
    pub fn for_schedule() -> Self {
        BuildFlags::MODIFIABLE_BLOCKS
            | BuildFlags::CONNECT_BLOCKS
            | BuildFlags::FREQUENCIES
            | BuildFlags::LOOPS
            | BuildFlags::DOMINATORS
    }

    /// Returns `true` if a CFG built with `self` satisfies a request for
    /// `requested`: every requested analysis flag is already present. The
    /// modifiable-blocks flag is excluded; it must match exactly and is
    /// checked by the cache lookup instead.
    #[must_use]
    pub fn not_weaker_than(self, requested: BuildFlags) -> bool {
        self.contains(requested.difference(BuildFlags::MODIFIABLE_BLOCKS))
    }
}

/// Tuning knobs for a CFG build.
///
/// The defaults match production behavior: loop frequencies derived from
/// loop-exit probabilities, no divergence bookkeeping, an unbounded watchdog.
#[derive(Debug)]
pub struct CfgOptions {
    /// Derive local loop frequencies from the sum of backedge frequencies
    /// (`1 / (1 - end sum)`) instead of the default exit-based estimate
    /// (`1 / exit sum`). The end-based estimate respects control sinks inside
    /// the loop body; the exit-based one reflects what compiled code actually
    /// does when it leaves a loop. Debug aid.
    pub use_loop_end_frequencies: bool,
    /// Compute both estimates during the local frequency pass and record a
    /// [`FrequencyDivergence`] whenever they disagree by more than
    /// [`CfgOptions::divergence_threshold`]. Forces loop and dominator
    /// information to be computed before frequencies. Never alters results.
    pub record_frequency_divergence: bool,
    /// Divergence magnitude above which a record is kept.
    pub divergence_threshold: f64,
    /// Cooperative watchdog checked inside every traversal loop.
    pub alarm: CompilationAlarm,
}

impl Default for CfgOptions {
    fn default() -> Self {
        Self {
            use_loop_end_frequencies: false,
            record_frequency_divergence: false,
            divergence_threshold: 1000.0,
            alarm: CompilationAlarm::unbounded(),
        }
    }
}

/// The control flow graph of one compilation unit: the block array in
/// loop-aware reverse post order, plus whatever optional analyses have been
/// requested so far.
///
/// Exclusively owned by its compilation unit; nothing here is shared across
/// threads. The instance remembers the graph revision it was built from so a
/// cache can tell whether it is still valid.
///
/// # Examples
///
/// ```rust
/// use irflow::{cfg::{BuildFlags, CfgOptions, ControlFlowGraph}, ir::InstGraph};
///
/// let mut g = InstGraph::new();
/// let start = g.add_start();
/// g.append_return(start);
///
/// let cfg = ControlFlowGraph::compute(&g, BuildFlags::all(), CfgOptions::default()).unwrap();
/// assert_eq!(cfg.block_count(), 1);
/// assert_eq!(cfg.entry_block().relative_frequency(), 1.0);
/// ```
#[derive(Debug)]
pub struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) node_to_block: Vec<Option<BlockId>>,
    pub(crate) loops: Vec<Loop>,
    pub(crate) max_dominator_depth: u32,
    pub(crate) local_loop_frequencies: HashMap<InstId, LoopFrequencyData>,
    pub(crate) divergences: Vec<FrequencyDivergence>,
    pub(crate) flags: BuildFlags,
    pub(crate) revision: u64,
    pub(crate) options: CfgOptions,
}

impl ControlFlowGraph {
    /// Builds a CFG for `graph` with the requested analyses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bailout`](crate::Error::Bailout) if the graph is too
    /// large or the watchdog in `options` expires,
    /// [`Error::GraphError`](crate::Error::GraphError) for malformed input
    /// shapes, and [`Error::Inconsistency`](crate::Error::Inconsistency) if
    /// an internal invariant check fails.
    pub fn compute(graph: &InstGraph, flags: BuildFlags, options: CfgOptions) -> Result<Self> {
        let (blocks, node_to_block) = rpo::identify_blocks(graph, &options.alarm)?;
        let mut cfg = Self {
            blocks,
            node_to_block,
            loops: Vec::new(),
            max_dominator_depth: 0,
            local_loop_frequencies: HashMap::new(),
            divergences: Vec::new(),
            flags: BuildFlags::empty(),
            revision: graph.revision(),
            options,
        };
        cfg.build(graph, flags)?;
        Ok(cfg)
    }

    /// Builds the feature set the instruction scheduler consumes.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ControlFlowGraph::compute`].
    pub fn compute_for_schedule(graph: &InstGraph, options: CfgOptions) -> Result<Self> {
        Self::compute(graph, BuildFlags::for_schedule(), options)
    }

    /// Additively computes any analyses in `flags` that are still missing
    /// from this instance. Already computed results are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistency`](crate::Error::Inconsistency) if the
    /// graph has been mutated since this CFG was computed, plus the same
    /// conditions as [`ControlFlowGraph::compute`].
    pub fn ensure(&mut self, graph: &InstGraph, flags: BuildFlags) -> Result<()> {
        if graph.revision() != self.revision {
            return Err(inconsistency!(
                "CFG was computed for graph revision {} but the graph is now at revision {}",
                self.revision,
                graph.revision()
            ));
        }
        if self.flags.not_weaker_than(flags) {
            return Ok(());
        }
        self.build(graph, flags)
    }

    fn build(&mut self, graph: &InstGraph, flags: BuildFlags) -> Result<()> {
        // Divergence bookkeeping inspects loop membership while local loop
        // frequencies are still being computed, so loops and dominators are
        // pulled forward in that mode.
        let mut loop_info_computed = false;
        if self.options.record_frequency_divergence
            && flags.contains(BuildFlags::FREQUENCIES)
            && !self.flags.contains(BuildFlags::FREQUENCIES)
        {
            if !self.flags.contains(BuildFlags::LOOPS) {
                loops::compute_loop_information(self, graph)?;
            }
            if !self.flags.contains(BuildFlags::DOMINATORS) {
                dominators::compute_dominators(self)?;
            }
            loop_info_computed = true;
        }

        if flags.contains(BuildFlags::FREQUENCIES) && !self.flags.contains(BuildFlags::FREQUENCIES)
        {
            frequency::compute_frequencies(self, graph)?;
        }
        if flags.contains(BuildFlags::LOOPS)
            && !loop_info_computed
            && !self.flags.contains(BuildFlags::LOOPS)
        {
            loops::compute_loop_information(self, graph)?;
        }
        if flags.contains(BuildFlags::DOMINATORS)
            && !loop_info_computed
            && !self.flags.contains(BuildFlags::DOMINATORS)
        {
            dominators::compute_dominators(self)?;
            if cfg!(debug_assertions) {
                frequency::verify_rpo_inner_loops_first(self, graph)?;
            }
        }
        if flags.contains(BuildFlags::POSTDOMINATORS)
            && !self.flags.contains(BuildFlags::POSTDOMINATORS)
        {
            postdom::compute_postdominators(self)?;
        }

        self.flags |= flags;
        if loop_info_computed {
            self.flags |= BuildFlags::LOOPS | BuildFlags::DOMINATORS;
        }

        if cfg!(debug_assertions)
            && self.flags.intersects(
                BuildFlags::CONNECT_BLOCKS
                    | BuildFlags::LOOPS
                    | BuildFlags::DOMINATORS
                    | BuildFlags::POSTDOMINATORS,
            )
        {
            verifier::verify(self, graph)?;
        }
        Ok(())
    }

    /// Runs the structural verifier against this CFG.
    ///
    /// The same pass runs automatically after every debug-assertions build;
    /// this entry point exists for explicit checks in release configurations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistency`](crate::Error::Inconsistency) on the
    /// first violated invariant.
    pub fn verify(&self, graph: &InstGraph) -> Result<()> {
        verifier::verify(self, graph)
    }

    /// Returns all blocks in reverse post order; the index equals the id.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the entry block.
    #[must_use]
    pub fn entry_block(&self) -> &BasicBlock {
        &self.blocks[BlockId::ENTRY.index()]
    }

    /// Returns the block containing the given instruction node, or `None`
    /// for nodes not reachable from the start.
    #[must_use]
    pub fn block_for(&self, inst: InstId) -> Option<BlockId> {
        self.node_to_block.get(inst.index()).copied().flatten()
    }

    /// Returns all discovered loops; the index equals the [`LoopId`].
    /// Empty unless [`BuildFlags::LOOPS`] was requested.
    #[must_use]
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Returns the loop with the given id.
    #[must_use]
    pub fn loop_of(&self, id: LoopId) -> &Loop {
        &self.loops[id.index()]
    }

    /// Returns the loop nesting depth of a block: 0 outside any loop,
    /// otherwise the depth of its innermost loop.
    #[must_use]
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        match self.blocks[block.index()].loop_id {
            Some(l) => self.loops[l.index()].depth(),
            None => 0,
        }
    }

    /// Returns the maximum dominator-tree depth, used to size traversal
    /// stacks. 0 unless [`BuildFlags::DOMINATORS`] was requested.
    #[must_use]
    pub fn max_dominator_depth(&self) -> u32 {
        self.max_dominator_depth
    }

    /// Returns the analyses computed so far on this instance.
    #[must_use]
    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    /// Returns the graph revision this CFG was computed from.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the build options this CFG was computed with.
    #[must_use]
    pub fn options(&self) -> &CfgOptions {
        &self.options
    }
}

/// Caller-owned cache for the last CFG computed per compilation unit.
///
/// Lookups succeed only when the stored instance was computed from the same
/// graph revision, with the same block mutability, and with a feature set
/// not weaker than the request. [`CfgCache::compute`] additively extends a
/// cache hit that is merely missing analyses instead of rebuilding.
#[derive(Debug, Default)]
pub struct CfgCache {
    entry: Option<ControlFlowGraph>,
}

impl CfgCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached CFG if it is valid for `revision` and satisfies
    /// `flags`.
    #[must_use]
    pub fn get(&self, revision: u64, flags: BuildFlags) -> Option<&ControlFlowGraph> {
        let cfg = self.entry.as_ref()?;
        if cfg.revision == revision
            && (cfg.flags & BuildFlags::MODIFIABLE_BLOCKS) == (flags & BuildFlags::MODIFIABLE_BLOCKS)
            && cfg.flags.not_weaker_than(flags)
        {
            Some(cfg)
        } else {
            None
        }
    }

    /// Returns a CFG for `graph` satisfying `flags`, reusing and extending
    /// the cached instance where possible. `options` is only consulted when
    /// a fresh build is needed.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ControlFlowGraph::compute`].
    pub fn compute(
        &mut self,
        graph: &InstGraph,
        flags: BuildFlags,
        options: CfgOptions,
    ) -> Result<&ControlFlowGraph> {
        let reusable = self.entry.as_ref().is_some_and(|cfg| {
            cfg.revision == graph.revision()
                && cfg.flags.contains(BuildFlags::MODIFIABLE_BLOCKS)
                    == flags.contains(BuildFlags::MODIFIABLE_BLOCKS)
        });
        if reusable {
            if let Some(cfg) = self.entry.as_mut() {
                cfg.ensure(graph, flags)?;
            }
        } else {
            self.entry = Some(ControlFlowGraph::compute(graph, flags, options)?);
        }
        match self.entry.as_ref() {
            Some(cfg) => Ok(cfg),
            None => Err(inconsistency!("CFG cache lost its entry during compute")),
        }
    }

    /// Stores a CFG, replacing any previous entry.
    pub fn store(&mut self, cfg: ControlFlowGraph) {
        self.entry = Some(cfg);
    }

    /// Drops the cached CFG.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ProfileSource;

    fn diamond() -> InstGraph {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
        let merge = g.add_merge();
        g.append_end(a, merge);
        g.append_end(b, merge);
        g.append_return(merge);
        g
    }

    #[test]
    fn test_flags_not_weaker_than() {
        let built = BuildFlags::CONNECT_BLOCKS | BuildFlags::DOMINATORS | BuildFlags::LOOPS;
        assert!(built.not_weaker_than(BuildFlags::DOMINATORS));
        assert!(built.not_weaker_than(BuildFlags::LOOPS | BuildFlags::CONNECT_BLOCKS));
        assert!(!built.not_weaker_than(BuildFlags::POSTDOMINATORS));
        // Modifiability is ignored by the weakness check.
        assert!(built.not_weaker_than(BuildFlags::MODIFIABLE_BLOCKS | BuildFlags::LOOPS));
    }

    #[test]
    fn test_ensure_is_additive() {
        let g = diamond();
        let mut cfg =
            ControlFlowGraph::compute(&g, BuildFlags::CONNECT_BLOCKS, CfgOptions::default())
                .unwrap();
        assert!(cfg.block(BlockId::new(3)).dominator().is_none());

        cfg.ensure(&g, BuildFlags::DOMINATORS).unwrap();
        assert_eq!(cfg.block(BlockId::new(3)).dominator(), Some(BlockId::ENTRY));
        assert!(cfg.flags().contains(BuildFlags::CONNECT_BLOCKS | BuildFlags::DOMINATORS));
    }

    #[test]
    fn test_ensure_rejects_stale_revision() {
        let mut g = diamond();
        let mut cfg =
            ControlFlowGraph::compute(&g, BuildFlags::CONNECT_BLOCKS, CfgOptions::default())
                .unwrap();
        g.set_exit_markers_valid(false);
        assert!(cfg.ensure(&g, BuildFlags::DOMINATORS).is_err());
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut g = diamond();
        let mut cache = CfgCache::new();
        let flags = BuildFlags::CONNECT_BLOCKS | BuildFlags::DOMINATORS;
        cache.compute(&g, flags, CfgOptions::default()).unwrap();
        assert!(cache.get(g.revision(), flags).is_some());
        assert!(cache.get(g.revision(), BuildFlags::POSTDOMINATORS).is_none());
        assert!(cache
            .get(g.revision(), flags | BuildFlags::MODIFIABLE_BLOCKS)
            .is_none());

        // Mutating the graph invalidates by revision.
        g.set_exit_markers_valid(false);
        assert!(cache.get(g.revision(), flags).is_none());

        cache.invalidate();
        assert!(cache.get(g.revision(), flags).is_none());
    }

    #[test]
    fn test_cache_extends_existing_entry() {
        let g = diamond();
        let mut cache = CfgCache::new();
        cache
            .compute(&g, BuildFlags::CONNECT_BLOCKS, CfgOptions::default())
            .unwrap();
        let cfg = cache
            .compute(
                &g,
                BuildFlags::CONNECT_BLOCKS | BuildFlags::POSTDOMINATORS,
                CfgOptions::default(),
            )
            .unwrap();
        assert!(cfg.flags().contains(BuildFlags::POSTDOMINATORS));
    }
}
