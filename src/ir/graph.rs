//! Instruction graph arena.
//!
//! [`InstGraph`] is the concrete carrier of the node model in
//! [`node`](crate::ir::node): a dense arena of instruction nodes connected by
//! intra-block `next` links and typed end-node edges. The CFG engine only
//! uses its read-only surface; the mutating builder methods exist for front
//! ends and tests to assemble graphs.
//!
//! Every mutation bumps a revision counter. The CFG cache uses the revision
//! to decide whether a previously computed CFG is still valid for this graph.
//!
//! # Example
//!
//! ```rust
//! use irflow::ir::{InstGraph, ProfileSource};
//!
//! // entry -> {a, b} -> merge -> return
//! let mut g = InstGraph::new();
//! let start = g.add_start();
//! let a = g.add_begin();
//! let b = g.add_begin();
//! g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
//! let merge = g.add_merge();
//! g.append_end(a, merge);
//! g.append_end(b, merge);
//! g.append_return(merge);
//! assert_eq!(g.begin_count(), 4);
//! ```

use crate::ir::{InstId, InstKind, MemoryKill, ProfileSource};

/// Payload of one instruction node.
#[derive(Debug, Clone)]
struct InstData {
    kind: InstKind,
    /// Intra-block successor. `None` for terminators and for unattached
    /// begin markers.
    next: Option<InstId>,
    kill: MemoryKill,
}

/// A directed graph of instruction nodes, the read-only input of the CFG
/// engine.
///
/// Nodes are stored in a dense arena; [`InstId`]s index into it. The graph
/// carries a revision counter (bumped on every mutation) and a flag telling
/// the loop analysis whether explicit loop-exit markers are still
/// authoritative (pre-canonicalization) or already folded away.
#[derive(Debug, Clone, Default)]
pub struct InstGraph {
    insts: Vec<InstData>,
    start: Option<InstId>,
    revision: u64,
    exit_markers_valid: bool,
}

impl InstGraph {
    /// Creates an empty instruction graph with loop-exit markers marked
    /// authoritative.
    #[must_use]
    pub fn new() -> Self {
        Self {
            insts: Vec::new(),
            start: None,
            revision: 0,
            exit_markers_valid: true,
        }
    }

    fn add(&mut self, kind: InstKind) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(InstData {
            kind,
            next: None,
            kill: MemoryKill::None,
        });
        self.revision += 1;
        id
    }

    fn data(&self, id: InstId) -> &InstData {
        &self.insts[id.index()]
    }

    fn data_mut(&mut self, id: InstId) -> &mut InstData {
        self.revision += 1;
        &mut self.insts[id.index()]
    }

    // ----- construction surface (front ends and tests) -----

    /// Adds the graph entry node. There can be only one.
    ///
    /// # Panics
    ///
    /// Panics if a start node was already added.
    pub fn add_start(&mut self) -> InstId {
        assert!(self.start.is_none(), "graph already has a start node");
        let id = self.add(InstKind::Start);
        self.start = Some(id);
        id
    }

    /// Adds an unattached plain begin marker (a branch target).
    pub fn add_begin(&mut self) -> InstId {
        self.add(InstKind::Begin)
    }

    /// Adds an unattached merge node.
    pub fn add_merge(&mut self) -> InstId {
        self.add(InstKind::Merge {
            forward_ends: Vec::new(),
        })
    }

    /// Adds an unattached loop header node.
    pub fn add_loop_begin(&mut self) -> InstId {
        self.add(InstKind::LoopBegin {
            forward_ends: Vec::new(),
            loop_ends: Vec::new(),
            loop_exits: Vec::new(),
        })
    }

    /// Adds a loop-exit marker for `loop_begin` and registers it with the
    /// header. Exit order across calls defines the header's exit list order.
    ///
    /// # Panics
    ///
    /// Panics if `loop_begin` is not a [`InstKind::LoopBegin`].
    pub fn add_loop_exit(&mut self, loop_begin: InstId) -> InstId {
        let id = self.add(InstKind::LoopExit { loop_begin });
        match &mut self.data_mut(loop_begin).kind {
            InstKind::LoopBegin { loop_exits, .. } => loop_exits.push(id),
            other => panic!("add_loop_exit target must be a loop header, got {other}"),
        }
        id
    }

    /// Appends a straight-line instruction after `after` via the next link.
    pub fn append_fixed(&mut self, after: InstId) -> InstId {
        let id = self.add(InstKind::Fixed);
        self.link(after, id);
        id
    }

    /// Appends a sequential end after `after`, flowing into `target` (a merge
    /// or a loop header's forward entry). Registers the end with the target.
    ///
    /// # Panics
    ///
    /// Panics if `target` is neither a merge nor a loop header.
    pub fn append_end(&mut self, after: InstId, target: InstId) -> InstId {
        let id = self.add(InstKind::End { target });
        match &mut self.data_mut(target).kind {
            InstKind::Merge { forward_ends } => forward_ends.push(id),
            InstKind::LoopBegin { forward_ends, .. } => forward_ends.push(id),
            other => panic!("end target must be a merge or loop header, got {other}"),
        }
        self.link(after, id);
        id
    }

    /// Appends a backedge end after `after`, closing `loop_begin`.
    ///
    /// # Panics
    ///
    /// Panics if `loop_begin` is not a [`InstKind::LoopBegin`].
    pub fn append_loop_end(&mut self, after: InstId, loop_begin: InstId) -> InstId {
        let id = self.add(InstKind::LoopEnd { loop_begin });
        match &mut self.data_mut(loop_begin).kind {
            InstKind::LoopBegin { loop_ends, .. } => loop_ends.push(id),
            other => panic!("loop end target must be a loop header, got {other}"),
        }
        self.link(after, id);
        id
    }

    /// Appends a control split after `after`. Each arm is a `(begin
    /// marker, probability)` pair, in branch order.
    ///
    /// # Panics
    ///
    /// Panics if an arm target is not a begin marker, or a probability is
    /// negative or not finite.
    pub fn append_control_split(
        &mut self,
        after: InstId,
        arms: Vec<(InstId, f64)>,
        profile: ProfileSource,
    ) -> InstId {
        let mut successors = Vec::with_capacity(arms.len());
        let mut probabilities = Vec::with_capacity(arms.len());
        for (target, probability) in arms {
            assert!(
                self.data(target).kind.is_begin(),
                "control split arm {target} must be a begin marker"
            );
            assert!(
                probability.is_finite() && probability >= 0.0,
                "arm probability must be finite and non-negative"
            );
            successors.push(target);
            probabilities.push(probability);
        }
        let id = self.add(InstKind::ControlSplit {
            successors,
            probabilities,
            profile,
        });
        self.link(after, id);
        id
    }

    /// Appends a return sink after `after`.
    pub fn append_return(&mut self, after: InstId) -> InstId {
        let id = self.add(InstKind::Return);
        self.link(after, id);
        id
    }

    /// Appends a deoptimization sink after `after`.
    pub fn append_deopt(&mut self, after: InstId) -> InstId {
        let id = self.add(InstKind::Deopt);
        self.link(after, id);
        id
    }

    /// Links `from` to fall through sequentially into the begin marker `to`,
    /// ending `from`'s block without an explicit end node.
    ///
    /// # Panics
    ///
    /// Panics if `to` is not a begin marker.
    pub fn set_fall_through(&mut self, from: InstId, to: InstId) {
        assert!(
            self.data(to).kind.is_begin(),
            "fall-through target {to} must be a begin marker"
        );
        self.link(from, to);
    }

    fn link(&mut self, from: InstId, to: InstId) {
        let data = self.data_mut(from);
        assert!(
            !data.kind.is_terminator(),
            "cannot append after a block terminator"
        );
        assert!(data.next.is_none(), "node {from} already has a successor");
        data.next = Some(to);
    }

    /// Records the memory effect of an instruction node.
    pub fn set_kill(&mut self, inst: InstId, kill: MemoryKill) {
        self.data_mut(inst).kill = kill;
    }

    /// Marks whether loop-exit markers are still the authoritative exit list
    /// (pre-canonicalization). Once frame-state bookkeeping has folded them
    /// away, loop analysis falls back to natural (dominator-tree) exits.
    pub fn set_exit_markers_valid(&mut self, valid: bool) {
        self.exit_markers_valid = valid;
        self.revision += 1;
    }

    // ----- read-only surface (the CFG engine) -----

    /// Returns the entry instruction, if one was added.
    #[must_use]
    pub fn start(&self) -> Option<InstId> {
        self.start
    }

    /// Returns the number of instruction nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Returns the number of begin markers, i.e. the number of basic blocks
    /// a CFG built from this graph will have.
    #[must_use]
    pub fn begin_count(&self) -> usize {
        self.insts.iter().filter(|d| d.kind.is_begin()).count()
    }

    /// Returns the current revision; bumped on every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns `true` if loop-exit markers are authoritative for loop
    /// analysis.
    #[must_use]
    pub fn exit_markers_valid(&self) -> bool {
        self.exit_markers_valid
    }

    /// Returns the kind of a node.
    #[must_use]
    pub fn kind(&self, id: InstId) -> &InstKind {
        &self.data(id).kind
    }

    /// Returns the intra-block successor of a node.
    #[must_use]
    pub fn next(&self, id: InstId) -> Option<InstId> {
        self.data(id).next
    }

    /// Returns the memory effect of a node.
    #[must_use]
    pub fn kill(&self, id: InstId) -> MemoryKill {
        self.data(id).kill
    }

    /// Returns an iterator over all node ids in arena order.
    pub fn ids(&self) -> impl Iterator<Item = InstId> + '_ {
        (0..self.insts.len()).map(InstId::new)
    }

    /// Returns the backedge ends of a loop header.
    ///
    /// # Panics
    ///
    /// Panics if `loop_begin` is not a [`InstKind::LoopBegin`].
    #[must_use]
    pub fn loop_ends(&self, loop_begin: InstId) -> &[InstId] {
        match &self.data(loop_begin).kind {
            InstKind::LoopBegin { loop_ends, .. } => loop_ends,
            other => panic!("{loop_begin} is not a loop header ({other})"),
        }
    }

    /// Returns the loop-exit markers of a loop header, in registration order.
    ///
    /// # Panics
    ///
    /// Panics if `loop_begin` is not a [`InstKind::LoopBegin`].
    #[must_use]
    pub fn loop_exits(&self, loop_begin: InstId) -> &[InstId] {
        match &self.data(loop_begin).kind {
            InstKind::LoopBegin { loop_exits, .. } => loop_exits,
            other => panic!("{loop_begin} is not a loop header ({other})"),
        }
    }

    /// Returns the forward (non-backedge) entries of a loop header.
    ///
    /// # Panics
    ///
    /// Panics if `loop_begin` is not a [`InstKind::LoopBegin`].
    #[must_use]
    pub fn forward_ends(&self, loop_begin: InstId) -> &[InstId] {
        match &self.data(loop_begin).kind {
            InstKind::LoopBegin { forward_ends, .. } => forward_ends,
            other => panic!("{loop_begin} is not a loop header ({other})"),
        }
    }

    /// Returns `true` if `begin` is one of `loop_begin`'s registered exits.
    #[must_use]
    pub fn is_loop_exit_of(&self, loop_begin: InstId, begin: InstId) -> bool {
        self.loop_exits(loop_begin).contains(&begin)
    }

    /// Returns the probability of the control split `split` branching to the
    /// begin marker `target`, or `None` if `target` is not a successor.
    #[must_use]
    pub fn split_probability(&self, split: InstId, target: InstId) -> Option<f64> {
        match &self.data(split).kind {
            InstKind::ControlSplit {
                successors,
                probabilities,
                ..
            } => successors
                .iter()
                .position(|&s| s == target)
                .map(|i| probabilities[i]),
            _ => None,
        }
    }

    /// Returns the profile provenance of a control split, or `None` for
    /// other node kinds.
    #[must_use]
    pub fn split_profile(&self, split: InstId) -> Option<ProfileSource> {
        match &self.data(split).kind {
            InstKind::ControlSplit { profile, .. } => Some(*profile),
            _ => None,
        }
    }
}
