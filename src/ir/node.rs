//! Instruction node model consumed by the CFG engine.
//!
//! The engine treats the instruction graph as an abstract, read-only input;
//! this module defines the node roles it consumes. A node is either a *begin*
//! marker (it opens a basic block), an intra-block fixed instruction, or a
//! block-terminating *end*:
//!
//! - [`InstKind::Start`] - the graph entry, begin of block 0
//! - [`InstKind::Begin`] - plain begin with a single predecessor (branch target)
//! - [`InstKind::Merge`] - join point of several forward [`InstKind::End`]s
//! - [`InstKind::LoopBegin`] - loop header: merges forward entries and
//!   backedges, and owns the ordered lists of its loop-end and loop-exit nodes
//! - [`InstKind::LoopExit`] - single-predecessor marker on a path leaving a loop
//! - [`InstKind::Fixed`] - straight-line instruction inside a block
//! - [`InstKind::End`] - sequential end, flows into a merge or a loop header's
//!   forward entry
//! - [`InstKind::LoopEnd`] - backedge into a loop header
//! - [`InstKind::ControlSplit`] - multi-way branch with per-successor static
//!   probabilities and a profile provenance tag
//! - [`InstKind::Return`] / [`InstKind::Deopt`] - control sinks

use strum::Display;

/// Identifier of an instruction node, a dense index into the owning
/// [`InstGraph`](crate::ir::InstGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    /// Creates an instruction id from a dense index.
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

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of an abstract memory location, interned by the front end.
///
/// The engine never interprets locations; it only unions them into per-block
/// and per-loop kill summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub u32);

/// Memory effect of a single instruction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryKill {
    /// The instruction does not mutate memory.
    #[default]
    None,
    /// The instruction may mutate exactly one abstract location.
    Single(LocationId),
    /// The instruction may mutate any location (e.g. an opaque call).
    Any,
}

/// Provenance of a branch probability or derived frequency value.
///
/// Used by downstream diagnostics only; the numeric frequency algorithm
/// ignores it. Sources are merged with [`ProfileSource::combine`], a
/// commutative operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ProfileSource {
    /// No profile information contributed.
    #[default]
    Unknown,
    /// Derived from a compiler heuristic or injected estimate.
    Inferred,
    /// Backed by interpreter/runtime profile data.
    Profiled,
    /// A mix of profiled and inferred contributions.
    Combined,
}

impl ProfileSource {
    /// Merges two provenance tags.
    ///
    /// `Unknown` is the identity; equal tags are preserved; mixing
    /// [`ProfileSource::Profiled`] and [`ProfileSource::Inferred`] yields
    /// [`ProfileSource::Combined`]. The operation is commutative and
    /// associative.
    #[must_use]
    pub fn combine(self, other: ProfileSource) -> ProfileSource {
        match (self, other) {
            (ProfileSource::Unknown, x) | (x, ProfileSource::Unknown) => x,
            (a, b) if a == b => a,
            _ => ProfileSource::Combined,
        }
    }

    /// Returns `true` if any real profile data contributed to this tag.
    #[must_use]
    pub fn is_profiled(self) -> bool {
        matches!(self, ProfileSource::Profiled | ProfileSource::Combined)
    }
}

/// Role of an instruction node in the control-flow skeleton.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum InstKind {
    /// Graph entry; begin marker of the entry block.
    Start,
    /// Plain begin marker with a single predecessor (a branch target or a
    /// sequential fall-through).
    Begin,
    /// Join point of several forward ends; begin marker of the joined block.
    Merge {
        /// The [`InstKind::End`] nodes flowing into this merge, in
        /// registration order.
        forward_ends: Vec<InstId>,
    },
    /// Loop header: merges forward entries and loop backedges. Begin marker
    /// of the header block.
    LoopBegin {
        /// Forward (non-backedge) [`InstKind::End`] entries.
        forward_ends: Vec<InstId>,
        /// Backedge [`InstKind::LoopEnd`] nodes, in registration order.
        loop_ends: Vec<InstId>,
        /// [`InstKind::LoopExit`] markers of this loop, in registration order.
        loop_exits: Vec<InstId>,
    },
    /// Single-predecessor marker on a path leaving a loop; begin marker of
    /// the exit block.
    LoopExit {
        /// The loop header this exit leaves.
        loop_begin: InstId,
    },
    /// Straight-line instruction inside a block.
    Fixed,
    /// Sequential block end flowing into a merge or a loop header's forward
    /// entry.
    End {
        /// The [`InstKind::Merge`] or [`InstKind::LoopBegin`] this end
        /// flows into.
        target: InstId,
    },
    /// Backedge block end into a loop header.
    LoopEnd {
        /// The loop header this backedge targets.
        loop_begin: InstId,
    },
    /// Multi-way branch; block end with one begin-marker successor per arm.
    ControlSplit {
        /// Successor begin markers, in branch order.
        successors: Vec<InstId>,
        /// Static execution probability per successor; non-negative, summing
        /// to 1 across successors absent rounding.
        probabilities: Vec<f64>,
        /// Provenance of the probabilities.
        profile: ProfileSource,
    },
    /// Method return; control sink.
    Return,
    /// Deoptimization; control sink that does *not* require a preceding
    /// loop-exit marker even when it leaves a loop.
    Deopt,
}

impl InstKind {
    /// Returns `true` if this node is a begin marker (opens a basic block).
    #[must_use]
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            InstKind::Start
                | InstKind::Begin
                | InstKind::Merge { .. }
                | InstKind::LoopBegin { .. }
                | InstKind::LoopExit { .. }
        )
    }

    /// Returns `true` if this node terminates a basic block by itself
    /// (independent of any fall-through into a begin marker).
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::End { .. }
                | InstKind::LoopEnd { .. }
                | InstKind::ControlSplit { .. }
                | InstKind::Return
                | InstKind::Deopt
        )
    }

    /// Returns `true` if this node is a control sink (no successors).
    #[must_use]
    pub fn is_sink(&self) -> bool {
        matches!(self, InstKind::Return | InstKind::Deopt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_source_combine_identity() {
        assert_eq!(
            ProfileSource::Unknown.combine(ProfileSource::Profiled),
            ProfileSource::Profiled
        );
        assert_eq!(
            ProfileSource::Inferred.combine(ProfileSource::Unknown),
            ProfileSource::Inferred
        );
    }

    #[test]
    fn test_profile_source_combine_mixed() {
        assert_eq!(
            ProfileSource::Profiled.combine(ProfileSource::Inferred),
            ProfileSource::Combined
        );
        assert_eq!(
            ProfileSource::Combined.combine(ProfileSource::Profiled),
            ProfileSource::Combined
        );
        assert_eq!(
            ProfileSource::Profiled.combine(ProfileSource::Profiled),
            ProfileSource::Profiled
        );
    }

    #[test]
    fn test_profile_source_combine_commutative() {
        let sources = [
            ProfileSource::Unknown,
            ProfileSource::Inferred,
            ProfileSource::Profiled,
            ProfileSource::Combined,
        ];
        for a in sources {
            for b in sources {
                assert_eq!(a.combine(b), b.combine(a));
            }
        }
    }

    #[test]
    fn test_kind_classification() {
        assert!(InstKind::Start.is_begin());
        assert!(InstKind::LoopExit {
            loop_begin: InstId::new(0)
        }
        .is_begin());
        assert!(InstKind::Return.is_terminator());
        assert!(InstKind::Return.is_sink());
        assert!(!InstKind::Fixed.is_begin());
        assert!(!InstKind::Fixed.is_terminator());
    }
}
