//! # irflow Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! and traits of the library. Import this module to get quick access to graph
//! construction and CFG analysis in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all engine operations
pub use crate::Error;

/// The result type used throughout the engine
pub use crate::Result;

// ================================================================================================
// Instruction Graph Input Model
// ================================================================================================

/// The instruction graph arena and its node identifiers
pub use crate::ir::{InstGraph, InstId, InstKind};

/// Abstract memory effects and branch probability provenance
pub use crate::ir::{LocationId, MemoryKill, ProfileSource};

// ================================================================================================
// Control Flow Graph
// ================================================================================================

/// Main entry point for CFG construction
pub use crate::cfg::ControlFlowGraph;

/// Build configuration and the per-compilation-unit cache
pub use crate::cfg::{BuildFlags, CfgCache, CfgOptions};

/// Blocks and the dense block/loop identifiers
pub use crate::cfg::{BasicBlock, BlockId, LoopId};

/// The natural-loop forest and aggregated memory effects
pub use crate::cfg::{KillSet, Loop};

/// Dominator-tree traversal callback seam
pub use crate::cfg::RecursiveVisitor;

// ================================================================================================
// Watchdog
// ================================================================================================

/// Cooperative watchdog for bounding analysis time
pub use crate::utils::CompilationAlarm;
