//! Instruction graph input model.
//!
//! The CFG engine consumes a directed graph of instruction nodes rather than
//! raw bytes: [`InstGraph`] is a dense arena of [`InstKind`] nodes linked by
//! intra-block `next` edges and typed end-node edges (merges, loop
//! backedges, control splits). Front ends and tests assemble graphs through
//! the arena's builder methods; the engine only reads them.

mod graph;
mod node;

pub use graph::InstGraph;
pub use node::{InstId, InstKind, LocationId, MemoryKill, ProfileSource};
