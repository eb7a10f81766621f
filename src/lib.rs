// Copyright 2026 irflow contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # irflow
//!
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/irflow/blob/main/LICENSE)
//!
//! Control-flow-graph construction and analysis for an optimizing compiler
//! mid-tier IR. `irflow` takes the fixed-node skeleton of an instruction
//! graph and produces basic blocks in a loop-aware reverse post order,
//! dominator and postdominator trees, a natural-loop forest and relative
//! execution frequency estimates derived from static branch probabilities.
//!
//! ## Features
//!
//! - **Loop-aware block order** - one reverse post order serves every
//!   analysis; inner loops are emitted contiguously before their enclosing
//!   loops finish
//! - **Single-pass analyses** - dominators, postdominators and frequencies
//!   each run in one sweep over the order, no fixed-point iteration
//! - **O(1) dominance queries** - a pre-order interval numbering collapses
//!   "does A dominate B" to two integer comparisons
//! - **Two-pass frequency analysis** - loop multipliers are computed locally
//!   per loop, then composed outward, with all values clamped into a range
//!   where products cannot overflow
//! - **Additive builds** - analyses are requested by flag, computed at most
//!   once, and extended in place on cache hits
//! - **Self-verifying** - a structural verifier re-derives every promised
//!   invariant after each debug build
//!
//! ## Quick Start
//!
//! Add `irflow` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! irflow = "0.2"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust
//! use irflow::prelude::*;
//!
//! # fn main() -> irflow::Result<()> {
//! let mut g = InstGraph::new();
//! let start = g.add_start();
//! let then_arm = g.add_begin();
//! let else_arm = g.add_begin();
//! g.append_control_split(start, vec![(then_arm, 0.5), (else_arm, 0.5)], ProfileSource::Profiled);
//! let merge = g.add_merge();
//! g.append_end(then_arm, merge);
//! g.append_end(else_arm, merge);
//! g.append_return(merge);
//!
//! let cfg = ControlFlowGraph::compute(&g, BuildFlags::all(), CfgOptions::default())?;
//! assert_eq!(cfg.block_count(), 4);
//! assert_eq!(cfg.entry_block().postdominator(), cfg.block_for(merge));
//! assert_eq!(cfg.block(BlockId::new(1)).relative_frequency(), 0.5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - the instruction graph input model the engine consumes
//! - [`cfg`] - block identification, ordering and all optional analyses
//! - [`utils`] - the bit set and the cooperative compilation watchdog
//!
//! The engine never mutates the instruction graph; a revision counter on the
//! graph lets the [`cfg::CfgCache`] detect staleness.

pub(crate) mod error;

pub mod cfg;
pub mod ir;
pub mod prelude;
pub mod utils;

/// Convenience `Result` type alias for this crate, using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
