//! Shared utility infrastructure.
//!
//! Small, self-contained building blocks used across the analysis engine:
//!
//! - [`BitSet`] - Dense bit vector for visited-tracking in graph walks
//! - [`CompilationAlarm`] - Cooperative watchdog for long-running compilations

mod alarm;
mod bitset;

pub use alarm::CompilationAlarm;
pub use bitset::BitSet;
