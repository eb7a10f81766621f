use thiserror::Error;

macro_rules! inconsistency {
    // Single string version
    ($msg:expr) => {
        $crate::Error::Inconsistency {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::Inconsistency {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

pub(crate) use inconsistency;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The taxonomy follows the compilation-unit error model: retryable bailouts
/// that tell the caller to abandon (and possibly retry) the whole compilation,
/// fatal internal-consistency defects that indicate a bug in the compiler
/// itself, and plain malformed-input conditions.
///
/// # Error Categories
///
/// ## Retryable conditions
/// - [`Error::Bailout`] - The compilation should be abandoned and may be
///   retried under different settings (graph too large, watchdog expired).
///
/// ## Fatal defects
/// - [`Error::Inconsistency`] - A structural invariant of the CFG, dominator
///   tree, loop forest or frequency data was violated. This is a defect in
///   the analysis engine or its input construction, not in user input.
///
/// ## Input errors
/// - [`Error::GraphError`] - The instruction graph handed to the engine is
///   malformed (disconnected control flow, dangling references).
///
/// # Examples
///
/// ```rust
/// use irflow::{Error, ir::InstGraph, cfg::{ControlFlowGraph, BuildFlags, CfgOptions}};
///
/// let graph = InstGraph::new();
/// match ControlFlowGraph::compute(&graph, BuildFlags::all(), CfgOptions::default()) {
///     Ok(cfg) => println!("{} blocks", cfg.block_count()),
///     Err(Error::Bailout { message }) => eprintln!("retryable: {}", message),
///     Err(Error::Inconsistency { message, file, line }) => {
///         eprintln!("compiler defect: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The compilation unit should be abandoned and retried under different
    /// settings.
    ///
    /// Raised when the instruction graph exceeds the maximum supported block
    /// count or when the cooperative compilation watchdog detects a stuck or
    /// slow traversal. Never indicates a defect in the engine; callers are
    /// expected to give up on this compilation attempt rather than retry
    /// immediately.
    #[error("Bailout - {message}")]
    Bailout {
        /// Description of the condition that triggered the bailout
        message: String,
    },

    /// A structural invariant of the computed CFG was violated.
    ///
    /// This is a fatal defect in the analysis engine (or in the pass that
    /// mutated the graph underneath it), carrying the source location where
    /// the violation was detected. It aborts the current compilation only,
    /// never the host process. Most of these checks are active only in
    /// debug/assertion-enabled builds.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description, including offending block/loop ids
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Inconsistency - {file}:{line}: {message}")]
    Inconsistency {
        /// The message to be printed for the Inconsistency error
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },

    /// The input instruction graph is malformed.
    ///
    /// Covers shape errors detected before or during block identification:
    /// disconnected control flow, a begin marker without a predecessor that
    /// is neither the start nor a merge, dangling successor references.
    #[error("{0}")]
    GraphError(String),
}
