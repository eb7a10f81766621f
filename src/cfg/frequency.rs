//! Two-pass relative execution frequency analysis.
//!
//! Frequency is "expected executions of this block per one execution of the
//! entry", derived purely from static branch probabilities. The difficulty is
//! loops: a loop's multiplier depends on its backedge or exit frequencies,
//! which in turn depend on inner loops. Instead of iterating to a fixed
//! point, the analysis exploits the loop-aware reverse post order:
//!
//! 1. **Local pass** — walk the order once, treating every loop header as if
//!    it had frequency 1 (no dominating code). When a loop closes, its local
//!    frequency is `1 / exitSum` (or `1 / (1 - endSum)` in the end-based
//!    debug mode) and its exit blocks are rescaled against the loop's
//!    forward-entry frequency. Inner loops close before outer ones, so one
//!    sweep suffices.
//! 2. **Global pass** — reset everything to 0 and walk the order again with
//!    the same accumulation rule, except a loop header now multiplies its
//!    forward-entry sum by the cached local frequency. This composes nested
//!    multipliers with the enclosing code's frequency.
//!
//! All values are clamped into `[MIN_RELATIVE_FREQUENCY,
//! MAX_RELATIVE_FREQUENCY]` so that multiplying two in-range values can
//! never overflow a double.

use crate::{
    cfg::{block::BlockId, builder::ControlFlowGraph},
    error::inconsistency,
    ir::{InstGraph, InstId, InstKind, ProfileSource},
    Result,
};

/// Smallest representable relative frequency, 2^-500 (`0x1.0p-500`). Chosen
/// well below half of a double's exponent range so products of two in-range
/// values stay finite.
pub const MIN_RELATIVE_FREQUENCY: f64 = 3.054936363499605e-151;

/// Largest representable relative frequency, 2^500, the reciprocal of
/// [`MIN_RELATIVE_FREQUENCY`]. Assigned to effectively endless loops.
pub const MAX_RELATIVE_FREQUENCY: f64 = 3.273390607896142e150;

/// Multiplies two relative frequencies and clamps the product into
/// `[MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY]`.
///
/// # Errors
///
/// Returns [`Error::Inconsistency`](crate::Error::Inconsistency) if either
/// input is NaN or infinite; frequencies are clamped at every step, so a
/// non-finite value can only mean a defect upstream.
pub fn multiply_relative_frequencies(a: f64, b: f64) -> Result<f64> {
    if !a.is_finite() || !b.is_finite() {
        return Err(inconsistency!(
            "non-finite relative frequency operands {a} * {b}"
        ));
    }
    Ok((a * b).clamp(MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY))
}

/// A loop's local frequency (its iteration-count estimate as if no code
/// dominated it) together with the provenance of the probabilities it was
/// derived from. Cached per loop header, recomputable, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopFrequencyData {
    frequency: f64,
    source: ProfileSource,
}

impl LoopFrequencyData {
    /// Creates a record; the frequency is clamped into the valid range.
    #[must_use]
    pub fn new(frequency: f64, source: ProfileSource) -> Self {
        Self {
            frequency: frequency.clamp(MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY),
            source,
        }
    }

    /// Returns the local loop frequency, always ≥ some positive minimum.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Returns the provenance of the frequency value.
    #[must_use]
    pub fn source(&self) -> ProfileSource {
        self.source
    }
}

/// A recorded disagreement between the end-based and exit-based local loop
/// frequency estimates, kept when
/// [`CfgOptions::record_frequency_divergence`](crate::cfg::CfgOptions::record_frequency_divergence)
/// is set. Large divergence usually means missing profile data inside the
/// loop body; it never alters computed results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyDivergence {
    /// The loop's header block.
    pub header: BlockId,
    /// Local frequency estimated from loop-exit frequencies.
    pub exit_based_frequency: f64,
    /// Local frequency estimated from backedge frequencies.
    pub end_based_frequency: f64,
    /// Sum of the exit blocks' local frequencies.
    pub exit_frequency_sum: f64,
    /// Sum of the backedge blocks' local frequencies.
    pub end_frequency_sum: f64,
    /// Sum of control-sink frequencies inside the loop body, 0 for any sink
    /// not yet visited when the loop closed.
    pub sink_frequency_sum: f64,
}

/// Tracking record for one loop while the linear sweep is inside its body.
struct OpenLoop {
    header: InstId,
    ends_visited: usize,
    exits_visited: usize,
}

impl OpenLoop {
    fn fully_processed(&self, graph: &InstGraph) -> bool {
        self.all_ends_visited(graph)
            && self.exits_visited == graph.loop_exits(self.header).len()
    }

    fn all_ends_visited(&self, graph: &InstGraph) -> bool {
        self.ends_visited == graph.loop_ends(self.header).len()
    }
}

/// Replays the block order linearly, invoking `per_block` for every block
/// and `loop_closed` exactly when a loop's last backedge or exit has been
/// seen. Doubles as the verification that the order really closes inner
/// loops before outer ones; a violation is an
/// [`Error::Inconsistency`](crate::Error::Inconsistency).
///
/// Exit markers and backedges are not always on separate blocks in a graph
/// that is not fully canonicalized: a single block can exit an inner loop and
/// end an outer one. Such blocks are matched against the right open record by
/// searching the stack instead of insisting on the top.
pub(crate) fn rpo_inner_loops_first<B, L>(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    mut per_block: B,
    mut loop_closed: L,
) -> Result<()>
where
    B: FnMut(&mut ControlFlowGraph, BlockId) -> Result<()>,
    L: FnMut(&mut ControlFlowGraph, InstId) -> Result<()>,
{
    let mut open_loops: Vec<OpenLoop> = Vec::new();

    for i in 0..cfg.blocks.len() {
        cfg.options.alarm.check_progress()?;
        let block = cfg.blocks[i].id;
        if cfg.blocks[i].is_loop_header {
            open_loops.push(OpenLoop {
                header: cfg.blocks[i].begin,
                ends_visited: 0,
                exits_visited: 0,
            });
        }

        per_block(cfg, block)?;

        let mut was_exit = predecessor_block_sequential_loop_exit(cfg, graph, block)?;

        if let InstKind::LoopExit { loop_begin } = graph.kind(cfg.blocks[i].begin) {
            let record = open_loops
                .last_mut()
                .ok_or_else(|| inconsistency!("exit block {block} outside any open loop"))?;
            if record.header != *loop_begin {
                return Err(inconsistency!(
                    "inner loops must close first: open loop {} but {block} exits {}",
                    record.header,
                    loop_begin
                ));
            }
            if !record.all_ends_visited(graph) {
                return Err(inconsistency!(
                    "loop ends must be visited before exits; the reverse post order is corrupt at {block}"
                ));
            }
            record.exits_visited += 1;
            if record.fully_processed(graph) {
                let header = record.header;
                open_loops.pop();
                loop_closed(cfg, header)?;
            }
            was_exit = true;
        }

        if cfg.blocks[i].is_loop_end {
            let header = match graph.kind(cfg.blocks[i].end) {
                InstKind::LoopEnd { loop_begin } => *loop_begin,
                other => {
                    return Err(inconsistency!(
                        "loop-end block {block} ends in {other} instead of a backedge"
                    ))
                }
            };
            let index = if was_exit {
                // The exit-then-outer-end block: search downward for the
                // ended loop's record.
                open_loops
                    .iter()
                    .rposition(|r| r.header == header)
                    .ok_or_else(|| {
                        inconsistency!("backedge block {block} targets a loop that is not open")
                    })?
            } else {
                open_loops
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| inconsistency!("backedge block {block} outside any open loop"))?
            };
            if open_loops[index].header != header {
                return Err(inconsistency!(
                    "inner loops must close first: open loop {} but {block} ends {}",
                    open_loops[index].header,
                    header
                ));
            }
            open_loops[index].ends_visited += 1;
            if open_loops[index].fully_processed(graph) {
                open_loops.remove(index);
                loop_closed(cfg, header)?;
            }
        }
    }

    if !open_loops.is_empty() {
        return Err(inconsistency!(
            "{} loops left unfinished by the block order",
            open_loops.len()
        ));
    }
    Ok(())
}

/// Returns `true` if a chain of single-successor predecessors of `block`
/// starts at a loop-exit marker. Happens in not-fully-canonicalized graphs
/// where an inner-loop exit runs sequentially into an outer-loop end.
fn predecessor_block_sequential_loop_exit(
    cfg: &ControlFlowGraph,
    graph: &InstGraph,
    block: BlockId,
) -> Result<bool> {
    let mut cur = block;
    loop {
        cfg.options.alarm.check_progress()?;
        let preds = &cfg.blocks[cur.index()].preds;
        if preds.len() != 1 {
            return Ok(false);
        }
        let pred = preds[0];
        if cfg.blocks[pred.index()].succs.len() != 1 {
            return Ok(false);
        }
        if matches!(
            graph.kind(cfg.blocks[pred.index()].begin),
            InstKind::LoopExit { .. }
        ) {
            return Ok(true);
        }
        cur = pred;
    }
}

/// Replays the order with no block action; used after the dominator pass to
/// assert the inner-loops-first property in debug builds.
pub(crate) fn verify_rpo_inner_loops_first(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
) -> Result<()> {
    rpo_inner_loops_first(cfg, graph, |_, _| Ok(()), |_, _| Ok(()))
}

pub(crate) fn compute_frequencies(cfg: &mut ControlFlowGraph, graph: &InstGraph) -> Result<()> {
    cfg.local_loop_frequencies.clear();
    cfg.divergences.clear();

    // Pass 1: local loop frequencies, inner loops first.
    rpo_inner_loops_first(
        cfg,
        graph,
        |cfg, b| per_basic_block_frequency_action(cfg, graph, b, true),
        |cfg, lb| finish_local_loop_frequency(cfg, graph, lb),
    )?;

    for block in &mut cfg.blocks {
        block.relative_frequency = 0.0;
    }

    // Pass 2: propagate outer frequencies through the cached local loop
    // frequencies.
    for i in 0..cfg.blocks.len() {
        per_basic_block_frequency_action(cfg, graph, BlockId::new(i), false)?;
    }

    if cfg!(debug_assertions) {
        for block in &cfg.blocks {
            debug_assert!(
                block.relative_frequency >= 0.0,
                "{block} has no frequency set"
            );
        }
    }
    Ok(())
}

/// The shared per-block accumulation rule of both passes. `computing_local`
/// selects the loop-header behavior (reset to 1 vs. multiply by the cached
/// local frequency) and whether provenance tags are tracked.
fn per_basic_block_frequency_action(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    block: BlockId,
    computing_local: bool,
) -> Result<()> {
    let i = block.index();
    let mut source = ProfileSource::Unknown;
    let mut relative_frequency;

    let pred_count = cfg.blocks[i].preds.len();
    if pred_count == 0 {
        relative_frequency = 1.0;
    } else if pred_count == 1 {
        let pred = cfg.blocks[i].preds[0];
        relative_frequency = cfg.blocks[pred.index()].relative_frequency;
        if cfg.blocks[pred.index()].succs.len() > 1 {
            let pos = cfg.blocks[pred.index()]
                .succs
                .iter()
                .position(|&s| s == block)
                .ok_or_else(|| {
                    inconsistency!("edge {pred} -> {block} missing from the successor list")
                })?;
            let probability = cfg.blocks[pred.index()].succ_probabilities[pos];
            relative_frequency = multiply_relative_frequencies(relative_frequency, probability)?;
            if computing_local {
                source = graph
                    .split_profile(cfg.blocks[pred.index()].end)
                    .unwrap_or_default();
            }
        }
    } else {
        relative_frequency = 0.0;
        for j in 0..pred_count {
            let pred = cfg.blocks[i].preds[j];
            relative_frequency += cfg.blocks[pred.index()].relative_frequency;
            if computing_local {
                source = source.combine(cfg.blocks[pred.index()].frequency_source);
            }
        }
        if cfg.blocks[i].is_loop_header {
            if computing_local {
                // Local view: pretend no dominating code exists, the loop's
                // own multiplier is computed when it closes.
                relative_frequency = 1.0;
                source = ProfileSource::Unknown;
            } else {
                let begin = cfg.blocks[i].begin;
                let local = cfg
                    .local_loop_frequencies
                    .get(&begin)
                    .ok_or_else(|| {
                        inconsistency!("no cached local frequency for loop header {block}")
                    })?
                    .frequency();
                relative_frequency = multiply_relative_frequencies(relative_frequency, local)?;
            }
        }
    }

    cfg.blocks[i].relative_frequency =
        relative_frequency.clamp(MIN_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY);
    if computing_local {
        cfg.blocks[i].frequency_source = source;
    }
    Ok(())
}

/// Runs when a loop closes during the local pass: computes and caches the
/// local loop frequency, then rescales the exit blocks so that each exit
/// carries its share of the loop's *entry* frequency rather than the raw
/// in-loop estimate.
fn finish_local_loop_frequency(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    lb: InstId,
) -> Result<()> {
    calculate_local_loop_frequency(cfg, graph, lb)?;

    let exits = graph.loop_exits(lb);
    if exits.is_empty() {
        return Ok(());
    }

    let mut exit_frequency_sum = 0.0;
    for &lex in exits {
        exit_frequency_sum += cfg.blocks[exit_block(cfg, lex)?.index()].relative_frequency;
    }

    let forward_ends = graph.forward_ends(lb);
    if forward_ends.len() != 1 {
        return Err(inconsistency!(
            "loop header {lb} must have exactly one forward entry, found {}",
            forward_ends.len()
        ));
    }
    let entry_block = cfg.block_for(forward_ends[0]).ok_or_else(|| {
        inconsistency!("forward entry of loop header {lb} is not in any block")
    })?;
    let loop_pred_frequency = cfg.blocks[entry_block.index()].relative_frequency;

    for &lex in exits {
        let lex_block = exit_block(cfg, lex)?;
        let lex_frequency = cfg.blocks[lex_block.index()].relative_frequency;
        let scale = lex_frequency / exit_frequency_sum;
        let frequency = multiply_relative_frequencies(scale, loop_pred_frequency)?;
        cfg.blocks[lex_block.index()].relative_frequency = frequency;
        if frequency > loop_pred_frequency {
            return Err(inconsistency!(
                "exit frequency {frequency} of {lex_block} exceeds the loop entry frequency {loop_pred_frequency}"
            ));
        }
    }
    Ok(())
}

fn exit_block(cfg: &ControlFlowGraph, lex: InstId) -> Result<BlockId> {
    cfg.block_for(lex)
        .ok_or_else(|| inconsistency!("exit marker {lex} is not in any block"))
}

/// Computes a loop's local frequency from its exit (default) or backedge
/// (debug mode) frequencies and caches it for the global pass.
///
/// The end-based estimate respects control sinks inside the body: a loop
/// whose backedges absorb all frequency is effectively endless and gets the
/// maximum. The exit-based default instead reflects that compiled code only
/// ever leaves a loop through an exit, never through an unwind or deopt.
fn calculate_local_loop_frequency(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    lb: InstId,
) -> Result<f64> {
    let mut source = ProfileSource::Unknown;
    let loop_frequency;

    if cfg.options.use_loop_end_frequencies {
        let mut end_frequency_sum = 0.0;
        for &len in graph.loop_ends(lb) {
            let end = cfg.block_for(len).ok_or_else(|| {
                inconsistency!("backedge node {len} of loop header {lb} is not in any block")
            })?;
            let frequency = cfg.blocks[end.index()].relative_frequency;
            if frequency < 0.0 {
                return Err(inconsistency!(
                    "backedge block {end} closed loop {lb} without a frequency"
                ));
            }
            end_frequency_sum += frequency;
            source = source.combine(cfg.blocks[end.index()].frequency_source);
        }
        let end_frequency_sum = end_frequency_sum.min(1.0).max(MIN_RELATIVE_FREQUENCY);
        if end_frequency_sum == 1.0 {
            // Endless loop, or a loop whose only exits deopt unconditionally.
            loop_frequency = MAX_RELATIVE_FREQUENCY;
        } else {
            loop_frequency = 1.0 / (1.0 - end_frequency_sum);
            if !loop_frequency.is_finite() {
                return Err(inconsistency!(
                    "non-finite end-based frequency for loop {lb}, end sum {end_frequency_sum}"
                ));
            }
        }
    } else {
        let mut exit_frequency_sum = 0.0;
        for &lex in graph.loop_exits(lb) {
            let exit = exit_block(cfg, lex)?;
            let frequency = cfg.blocks[exit.index()].relative_frequency;
            if frequency < 0.0 {
                return Err(inconsistency!(
                    "exit block {exit} closed loop {lb} without a frequency"
                ));
            }
            exit_frequency_sum += frequency;
            source = source.combine(cfg.blocks[exit.index()].frequency_source);
        }
        let exit_frequency_sum = exit_frequency_sum.min(1.0).max(MIN_RELATIVE_FREQUENCY);
        loop_frequency = 1.0 / exit_frequency_sum;
        if !loop_frequency.is_finite() {
            return Err(inconsistency!(
                "non-finite exit-based frequency for loop {lb}, exit sum {exit_frequency_sum}"
            ));
        }

        if cfg.options.record_frequency_divergence {
            record_divergence(cfg, graph, lb, loop_frequency, exit_frequency_sum)?;
        }
    }

    cfg.local_loop_frequencies
        .insert(lb, LoopFrequencyData::new(loop_frequency, source));
    Ok(loop_frequency)
}

/// Computes the end-based counterpart of an exit-based local frequency and
/// records a [`FrequencyDivergence`] when they disagree beyond the
/// configured threshold.
fn record_divergence(
    cfg: &mut ControlFlowGraph,
    graph: &InstGraph,
    lb: InstId,
    exit_based_frequency: f64,
    exit_frequency_sum: f64,
) -> Result<()> {
    let header = cfg.block_for(lb).ok_or_else(|| {
        inconsistency!("loop header node {lb} is not in any block")
    })?;
    let Some(loop_id) = cfg.blocks[header.index()].loop_id else {
        return Ok(());
    };

    // Deopt-only exit paths are inside the loop body but may not be visited
    // yet when the loop closes; their frequency is still the -1 sentinel and
    // is left out of the sink sum.
    let mut sink_frequency_sum = 0.0;
    for &member in &cfg.loops[loop_id.index()].blocks {
        let block = &cfg.blocks[member.index()];
        if graph.kind(block.end).is_sink() && block.relative_frequency >= 0.0 {
            sink_frequency_sum += block.relative_frequency;
        }
    }

    let mut end_frequency_sum = 0.0;
    for &len in graph.loop_ends(lb) {
        if let Some(end) = cfg.block_for(len) {
            end_frequency_sum += cfg.blocks[end.index()].relative_frequency;
        }
    }
    let end_based_frequency = if end_frequency_sum == 1.0 {
        MAX_RELATIVE_FREQUENCY
    } else {
        1.0 / (1.0 - end_frequency_sum)
    };

    let has_exits = !graph.loop_exits(lb).is_empty();
    if has_exits
        && (end_based_frequency - exit_based_frequency).abs() > cfg.options.divergence_threshold
    {
        cfg.divergences.push(FrequencyDivergence {
            header,
            exit_based_frequency,
            end_based_frequency,
            exit_frequency_sum,
            end_frequency_sum,
            sink_frequency_sum,
        });
    }
    Ok(())
}

impl ControlFlowGraph {
    /// Returns the cached local frequency of the loop headed by `lb`, or
    /// `None` if frequencies were not computed or `lb` is not a loop header.
    #[must_use]
    pub fn local_loop_frequency(&self, lb: InstId) -> Option<f64> {
        self.local_loop_frequencies.get(&lb).map(|d| d.frequency())
    }

    /// Returns the provenance of the cached local frequency of the loop
    /// headed by `lb`.
    #[must_use]
    pub fn local_loop_frequency_source(&self, lb: InstId) -> Option<ProfileSource> {
        self.local_loop_frequencies.get(&lb).map(|d| d.source())
    }

    /// Returns the full cached record for the loop headed by `lb`.
    #[must_use]
    pub fn local_loop_frequency_data(&self, lb: InstId) -> Option<LoopFrequencyData> {
        self.local_loop_frequencies.get(&lb).copied()
    }

    /// Rewrites the cached local frequency of the loop headed by `lb`.
    ///
    /// Lets transformation phases record their effect on loop frequencies
    /// without recomputing the CFG. The update is local to this instance and
    /// never persisted: a freshly computed CFG derives its frequencies from
    /// the graph's probabilities again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistency`](crate::Error::Inconsistency) if no
    /// record exists for `lb`.
    pub fn update_local_loop_frequency(
        &mut self,
        lb: InstId,
        updater: impl FnOnce(LoopFrequencyData) -> LoopFrequencyData,
    ) -> Result<()> {
        let data = self.local_loop_frequencies.get_mut(&lb).ok_or_else(|| {
            inconsistency!("no cached local frequency for loop header {lb}")
        })?;
        *data = updater(*data);
        Ok(())
    }

    /// Returns the divergence records collected during the local frequency
    /// pass. Empty unless
    /// [`CfgOptions::record_frequency_divergence`](crate::cfg::CfgOptions::record_frequency_divergence)
    /// was set.
    #[must_use]
    pub fn frequency_divergences(&self) -> &[FrequencyDivergence] {
        &self.divergences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::builder::{BuildFlags, CfgOptions},
        ir::{InstGraph, ProfileSource},
        Error,
    };

    fn compute(g: &InstGraph) -> ControlFlowGraph {
        ControlFlowGraph::compute(g, BuildFlags::all(), CfgOptions::default()).unwrap()
    }

    fn simple_loop(body_probability: f64) -> (InstGraph, InstId) {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let lb = g.add_loop_begin();
        g.append_end(start, lb);
        let body = g.add_begin();
        let exit = g.add_loop_exit(lb);
        g.append_control_split(
            lb,
            vec![(body, body_probability), (exit, 1.0 - body_probability)],
            ProfileSource::Profiled,
        );
        g.append_loop_end(body, lb);
        g.append_return(exit);
        (g, lb)
    }

    #[test]
    fn test_multiply_clamps_and_rejects_non_finite() {
        assert_eq!(multiply_relative_frequencies(2.0, 3.0).unwrap(), 6.0);
        assert_eq!(
            multiply_relative_frequencies(MAX_RELATIVE_FREQUENCY, MAX_RELATIVE_FREQUENCY).unwrap(),
            MAX_RELATIVE_FREQUENCY
        );
        assert_eq!(
            multiply_relative_frequencies(MIN_RELATIVE_FREQUENCY, MIN_RELATIVE_FREQUENCY).unwrap(),
            MIN_RELATIVE_FREQUENCY
        );
        assert!(matches!(
            multiply_relative_frequencies(f64::NAN, 1.0),
            Err(Error::Inconsistency { .. })
        ));
        assert!(matches!(
            multiply_relative_frequencies(1.0, f64::INFINITY),
            Err(Error::Inconsistency { .. })
        ));
    }

    #[test]
    fn test_constants_are_exact_powers_of_two() {
        assert_eq!(MIN_RELATIVE_FREQUENCY, 2.0_f64.powi(-500));
        assert_eq!(MAX_RELATIVE_FREQUENCY, 2.0_f64.powi(500));
        assert_eq!(MIN_RELATIVE_FREQUENCY * MAX_RELATIVE_FREQUENCY, 1.0);
    }

    #[test]
    fn test_diamond_frequencies() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
        let merge = g.add_merge();
        g.append_end(a, merge);
        g.append_end(b, merge);
        g.append_return(merge);

        let cfg = compute(&g);
        assert_eq!(cfg.entry_block().relative_frequency(), 1.0);
        assert_eq!(cfg.blocks()[1].relative_frequency(), 0.5);
        assert_eq!(cfg.blocks()[2].relative_frequency(), 0.5);
        assert_eq!(cfg.blocks()[3].relative_frequency(), 1.0);
    }

    #[test]
    fn test_simple_loop_frequencies() {
        let (g, lb) = simple_loop(0.9);
        let cfg = compute(&g);

        // 10% exit probability per iteration: ten expected iterations.
        let local = cfg.local_loop_frequency(lb).unwrap();
        assert!((local - 10.0).abs() < 1e-9, "local frequency {local}");

        let header = cfg.blocks().iter().find(|b| b.is_loop_header()).unwrap();
        let body = cfg.blocks().iter().find(|b| b.is_loop_end()).unwrap();
        let exit = cfg
            .blocks()
            .iter()
            .find(|b| matches!(g.kind(b.begin_inst()), crate::ir::InstKind::LoopExit { .. }))
            .unwrap();

        assert!((header.relative_frequency() - 10.0).abs() < 1e-9);
        assert!((body.relative_frequency() - 9.0).abs() < 1e-9);
        // The loop is entered once and exited once.
        assert!((exit.relative_frequency() - 1.0).abs() < 1e-9);
        assert_eq!(
            cfg.local_loop_frequency_source(lb),
            Some(ProfileSource::Profiled)
        );
    }

    #[test]
    fn test_end_based_mode_agrees_on_simple_loop() {
        let (g, lb) = simple_loop(0.9);
        let options = CfgOptions {
            use_loop_end_frequencies: true,
            ..CfgOptions::default()
        };
        let cfg = ControlFlowGraph::compute(&g, BuildFlags::all(), options).unwrap();
        let local = cfg.local_loop_frequency(lb).unwrap();
        assert!((local - 10.0).abs() < 1e-9, "end-based local frequency {local}");
    }

    #[test]
    fn test_loop_without_exits_is_endless() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let lb = g.add_loop_begin();
        g.append_end(start, lb);
        let body = g.add_begin();
        g.set_fall_through(lb, body);
        g.append_loop_end(body, lb);

        let cfg = compute(&g);
        assert_eq!(cfg.local_loop_frequency(lb), Some(MAX_RELATIVE_FREQUENCY));
        let header = cfg.blocks().iter().find(|b| b.is_loop_header()).unwrap();
        assert_eq!(header.relative_frequency(), MAX_RELATIVE_FREQUENCY);
    }

    #[test]
    fn test_frequency_bounds_hold_in_nested_endless_loops() {
        // Endless loop inside an endless loop; everything must clamp instead
        // of overflowing.
        let mut g = InstGraph::new();
        let start = g.add_start();
        let outer = g.add_loop_begin();
        g.append_end(start, outer);
        let inner = g.add_loop_begin();
        let to_inner = g.add_begin();
        g.set_fall_through(outer, to_inner);
        g.append_end(to_inner, inner);
        let inner_body = g.add_begin();
        let back_outer = g.add_begin();
        g.append_control_split(
            inner,
            vec![(inner_body, 0.5), (back_outer, 0.5)],
            ProfileSource::Inferred,
        );
        g.append_loop_end(inner_body, inner);
        g.append_loop_end(back_outer, outer);

        let cfg = compute(&g);
        for block in cfg.blocks() {
            let f = block.relative_frequency();
            assert!(f.is_finite());
            assert!((MIN_RELATIVE_FREQUENCY..=MAX_RELATIVE_FREQUENCY).contains(&f));
        }
    }

    #[test]
    fn test_frequency_conservation_outside_loops() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(start, vec![(a, 0.3), (b, 0.7)], ProfileSource::Profiled);
        let c = g.add_begin();
        let d = g.add_begin();
        g.append_control_split(a, vec![(c, 0.5), (d, 0.5)], ProfileSource::Profiled);
        let merge = g.add_merge();
        g.append_end(b, merge);
        g.append_end(c, merge);
        g.append_end(d, merge);
        g.append_return(merge);

        let cfg = compute(&g);
        for block in cfg.blocks() {
            if block.successors().is_empty() {
                continue;
            }
            if block.successors().iter().any(|&s| cfg.block(s).is_loop_header()) {
                continue;
            }
            let succ_sum: f64 = block
                .successors()
                .iter()
                .map(|&s| cfg.block(s).relative_frequency())
                .sum();
            assert!(
                (succ_sum - block.relative_frequency()).abs() < 1e-9,
                "{block}: self {} vs successor sum {succ_sum}",
                block.relative_frequency()
            );
        }
    }

    #[test]
    fn test_update_local_loop_frequency() {
        let (g, lb) = simple_loop(0.9);
        let mut cfg = compute(&g);
        cfg.update_local_loop_frequency(lb, |old| {
            LoopFrequencyData::new(old.frequency() * 2.0, old.source())
        })
        .unwrap();
        let updated = cfg.local_loop_frequency(lb).unwrap();
        assert!((updated - 20.0).abs() < 1e-9);

        let missing = cfg.update_local_loop_frequency(InstId::new(0), |d| d);
        assert!(missing.is_err());
    }

    #[test]
    fn test_divergence_recorded_for_deopt_heavy_loop() {
        // Exit path is cold (1e-6) but the backedge carries only half the
        // frequency because the body deopts half the time: the end-based and
        // exit-based estimates differ wildly.
        let mut g = InstGraph::new();
        let start = g.add_start();
        let lb = g.add_loop_begin();
        g.append_end(start, lb);
        let body = g.add_begin();
        let exit = g.add_loop_exit(lb);
        g.append_control_split(
            lb,
            vec![(body, 1.0 - 1e-6), (exit, 1e-6)],
            ProfileSource::Inferred,
        );
        let cont = g.add_begin();
        let deopt = g.add_begin();
        g.append_control_split(body, vec![(cont, 0.5), (deopt, 0.5)], ProfileSource::Inferred);
        g.append_loop_end(cont, lb);
        g.append_deopt(deopt);
        g.append_return(exit);

        let options = CfgOptions {
            record_frequency_divergence: true,
            divergence_threshold: 100.0,
            ..CfgOptions::default()
        };
        let cfg = ControlFlowGraph::compute(&g, BuildFlags::all(), options).unwrap();
        assert_eq!(cfg.frequency_divergences().len(), 1);
        let d = cfg.frequency_divergences()[0];
        assert!(d.exit_based_frequency > d.end_based_frequency);
        assert!((d.end_based_frequency - 2.0).abs() < 1e-3);
    }
}
