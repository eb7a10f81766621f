//! Block identification and loop-aware reverse post order.
//!
//! This pass partitions the instruction graph into basic blocks and assigns
//! block ids in a reverse post order with one extra guarantee on top of the
//! textbook definition: a loop is *fully closed* (all of its backedge blocks
//! and all predecessors of its exit markers are emitted) before any of its
//! exit blocks, and therefore before any code dominated by those exits. Many
//! valid reverse post orders do not have this property, but the two-pass
//! frequency analysis depends on it: it lets a single linear sweep compute
//! local loop frequencies for inner loops before the enclosing loop's own
//! backedge frequencies are needed.
//!
//! The traversal is an explicit-stack walk. Merge blocks are pushed only
//! once all of their forward ends have been seen; loop-exit markers are
//! *stalled* (counted against the owning loop's open record, but not pushed)
//! until that loop reports all backedges and all exit predecessors visited,
//! at which point every exit of the loop is drained at once, in the order the
//! header declares them.

use smallvec::SmallVec;

use crate::{
    cfg::block::{BasicBlock, BlockId, LAST_VALID_BLOCK_INDEX},
    ir::{InstGraph, InstId, InstKind},
    utils::CompilationAlarm,
    Error, Result,
};

/// A block before ids are assigned: begin/end nodes plus successor edges as
/// indices into the proto array.
struct ProtoBlock {
    begin: InstId,
    end: InstId,
    succs: SmallVec<[usize; 2]>,
    probabilities: SmallVec<[f64; 2]>,
}

/// Tracking record for a loop whose header has been emitted but whose body
/// is not yet fully visited.
struct OpenLoop {
    header: InstId,
    ends_seen: usize,
    exits_seen: usize,
}

/// Partitions `graph` into basic blocks and returns them in loop-aware
/// reverse post order, together with the node-to-block map.
///
/// # Errors
///
/// Returns [`Error::Bailout`] if the graph has more begin markers than
/// [`LAST_VALID_BLOCK_INDEX`], and [`Error::GraphError`] for malformed
/// shapes: a missing start node, dangling next links, ends targeting
/// non-join nodes, or control flow the traversal cannot reach.
pub(crate) fn identify_blocks(
    graph: &InstGraph,
    alarm: &CompilationAlarm,
) -> Result<(Vec<BasicBlock>, Vec<Option<BlockId>>)> {
    let start = graph
        .start()
        .ok_or_else(|| Error::GraphError("instruction graph has no start node".to_string()))?;

    let (protos, proto_of) = identify_proto_blocks(graph, alarm)?;
    let order = reverse_post_order(graph, alarm, &protos, &proto_of, proto_of[start.index()])?;
    finalize(graph, alarm, protos, order)
}

/// Walks every begin marker's chain of next links to find its block-ending
/// node and derives the successor edges from the end node's shape.
fn identify_proto_blocks(
    graph: &InstGraph,
    alarm: &CompilationAlarm,
) -> Result<(Vec<ProtoBlock>, Vec<usize>)> {
    let mut protos: Vec<ProtoBlock> = Vec::with_capacity(graph.begin_count());
    // Maps a begin marker's node index to its proto index; unused slots stay
    // usize::MAX and are never read.
    let mut proto_of = vec![usize::MAX; graph.len()];

    for id in graph.ids() {
        if !graph.kind(id).is_begin() {
            continue;
        }
        if protos.len() > LAST_VALID_BLOCK_INDEX {
            return Err(Error::Bailout {
                message: format!(
                    "graph too large to compile in reasonable time: more than {LAST_VALID_BLOCK_INDEX} basic blocks"
                ),
            });
        }
        proto_of[id.index()] = protos.len();
        let end = find_block_end(graph, alarm, id)?;
        protos.push(ProtoBlock {
            begin: id,
            end,
            succs: SmallVec::new(),
            probabilities: SmallVec::new(),
        });
    }

    // Successor edges need the complete begin-to-proto map, so wire them in a
    // second sweep.
    for i in 0..protos.len() {
        let end = protos[i].end;
        let mut succs = SmallVec::new();
        let mut probabilities = SmallVec::new();
        match graph.kind(end) {
            InstKind::End { target } | InstKind::LoopEnd { loop_begin: target } => {
                succs.push(lookup_begin(graph, &proto_of, *target)?);
                probabilities.push(1.0);
            }
            InstKind::ControlSplit {
                successors,
                probabilities: probs,
                ..
            } => {
                for (arm, p) in successors.iter().zip(probs) {
                    succs.push(lookup_begin(graph, &proto_of, *arm)?);
                    probabilities.push(*p);
                }
            }
            InstKind::Return | InstKind::Deopt => {}
            _ => {
                // Sequential fall-through into the next begin marker.
                let next = graph.next(end).ok_or_else(|| {
                    Error::GraphError(format!("block ending at {end} has no terminator"))
                })?;
                succs.push(lookup_begin(graph, &proto_of, next)?);
                probabilities.push(1.0);
            }
        }
        protos[i].succs = succs;
        protos[i].probabilities = probabilities;
    }

    Ok((protos, proto_of))
}

fn lookup_begin(graph: &InstGraph, proto_of: &[usize], target: InstId) -> Result<usize> {
    if !graph.kind(target).is_begin() {
        return Err(Error::GraphError(format!(
            "control edge targets {target}, which is not a begin marker"
        )));
    }
    Ok(proto_of[target.index()])
}

fn find_block_end(graph: &InstGraph, alarm: &CompilationAlarm, begin: InstId) -> Result<InstId> {
    let mut cur = begin;
    loop {
        alarm.check_progress()?;
        if graph.kind(cur).is_terminator() {
            return Ok(cur);
        }
        match graph.next(cur) {
            Some(next) if graph.kind(next).is_begin() => return Ok(cur),
            Some(next) => cur = next,
            None => {
                return Err(Error::GraphError(format!(
                    "dangling control flow: {cur} has neither a successor nor a terminator"
                )))
            }
        }
    }
}

/// The stalling traversal described in the module docs. Returns proto
/// indices in emission order.
fn reverse_post_order(
    graph: &InstGraph,
    alarm: &CompilationAlarm,
    protos: &[ProtoBlock],
    proto_of: &[usize],
    start: usize,
) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(protos.len());
    let mut stack = vec![start];
    let mut open_loops: Vec<OpenLoop> = Vec::new();
    // Per join node, how many of its forward ends have been visited.
    let mut ends_seen = vec![0_usize; graph.len()];

    while let Some(p) = stack.pop() {
        alarm.check_progress()?;
        order.push(p);

        if let InstKind::LoopBegin { .. } = graph.kind(protos[p].begin) {
            open_loops.push(OpenLoop {
                header: protos[p].begin,
                ends_seen: 0,
                exits_seen: 0,
            });
        }

        if let InstKind::LoopEnd { loop_begin } = graph.kind(protos[p].end) {
            record_loop_end(graph, protos, proto_of, &mut open_loops, &mut stack, *loop_begin)?;
            continue;
        }

        // Push successors in reverse branch order so the first branch is
        // processed first.
        for i in (0..protos[p].succs.len()).rev() {
            let s = protos[p].succs[i];
            let target = protos[s].begin;
            match graph.kind(target) {
                InstKind::Merge { forward_ends }
                | InstKind::LoopBegin { forward_ends, .. } => {
                    ends_seen[target.index()] += 1;
                    if ends_seen[target.index()] == forward_ends.len() {
                        stack.push(s);
                    }
                }
                InstKind::LoopExit { loop_begin } => {
                    record_loop_exit(graph, protos, proto_of, &mut open_loops, &mut stack, *loop_begin)?;
                }
                _ => stack.push(s),
            }
        }
    }

    if order.len() != protos.len() {
        return Err(Error::GraphError(format!(
            "unreachable control flow: only {} of {} blocks reached from the start node",
            order.len(),
            protos.len()
        )));
    }
    if !open_loops.is_empty() {
        return Err(Error::GraphError(format!(
            "{} loops never fully closed during traversal",
            open_loops.len()
        )));
    }
    Ok(order)
}

fn record_loop_end(
    graph: &InstGraph,
    protos: &[ProtoBlock],
    proto_of: &[usize],
    open_loops: &mut Vec<OpenLoop>,
    stack: &mut Vec<usize>,
    header: InstId,
) -> Result<()> {
    let index = find_open_loop(open_loops, header)?;
    open_loops[index].ends_seen += 1;
    maybe_close_loop(graph, protos, proto_of, open_loops, stack, index);
    Ok(())
}

fn record_loop_exit(
    graph: &InstGraph,
    protos: &[ProtoBlock],
    proto_of: &[usize],
    open_loops: &mut Vec<OpenLoop>,
    stack: &mut Vec<usize>,
    header: InstId,
) -> Result<()> {
    let index = find_open_loop(open_loops, header)?;
    open_loops[index].exits_seen += 1;
    maybe_close_loop(graph, protos, proto_of, open_loops, stack, index);
    Ok(())
}

fn find_open_loop(open_loops: &[OpenLoop], header: InstId) -> Result<usize> {
    open_loops
        .iter()
        .rposition(|l| l.header == header)
        .ok_or_else(|| {
            Error::GraphError(format!(
                "loop structure of header {header} reached outside its loop"
            ))
        })
}

/// If the loop's record reports all backedges and all exit predecessors
/// visited, removes the record and drains the loop's stalled exits onto the
/// work stack, preserving the header's declared exit order.
fn maybe_close_loop(
    graph: &InstGraph,
    protos: &[ProtoBlock],
    proto_of: &[usize],
    open_loops: &mut Vec<OpenLoop>,
    stack: &mut Vec<usize>,
    index: usize,
) {
    let record = &open_loops[index];
    let header = record.header;
    if record.ends_seen < graph.loop_ends(header).len()
        || record.exits_seen < graph.loop_exits(header).len()
    {
        return;
    }
    open_loops.remove(index);
    for &exit in graph.loop_exits(header).iter().rev() {
        let p = proto_of[exit.index()];
        debug_assert_eq!(protos[p].begin, exit);
        stack.push(p);
    }
}

/// Turns the ordered proto blocks into the final block array: assigns ids by
/// order position, remaps edges, wires predecessor lists and fills the
/// node-to-block map.
fn finalize(
    graph: &InstGraph,
    alarm: &CompilationAlarm,
    protos: Vec<ProtoBlock>,
    order: Vec<usize>,
) -> Result<(Vec<BasicBlock>, Vec<Option<BlockId>>)> {
    let mut id_of = vec![BlockId::ENTRY; protos.len()];
    for (position, &p) in order.iter().enumerate() {
        id_of[p] = BlockId::new(position);
    }

    let mut blocks: Vec<BasicBlock> = Vec::with_capacity(protos.len());
    for (position, &p) in order.iter().enumerate() {
        let proto = &protos[p];
        let mut block = BasicBlock::new(BlockId::new(position), proto.begin, proto.end);
        block.succs = proto.succs.iter().map(|&s| id_of[s]).collect();
        block.succ_probabilities = proto.probabilities.clone();
        block.is_loop_header = matches!(graph.kind(proto.begin), InstKind::LoopBegin { .. });
        block.is_loop_end = matches!(graph.kind(proto.end), InstKind::LoopEnd { .. });
        blocks.push(block);
    }

    // Predecessors in ascending id order; backedge predecessors naturally
    // land last.
    for i in 0..blocks.len() {
        let id = blocks[i].id;
        for j in 0..blocks[i].succs.len() {
            let s = blocks[i].succs[j];
            blocks[s.index()].preds.push(id);
        }
    }

    let mut node_to_block = vec![None; graph.len()];
    for block in &blocks {
        let mut cur = block.begin;
        loop {
            alarm.check_progress()?;
            node_to_block[cur.index()] = Some(block.id);
            if cur == block.end {
                break;
            }
            match graph.next(cur) {
                Some(next) => cur = next,
                None => {
                    return Err(Error::GraphError(format!(
                        "dangling control flow inside {block}"
                    )))
                }
            }
        }
    }

    Ok((blocks, node_to_block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ProfileSource;

    fn order_of(graph: &InstGraph) -> Vec<BasicBlock> {
        let alarm = CompilationAlarm::unbounded();
        identify_blocks(graph, &alarm).unwrap().0
    }

    #[test]
    fn test_linear_graph_single_block() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let f = g.append_fixed(start);
        g.append_return(f);

        let blocks = order_of(&g);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].begin_inst(), start);
        assert!(blocks[0].successors().is_empty());
        assert!(blocks[0].predecessors().is_empty());
    }

    #[test]
    fn test_diamond_order_and_edges() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
        let merge = g.add_merge();
        g.append_end(a, merge);
        g.append_end(b, merge);
        g.append_return(merge);

        let blocks = order_of(&g);
        assert_eq!(blocks.len(), 4);
        // Entry first, merge last, both arms in between.
        assert_eq!(blocks[0].begin_inst(), start);
        assert_eq!(blocks[3].begin_inst(), merge);
        assert_eq!(blocks[0].successors(), &[BlockId::new(1), BlockId::new(2)]);
        assert_eq!(blocks[0].successor_probability(0), 0.5);
        assert_eq!(blocks[3].predecessors(), &[BlockId::new(1), BlockId::new(2)]);
    }

    #[test]
    fn test_loop_exits_drained_after_body() {
        // entry -> header; header splits into body (loop end) and an exit
        // marker followed by a return.
        let mut g = InstGraph::new();
        let start = g.add_start();
        let lb = g.add_loop_begin();
        g.append_end(start, lb);
        let body = g.add_begin();
        let exit = g.add_loop_exit(lb);
        g.append_control_split(lb, vec![(body, 0.9), (exit, 0.1)], ProfileSource::Profiled);
        g.append_loop_end(body, lb);
        g.append_return(exit);

        let blocks = order_of(&g);
        assert_eq!(blocks.len(), 4);
        let header = blocks.iter().find(|b| b.is_loop_header()).unwrap();
        let end = blocks.iter().find(|b| b.is_loop_end()).unwrap();
        let exit_block = blocks.iter().find(|b| b.begin_inst() == exit).unwrap();
        // The backedge block precedes the exit block; the backedge is the
        // only edge where the predecessor id exceeds the successor id.
        assert!(end.id() < exit_block.id());
        assert!(header.id() < end.id());
        assert_eq!(end.successors(), &[header.id()]);
    }

    #[test]
    fn test_inner_loop_closes_before_outer_exit() {
        // Outer loop containing an inner loop; the outer exit must come after
        // everything in both loop bodies. The inner exit doubles as the outer
        // backedge block.
        let mut g = InstGraph::new();
        let start = g.add_start();
        let outer = g.add_loop_begin();
        g.append_end(start, outer);
        let into_inner = g.add_begin();
        let outer_exit = g.add_loop_exit(outer);
        g.append_control_split(
            outer,
            vec![(into_inner, 0.9), (outer_exit, 0.1)],
            ProfileSource::Inferred,
        );
        let inner = g.add_loop_begin();
        g.append_end(into_inner, inner);
        let inner_body = g.add_begin();
        let inner_exit = g.add_loop_exit(inner);
        g.append_control_split(
            inner,
            vec![(inner_body, 0.8), (inner_exit, 0.2)],
            ProfileSource::Inferred,
        );
        g.append_loop_end(inner_body, inner);
        g.append_loop_end(inner_exit, outer);
        g.append_return(outer_exit);

        let blocks = order_of(&g);
        let outer_exit_block = blocks.iter().find(|b| b.begin_inst() == outer_exit).unwrap();
        let inner_blocks: Vec<_> = blocks
            .iter()
            .filter(|b| b.begin_inst() == inner || b.begin_inst() == inner_body)
            .collect();
        for b in inner_blocks {
            assert!(
                b.id() < outer_exit_block.id(),
                "{b} must precede the outer exit {outer_exit_block}"
            );
        }
        assert_eq!(outer_exit_block.id().index(), blocks.len() - 1);
    }

    #[test]
    fn test_too_many_blocks_bails_out() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let mut cur = start;
        for _ in 0..=LAST_VALID_BLOCK_INDEX {
            let next = g.add_begin();
            g.set_fall_through(cur, next);
            cur = next;
        }
        g.append_return(cur);

        let alarm = CompilationAlarm::unbounded();
        let err = identify_blocks(&g, &alarm).unwrap_err();
        assert!(matches!(err, Error::Bailout { .. }));
    }

    #[test]
    fn test_missing_start_is_graph_error() {
        let g = InstGraph::new();
        let alarm = CompilationAlarm::unbounded();
        assert!(matches!(
            identify_blocks(&g, &alarm),
            Err(Error::GraphError(_))
        ));
    }
}
