//! Structural CFG verification.
//!
//! Re-derives every invariant the analyses promise, the slow way: edge
//! symmetry by cross-lookup, dominance by breadth-first reachability with the
//! dominator removed, postdominance by chain walking. Runs automatically
//! after every build when debug assertions are on; release callers can invoke
//! it through [`ControlFlowGraph::verify`]. Checks are gated on the flags the
//! instance has actually computed, so a blocks-only CFG is not failed for
//! missing dominators.

use crate::{
    cfg::{
        block::BlockId,
        builder::{BuildFlags, ControlFlowGraph},
        frequency::{MAX_RELATIVE_FREQUENCY, MIN_RELATIVE_FREQUENCY},
    },
    error::inconsistency,
    ir::{InstGraph, InstKind},
    utils::BitSet,
    Result,
};

pub(crate) fn verify(cfg: &ControlFlowGraph, graph: &InstGraph) -> Result<()> {
    verify_blocks(cfg, graph)?;
    if cfg.flags.contains(BuildFlags::CONNECT_BLOCKS) {
        verify_edges(cfg, graph)?;
    }
    if cfg.flags.contains(BuildFlags::FREQUENCIES) {
        verify_frequencies(cfg)?;
    }
    if cfg.flags.contains(BuildFlags::LOOPS) {
        verify_loops(cfg)?;
    }
    if cfg.flags.contains(BuildFlags::DOMINATORS) {
        verify_dominators(cfg)?;
    }
    if cfg.flags.contains(BuildFlags::POSTDOMINATORS) {
        verify_postdominators(cfg)?;
    }
    Ok(())
}

fn verify_blocks(cfg: &ControlFlowGraph, graph: &InstGraph) -> Result<()> {
    if cfg.blocks.is_empty() {
        return Err(inconsistency!("CFG has no blocks"));
    }
    for (i, block) in cfg.blocks.iter().enumerate() {
        if block.id.index() != i {
            return Err(inconsistency!(
                "{} stored at index {i}, ids must be dense",
                block.id
            ));
        }
        if !graph.kind(block.begin).is_begin() {
            return Err(inconsistency!(
                "{block} does not open with a begin marker but {}",
                graph.kind(block.begin)
            ));
        }
        if cfg.block_for(block.begin) != Some(block.id)
            || cfg.block_for(block.end) != Some(block.id)
        {
            return Err(inconsistency!(
                "node-to-block map disagrees with the bounds of {block}"
            ));
        }
    }
    Ok(())
}

fn verify_edges(cfg: &ControlFlowGraph, graph: &InstGraph) -> Result<()> {
    if !cfg.entry_block().preds.is_empty() {
        return Err(inconsistency!("the entry block has predecessors"));
    }
    for block in &cfg.blocks {
        if block.id != BlockId::ENTRY && block.preds.is_empty() {
            return Err(inconsistency!("{block} is not the entry but has no predecessors"));
        }
        if block.succs.len() != block.succ_probabilities.len() {
            return Err(inconsistency!(
                "{block} has {} successors but {} probabilities",
                block.succs.len(),
                block.succ_probabilities.len()
            ));
        }
        let mut probability_sum = 0.0;
        for &p in &block.succ_probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(inconsistency!("{block} carries branch probability {p}"));
            }
            probability_sum += p;
        }
        if !block.succs.is_empty() && (probability_sum - 1.0).abs() > 1e-6 {
            return Err(inconsistency!(
                "branch probabilities of {block} sum to {probability_sum}"
            ));
        }

        for &succ in &block.succs {
            if !cfg.blocks[succ.index()].preds.contains(&block.id) {
                return Err(inconsistency!(
                    "edge {} -> {succ} missing from the predecessor side",
                    block.id
                ));
            }
            let backedge = block.is_loop_end
                && matches!(
                    graph.kind(block.end),
                    InstKind::LoopEnd { loop_begin } if *loop_begin == cfg.blocks[succ.index()].begin
                );
            if backedge {
                if succ > block.id {
                    return Err(inconsistency!(
                        "backedge {} -> {succ} points forward in the order",
                        block.id
                    ));
                }
            } else if succ <= block.id {
                return Err(inconsistency!(
                    "forward edge {} -> {succ} points backward in the order",
                    block.id
                ));
            }
        }
        for &pred in &block.preds {
            if !cfg.blocks[pred.index()].succs.contains(&block.id) {
                return Err(inconsistency!(
                    "edge {pred} -> {} missing from the successor side",
                    block.id
                ));
            }
        }
    }
    Ok(())
}

fn verify_frequencies(cfg: &ControlFlowGraph) -> Result<()> {
    for block in &cfg.blocks {
        let f = block.relative_frequency;
        if !f.is_finite() || !(MIN_RELATIVE_FREQUENCY..=MAX_RELATIVE_FREQUENCY).contains(&f) {
            return Err(inconsistency!("{block} has out-of-range frequency {f}"));
        }
    }
    Ok(())
}

fn verify_loops(cfg: &ControlFlowGraph) -> Result<()> {
    for lp in &cfg.loops {
        let header = &cfg.blocks[lp.header.index()];
        if !header.is_loop_header {
            return Err(inconsistency!("header of {lp} is not a loop header block"));
        }
        if lp.blocks.first() != Some(&lp.header) {
            return Err(inconsistency!("member list of {lp} does not start at the header"));
        }
        if let Some(parent) = lp.parent {
            if cfg.loops[parent.index()].depth + 1 != lp.depth {
                return Err(inconsistency!("nesting depth of {lp} disagrees with its parent"));
            }
            if !cfg.loops[parent.index()].children.contains(&lp.index) {
                return Err(inconsistency!("{lp} is missing from its parent's child list"));
            }
        } else if lp.depth != 1 {
            return Err(inconsistency!("outermost {lp} has depth {}", lp.depth));
        }

        for &member in &lp.blocks {
            if member < lp.header {
                return Err(inconsistency!(
                    "member {member} of {lp} precedes the header in the order"
                ));
            }
            // The member's innermost loop must reach this loop through the
            // parent chain.
            let mut cur = cfg.blocks[member.index()].loop_id;
            loop {
                match cur {
                    Some(l) if l == lp.index => break,
                    Some(l) => cur = cfg.loops[l.index()].parent,
                    None => {
                        return Err(inconsistency!(
                            "member {member} of {lp} is not nested inside it"
                        ))
                    }
                }
            }
        }

        for &exit in &lp.loop_exits {
            if exit <= lp.header {
                return Err(inconsistency!(
                    "exit {exit} of {lp} does not come after the header"
                ));
            }
            // An exit block left the loop; it must not sit inside it.
            let mut cur = cfg.blocks[exit.index()].loop_id;
            while let Some(l) = cur {
                if l == lp.index {
                    return Err(inconsistency!("exit {exit} of {lp} re-enters the loop"));
                }
                cur = cfg.loops[l.index()].parent;
            }
        }
    }
    Ok(())
}

fn verify_dominators(cfg: &ControlFlowGraph) -> Result<()> {
    for block in &cfg.blocks {
        let Some(dom) = block.dominator else {
            if block.id != BlockId::ENTRY {
                return Err(inconsistency!("{block} has no immediate dominator"));
            }
            if block.dominator_depth != 0 {
                return Err(inconsistency!("the entry block has nonzero dominator depth"));
            }
            continue;
        };
        if dom >= block.id {
            return Err(inconsistency!(
                "immediate dominator {dom} of {block} does not precede it"
            ));
        }
        if cfg.blocks[dom.index()].dominator_depth + 1 != block.dominator_depth {
            return Err(inconsistency!("dominator depth of {block} disagrees with {dom}"));
        }
        if !cfg.blocks[dom.index()].dominated.contains(&block.id) {
            return Err(inconsistency!(
                "{block} is missing from the child list of its dominator {dom}"
            ));
        }
        if !cfg.dominates(dom, block.id) {
            return Err(inconsistency!(
                "interval numbering denies that {dom} dominates {block}"
            ));
        }
        if !block.dominated.windows(2).all(|w| w[0] < w[1]) {
            return Err(inconsistency!("child list of {block} is not sorted"));
        }

        // The ground truth: removing the dominator must disconnect the block
        // from the entry. Vacuous when the dominator is the entry itself.
        if dom != BlockId::ENTRY && reachable_avoiding(cfg, block.id, dom)? {
            return Err(inconsistency!(
                "{block} is reachable from the entry without passing its dominator {dom}"
            ));
        }
    }
    Ok(())
}

/// Breadth-first search from the entry that never enters `avoid`; returns
/// whether `target` is still reachable.
fn reachable_avoiding(cfg: &ControlFlowGraph, target: BlockId, avoid: BlockId) -> Result<bool> {
    let mut visited = BitSet::new(cfg.blocks.len());
    let mut queue = std::collections::VecDeque::new();
    visited.insert(BlockId::ENTRY.index());
    queue.push_back(BlockId::ENTRY);
    while let Some(block) = queue.pop_front() {
        cfg.options.alarm.check_progress()?;
        if block == target {
            return Ok(true);
        }
        for &succ in &cfg.blocks[block.index()].succs {
            if succ != avoid && !visited.contains(succ.index()) {
                visited.insert(succ.index());
                queue.push_back(succ);
            }
        }
    }
    Ok(false)
}

fn verify_postdominators(cfg: &ControlFlowGraph) -> Result<()> {
    for block in &cfg.blocks {
        let Some(pdom) = block.postdominator else {
            continue;
        };
        if pdom <= block.id {
            return Err(inconsistency!(
                "postdominator {pdom} of {block} does not come after it"
            ));
        }
        if block.succs.contains(&pdom) && block.succs.len() > 1 {
            return Err(inconsistency!(
                "split {block} has one of its own successors {pdom} as postdominator"
            ));
        }
        // Every successor's postdominator chain must run through it.
        for &succ in &block.succs {
            let mut cur = succ;
            loop {
                if cur == pdom {
                    break;
                }
                match cfg.blocks[cur.index()].postdominator {
                    Some(next) => cur = next,
                    None => {
                        return Err(inconsistency!(
                            "successor {succ} of {block} never reaches the postdominator {pdom}"
                        ))
                    }
                }
            }
        }
    }
    Ok(())
}
