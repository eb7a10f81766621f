//! Postdominator analysis.
//!
//! A single reverse sweep over the block array: successors have larger ids
//! (backedges aside), so by the time a block is visited every successor's
//! postdominator is already known and the nearest common postdominator can
//! be found by walking postdominator links upward by id. Loop-end blocks are
//! skipped entirely; their only successor is the loop header, which must
//! never be recorded as a backedge's postdominator.
//!
//! A block can legitimately end up without a postdominator: whenever one of
//! its successor paths runs into a control sink, there is no block that every
//! path passes through afterwards. That is a normal outcome, not an error.

use crate::{
    cfg::{block::BlockId, builder::ControlFlowGraph},
    error::inconsistency,
    Result,
};

pub(crate) fn compute_postdominators(cfg: &mut ControlFlowGraph) -> Result<()> {
    'outer: for j in (0..cfg.blocks.len()).rev() {
        cfg.options.alarm.check_progress()?;
        if cfg.blocks[j].is_loop_end {
            continue;
        }
        if cfg.blocks[j].succs.is_empty() {
            continue;
        }
        if cfg.blocks[j].succs.len() == 1 {
            cfg.blocks[j].postdominator = Some(cfg.blocks[j].succs[0]);
            continue;
        }
        let mut postdominator = cfg.blocks[j].succs[0];
        for i in 0..cfg.blocks[j].succs.len() {
            let succ = cfg.blocks[j].succs[i];
            match common_postdominator(cfg, postdominator, succ) {
                Some(p) => postdominator = p,
                // A dead end on some path; nothing postdominates this block.
                None => continue 'outer,
            }
        }
        if cfg.blocks[j].succs.contains(&postdominator) {
            return Err(inconsistency!(
                "block {} has one of its own successors {} as postdominator",
                cfg.blocks[j].id,
                postdominator
            ));
        }
        cfg.blocks[j].postdominator = Some(postdominator);
    }
    Ok(())
}

/// Walks both blocks' postdominator chains, always advancing the one with
/// the smaller id, until they meet or a chain ends.
fn common_postdominator(
    cfg: &ControlFlowGraph,
    a: BlockId,
    b: BlockId,
) -> Option<BlockId> {
    let mut a = a;
    let mut b = b;
    while a != b {
        if a < b {
            a = cfg.blocks[a.index()].postdominator?;
        } else {
            b = cfg.blocks[b.index()].postdominator?;
        }
    }
    Some(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfg::builder::{BuildFlags, CfgOptions},
        ir::{InstGraph, ProfileSource},
    };

    fn compute(g: &InstGraph) -> ControlFlowGraph {
        ControlFlowGraph::compute(g, BuildFlags::all(), CfgOptions::default()).unwrap()
    }

    #[test]
    fn test_diamond_postdominators() {
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
        let merge_id = cfg.block_for(merge).unwrap();
        assert_eq!(cfg.entry_block().postdominator(), Some(merge_id));
        assert_eq!(cfg.block(BlockId::new(1)).postdominator(), Some(merge_id));
        assert_eq!(cfg.block(BlockId::new(2)).postdominator(), Some(merge_id));
        // The merge ends in a sink, nothing comes after it.
        assert_eq!(cfg.block(merge_id).postdominator(), None);
    }

    #[test]
    fn test_split_into_sinks_has_no_postdominator() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Inferred);
        g.append_return(a);
        g.append_deopt(b);

        let cfg = compute(&g);
        assert_eq!(cfg.entry_block().postdominator(), None);
    }

    #[test]
    fn test_loop_end_gets_no_postdominator() {
        let mut g = InstGraph::new();
        let start = g.add_start();
        let lb = g.add_loop_begin();
        g.append_end(start, lb);
        let body = g.add_begin();
        let exit = g.add_loop_exit(lb);
        g.append_control_split(lb, vec![(body, 0.9), (exit, 0.1)], ProfileSource::Profiled);
        g.append_loop_end(body, lb);
        g.append_return(exit);

        let cfg = compute(&g);
        let end = cfg.blocks().iter().find(|b| b.is_loop_end()).unwrap();
        // The loop header must never be the backedge block's postdominator.
        assert_eq!(end.postdominator(), None);
    }
}
