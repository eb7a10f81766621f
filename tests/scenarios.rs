//! End-to-end scenarios exercising the full analysis pipeline through the
//! public API: characteristic graph shapes with hand-derived expected
//! results, plus the global properties (ordering, conservation, bounds,
//! idempotence) checked over every scenario graph.

use irflow::prelude::*;
use irflow::cfg::{MAX_RELATIVE_FREQUENCY, MIN_RELATIVE_FREQUENCY};

const EPSILON: f64 = 1e-9;

fn build(g: &InstGraph) -> ControlFlowGraph {
    ControlFlowGraph::compute(g, BuildFlags::all(), CfgOptions::default()).unwrap()
}

/// entry -> {A, B} (50/50) -> merge -> return
fn diamond() -> InstGraph {
    let mut g = InstGraph::new();
    let start = g.add_start();
    let a = g.add_begin();
    let b = g.add_begin();
    g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
    let merge = g.add_merge();
    g.append_end(a, merge);
    g.append_end(b, merge);
    g.append_return(merge);
    g
}

/// entry -> header; header -> body (90%, backedge) | exit (10%, return)
fn simple_loop() -> (InstGraph, InstId, InstId) {
    let mut g = InstGraph::new();
    let start = g.add_start();
    let lb = g.add_loop_begin();
    g.append_end(start, lb);
    let body = g.add_begin();
    let exit = g.add_loop_exit(lb);
    g.append_control_split(lb, vec![(body, 0.9), (exit, 0.1)], ProfileSource::Profiled);
    g.append_loop_end(body, lb);
    g.append_return(exit);
    (g, lb, exit)
}

/// Outer loop whose body runs an inner loop; the inner exit block carries the
/// outer backedge.
fn nested_loops() -> (InstGraph, InstId, InstId) {
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
    (g, outer, inner)
}

fn scenario_graphs() -> Vec<InstGraph> {
    vec![diamond(), simple_loop().0, nested_loops().0]
}

#[test]
fn diamond_frequencies_and_dominators() {
    let g = diamond();
    let cfg = build(&g);

    assert_eq!(cfg.block_count(), 4);
    assert!(cfg.loops().is_empty());
    assert!((cfg.entry_block().relative_frequency() - 1.0).abs() < EPSILON);
    assert!((cfg.block(BlockId::new(1)).relative_frequency() - 0.5).abs() < EPSILON);
    assert!((cfg.block(BlockId::new(2)).relative_frequency() - 0.5).abs() < EPSILON);
    let merge = BlockId::new(3);
    assert!((cfg.block(merge).relative_frequency() - 1.0).abs() < EPSILON);
    assert_eq!(cfg.block(merge).dominator(), Some(BlockId::ENTRY));
    assert_eq!(cfg.entry_block().postdominator(), Some(merge));
}

#[test]
fn simple_loop_frequencies_and_depths() {
    let (g, lb, exit) = simple_loop();
    let cfg = build(&g);

    assert_eq!(cfg.loops().len(), 1);
    let local = cfg.local_loop_frequency(lb).unwrap();
    assert!((local - 10.0).abs() < EPSILON, "local loop frequency {local}");

    let header = cfg.block_for(lb).unwrap();
    let exit_block = cfg.block_for(exit).unwrap();
    assert_eq!(cfg.loop_depth(header), 1);
    assert_eq!(cfg.loop_depth(exit_block), 0);

    // The loop runs ten expected iterations per entry; the body is taken on
    // nine of them, and the loop is left exactly once.
    assert!((cfg.block(header).relative_frequency() - 10.0).abs() < EPSILON);
    let body = cfg.blocks().iter().find(|b| b.is_loop_end()).unwrap();
    assert!((body.relative_frequency() - 9.0).abs() < EPSILON);
    assert!((cfg.block(exit_block).relative_frequency() - 1.0).abs() < EPSILON);
}

#[test]
fn nested_loops_order_and_depths() {
    let (g, outer, inner) = nested_loops();
    let cfg = build(&g);

    assert_eq!(cfg.loops().len(), 2);
    let outer_loop = cfg
        .loops()
        .iter()
        .find(|l| cfg.block(l.header()).begin_inst() == outer)
        .unwrap();
    let inner_loop = cfg
        .loops()
        .iter()
        .find(|l| cfg.block(l.header()).begin_inst() == inner)
        .unwrap();
    assert_eq!(outer_loop.depth(), 1);
    assert_eq!(inner_loop.depth(), 2);
    assert_eq!(inner_loop.parent(), Some(outer_loop.index()));

    for &b in inner_loop.blocks() {
        assert_eq!(cfg.loop_depth(b), 2);
    }
    for &b in outer_loop.blocks() {
        if !inner_loop.blocks().contains(&b) {
            assert_eq!(cfg.loop_depth(b), 1);
        }
    }

    // Every inner-loop block precedes every outer-loop exit in the order.
    for &exit in outer_loop.loop_exits() {
        for &b in inner_loop.blocks() {
            assert!(b < exit, "inner member {b} must precede outer exit {exit}");
        }
    }
}

#[test]
fn split_into_sinks_has_no_postdominator() {
    let mut g = InstGraph::new();
    let start = g.add_start();
    let a = g.add_begin();
    let b = g.add_begin();
    g.append_control_split(start, vec![(a, 0.5), (b, 0.5)], ProfileSource::Inferred);
    g.append_return(a);
    g.append_deopt(b);

    let cfg = build(&g);
    assert_eq!(cfg.entry_block().postdominator(), None);
}

#[test]
fn graph_too_large_bails_out() {
    let mut g = InstGraph::new();
    let start = g.add_start();
    let mut cur = start;
    for _ in 0..=irflow::cfg::LAST_VALID_BLOCK_INDEX {
        let next = g.add_begin();
        g.set_fall_through(cur, next);
        cur = next;
    }
    g.append_return(cur);

    let err = ControlFlowGraph::compute(&g, BuildFlags::all(), CfgOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Bailout { .. }), "got {err}");
}

#[test]
fn ordering_invariant_holds() {
    for g in scenario_graphs() {
        let cfg = build(&g);
        for block in cfg.blocks() {
            for &succ in block.successors() {
                if block.is_loop_end() && cfg.block(succ).is_loop_header() {
                    assert!(succ <= block.id(), "backedge {} -> {succ}", block.id());
                } else {
                    assert!(block.id() < succ, "forward edge {} -> {succ}", block.id());
                }
            }
        }
    }
}

#[test]
fn dominator_interval_matches_path_test() {
    for g in scenario_graphs() {
        let cfg = build(&g);
        for a in cfg.blocks() {
            for b in cfg.blocks() {
                // The chain of immediate dominators is the ground truth for
                // the interval test.
                let mut on_chain = false;
                let mut cur = Some(b.id());
                while let Some(c) = cur {
                    if c == a.id() {
                        on_chain = true;
                        break;
                    }
                    cur = cfg.block(c).dominator();
                }
                assert_eq!(
                    cfg.dominates(a.id(), b.id()),
                    on_chain,
                    "dominates({}, {})",
                    a.id(),
                    b.id()
                );
            }
        }
    }
}

#[test]
fn loop_membership_is_closed() {
    for g in scenario_graphs() {
        let cfg = build(&g);
        for lp in cfg.loops() {
            for &member in lp.blocks() {
                if member == lp.header() {
                    continue;
                }
                for &pred in cfg.block(member).predecessors() {
                    assert!(
                        lp.blocks().contains(&pred),
                        "predecessor {pred} of member {member} escapes {lp}"
                    );
                }
            }
        }
    }
}

#[test]
fn frequency_mass_is_conserved() {
    for g in scenario_graphs() {
        let cfg = build(&g);
        for block in cfg.blocks() {
            if block.successors().is_empty() {
                continue;
            }
            if block
                .successors()
                .iter()
                .any(|&s| cfg.block(s).is_loop_header())
            {
                continue;
            }
            let succ_sum: f64 = block
                .successors()
                .iter()
                .map(|&s| cfg.block(s).relative_frequency())
                .sum();
            assert!(
                (succ_sum - block.relative_frequency()).abs() < EPSILON,
                "{}: {} vs successor sum {succ_sum}",
                block.id(),
                block.relative_frequency()
            );
        }
    }
}

#[test]
fn frequencies_stay_in_bounds() {
    for g in scenario_graphs() {
        let cfg = build(&g);
        for block in cfg.blocks() {
            let f = block.relative_frequency();
            assert!(f.is_finite());
            assert!((MIN_RELATIVE_FREQUENCY..=MAX_RELATIVE_FREQUENCY).contains(&f));
        }
    }
}

#[test]
fn rebuild_is_deterministic() {
    for g in scenario_graphs() {
        let first = build(&g);
        let second = build(&g);
        assert_eq!(first.block_count(), second.block_count());
        for (a, b) in first.blocks().iter().zip(second.blocks()) {
            assert_eq!(a.id(), b.id());
            assert_eq!(a.begin_inst(), b.begin_inst());
            assert_eq!(a.end_inst(), b.end_inst());
            assert_eq!(a.predecessors(), b.predecessors());
            assert_eq!(a.successors(), b.successors());
            assert_eq!(a.dominator(), b.dominator());
            assert_eq!(a.postdominator(), b.postdominator());
            assert_eq!(a.loop_id(), b.loop_id());
            assert_eq!(a.relative_frequency(), b.relative_frequency());
        }
        assert_eq!(first.loops().len(), second.loops().len());
        for (a, b) in first.loops().iter().zip(second.loops()) {
            assert_eq!(a.header(), b.header());
            assert_eq!(a.blocks(), b.blocks());
            assert_eq!(a.loop_exits(), b.loop_exits());
            assert_eq!(a.depth(), b.depth());
        }
    }
}

#[test]
fn cache_reuses_and_extends_across_phases() {
    let (g, lb, _) = simple_loop();
    let mut cache = CfgCache::new();

    let cfg = cache
        .compute(&g, BuildFlags::CONNECT_BLOCKS | BuildFlags::LOOPS, CfgOptions::default())
        .unwrap();
    assert_eq!(cfg.loops().len(), 1);
    assert!(cfg.local_loop_frequency(lb).is_none());

    // Second phase wants frequencies and dominators on top; the cached
    // instance is extended rather than rebuilt.
    let cfg = cache
        .compute(
            &g,
            BuildFlags::CONNECT_BLOCKS
                | BuildFlags::LOOPS
                | BuildFlags::FREQUENCIES
                | BuildFlags::DOMINATORS,
            CfgOptions::default(),
        )
        .unwrap();
    assert!(cfg.local_loop_frequency(lb).is_some());
    assert!(cfg.flags().contains(BuildFlags::LOOPS | BuildFlags::FREQUENCIES));
}

#[test]
fn watchdog_expiry_is_a_bailout() {
    let (g, _, _) = simple_loop();
    let options = CfgOptions {
        alarm: CompilationAlarm::with_step_budget(1),
        ..CfgOptions::default()
    };
    let err = ControlFlowGraph::compute(&g, BuildFlags::all(), options).unwrap_err();
    assert!(matches!(err, Error::Bailout { .. }), "got {err}");
}
