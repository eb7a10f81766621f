//! Benchmarks for CFG construction and analysis.
//!
//! Two synthetic graph families stress the passes in different ways: chained
//! diamonds (many small merges, no loops) exercise block identification and
//! dominators, nested loops exercise the loop-aware ordering and the
//! two-pass frequency analysis.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use irflow::prelude::*;

/// A chain of `n` diamonds: split, two arms, merge, next diamond.
fn diamond_chain(n: usize) -> InstGraph {
    let mut g = InstGraph::new();
    let mut cur = g.add_start();
    for _ in 0..n {
        let a = g.add_begin();
        let b = g.add_begin();
        g.append_control_split(cur, vec![(a, 0.5), (b, 0.5)], ProfileSource::Profiled);
        let merge = g.add_merge();
        g.append_end(a, merge);
        g.append_end(b, merge);
        cur = merge;
    }
    g.append_return(cur);
    g
}

/// `depth` loops nested inside each other, each with one body block and one
/// exit.
fn nested_loops(depth: usize) -> InstGraph {
    let mut g = InstGraph::new();
    let mut cur = g.add_start();
    let mut headers = Vec::with_capacity(depth);
    let mut exits = Vec::with_capacity(depth);
    for _ in 0..depth {
        let lb = g.add_loop_begin();
        g.append_end(cur, lb);
        let body = g.add_begin();
        let exit = g.add_loop_exit(lb);
        g.append_control_split(lb, vec![(body, 0.9), (exit, 0.1)], ProfileSource::Inferred);
        headers.push(lb);
        exits.push(exit);
        cur = body;
    }
    for (&lb, &exit) in headers.iter().zip(&exits).rev() {
        g.append_loop_end(cur, lb);
        cur = exit;
    }
    g.append_return(cur);
    g
}

fn bench_diamond_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond_chain");
    for n in [100_usize, 1_000, 10_000] {
        let g = diamond_chain(n);
        group.throughput(Throughput::Elements(g.begin_count() as u64));
        group.bench_with_input(BenchmarkId::new("full", n), &g, |b, g| {
            b.iter(|| {
                ControlFlowGraph::compute(black_box(g), BuildFlags::all(), CfgOptions::default())
                    .unwrap()
            });
        });
        group.bench_with_input(BenchmarkId::new("blocks_only", n), &g, |b, g| {
            b.iter(|| {
                ControlFlowGraph::compute(
                    black_box(g),
                    BuildFlags::CONNECT_BLOCKS,
                    CfgOptions::default(),
                )
                .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_nested_loops(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_loops");
    for depth in [4_usize, 16, 64] {
        let g = nested_loops(depth);
        group.bench_with_input(BenchmarkId::new("full", depth), &g, |b, g| {
            b.iter(|| {
                ControlFlowGraph::compute(black_box(g), BuildFlags::all(), CfgOptions::default())
                    .unwrap()
            });
        });
        group.bench_with_input(BenchmarkId::new("frequencies", depth), &g, |b, g| {
            b.iter(|| {
                ControlFlowGraph::compute(
                    black_box(g),
                    BuildFlags::CONNECT_BLOCKS | BuildFlags::FREQUENCIES,
                    CfgOptions::default(),
                )
                .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_diamond_chain, bench_nested_loops);
criterion_main!(benches);
