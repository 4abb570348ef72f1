//! Optimizer pipeline benchmarks: join chains, aggregate lowering, and
//! self-join collapse.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use relquel::ast::builders::*;
use relquel::ast::{Ast, NodeId, SubqueryKind};
use relquel::metadata::{EntityDef, MetadataRegistry};
use relquel::{AggregateFunc, QueryOptimizer};

fn bench_registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(
        EntityDef::new("Item", "items")
            .column("key", "key", false)
            .column("label", "label", true)
            .column("amount", "amount", false)
            .primary_key(&["key"]),
    );
    registry
}

/// Anchor plus a chain of `len` LEFT-joined ranges, only the anchor
/// projected: pruning and anchor work dominate
fn join_chain_query(len: usize) -> (Ast, NodeId) {
    let mut ast = Ast::new();
    let anchor = db_range(&mut ast, "r0", "Item");
    let mut builder = RetrieveBuilder::new();
    let label = ident(&mut ast, anchor, &["label"]);
    builder = builder.project("label", label).range(anchor, None);

    let mut previous = anchor;
    for i in 1..=len {
        let range = left_range(&mut ast, &format!("r{i}"), "Item");
        let own = ident(&mut ast, range, &["key"]);
        let target = ident(&mut ast, previous, &["key"]);
        let pred = eq(&mut ast, own, target);
        builder = builder.range(range, Some(pred));
        previous = range;
    }
    let retrieve = builder.build(&mut ast);
    (ast, retrieve)
}

/// `width` conditional SUM aggregates, each lowering to a correlated
/// scalar subquery over a cloned joined range
fn aggregate_query(width: usize) -> (Ast, NodeId) {
    let mut ast = Ast::new();
    let anchor = db_range(&mut ast, "c", "Item");
    let joined = db_range(&mut ast, "o", "Item");
    let own = ident(&mut ast, joined, &["key"]);
    let target = ident(&mut ast, anchor, &["key"]);
    let join = eq(&mut ast, own, target);

    let mut builder = RetrieveBuilder::new();
    let label = ident(&mut ast, anchor, &["label"]);
    builder = builder.project("label", label);
    for i in 0..width {
        let operand = ident(&mut ast, joined, &["amount"]);
        let lhs = ident(&mut ast, joined, &["label"]);
        let rhs = string(&mut ast, "paid");
        let cond = eq(&mut ast, lhs, rhs);
        let agg = aggregate_with_conditions(&mut ast, AggregateFunc::Sum, operand, cond);
        builder = builder.project(&format!("total{i}"), agg);
    }
    let retrieve = builder
        .range(anchor, None)
        .range(joined, Some(join))
        .build(&mut ast);
    (ast, retrieve)
}

/// A self-join EXISTS over `cols` join columns
fn self_join_query(cols: usize) -> (Ast, NodeId) {
    let mut ast = Ast::new();
    let u = db_range(&mut ast, "u", "Item");
    let u2 = db_range(&mut ast, "u2", "Item");

    let mut body = None;
    for i in 0..cols {
        let col = ["key", "label", "amount"][i % 3];
        let outer = ident(&mut ast, u, &[col]);
        let inner = ident(&mut ast, u2, &[col]);
        let pair = eq(&mut ast, outer, inner);
        body = Some(match body {
            Some(prev) => and(&mut ast, prev, pair),
            None => pair,
        });
    }
    let one = num(&mut ast, "1");
    let exists = subquery(&mut ast, SubqueryKind::Exists, Some(one), vec![u2], body);
    let label = ident(&mut ast, u, &["label"]);
    let retrieve = RetrieveBuilder::new()
        .project("label", label)
        .range(u, None)
        .conditions(exists)
        .build(&mut ast);
    (ast, retrieve)
}

fn bench_join_chain(c: &mut Criterion) {
    let registry = bench_registry();
    let mut group = c.benchmark_group("join_chain_pruning");
    for len in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                || join_chain_query(len),
                |(mut ast, retrieve)| {
                    let mut optimizer = QueryOptimizer::new(&registry);
                    optimizer.optimize(&mut ast, retrieve).expect("optimize");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_aggregate_lowering(c: &mut Criterion) {
    let registry = bench_registry();
    let mut group = c.benchmark_group("aggregate_lowering");
    for width in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter_batched(
                || aggregate_query(width),
                |(mut ast, retrieve)| {
                    let mut optimizer = QueryOptimizer::new(&registry);
                    optimizer.optimize(&mut ast, retrieve).expect("optimize");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_self_join_collapse(c: &mut Criterion) {
    let registry = bench_registry();
    let mut group = c.benchmark_group("self_join_collapse");
    for cols in [1usize, 3, 9] {
        group.bench_with_input(BenchmarkId::from_parameter(cols), &cols, |b, &cols| {
            b.iter_batched(
                || self_join_query(cols),
                |(mut ast, retrieve)| {
                    let mut optimizer = QueryOptimizer::new(&registry);
                    optimizer.optimize(&mut ast, retrieve).expect("optimize");
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_join_chain,
    bench_aggregate_lowering,
    bench_self_join_collapse
);
criterion_main!(benches);
