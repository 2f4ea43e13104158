//! Micro-benchmarks for the pairwise kernels and the byte-op fast paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use roaring32::{ImmutableBitmap, RoaringBitmap};

fn dense(offset: u32) -> RoaringBitmap {
    (offset..offset + 1_000_000).step_by(3).collect()
}

fn sparse(offset: u32) -> RoaringBitmap {
    (offset..offset + 1_000_000).step_by(331).collect()
}

fn bench_pairwise(c: &mut Criterion) {
    let a = dense(0);
    let b = dense(500_000);
    let s = sparse(0);

    c.bench_function("or_dense_dense", |bench| {
        bench.iter(|| black_box(a.or(&b)))
    });
    c.bench_function("and_dense_dense", |bench| {
        bench.iter(|| black_box(a.and(&b)))
    });
    c.bench_function("and_cardinality_dense_sparse", |bench| {
        bench.iter(|| black_box(a.and_cardinality(&s)))
    });
    c.bench_function("xor_dense_dense", |bench| {
        bench.iter(|| black_box(a.xor(&b)))
    });
}

fn bench_byte_ops(c: &mut Criterion) {
    let a = dense(0);
    let b = dense(500_000);
    let bytes = b.to_bytes().expect("serialize");

    c.bench_function("and_cardinality_against_immutable", |bench| {
        bench.iter(|| {
            let view = ImmutableBitmap::from_buffer(&bytes).expect("parse");
            black_box(a.and_cardinality_against_immutable(&view))
        })
    });
    c.bench_function("or_against_immutable", |bench| {
        bench.iter(|| {
            let view = ImmutableBitmap::from_buffer(&bytes).expect("parse");
            let mut acc = a.clone();
            acc.or_against_immutable(&view);
            black_box(acc)
        })
    });
    c.bench_function("deserialize_full", |bench| {
        bench.iter(|| black_box(RoaringBitmap::from_buffer(&bytes).expect("parse")))
    });
}

criterion_group!(benches, bench_pairwise, bench_byte_ops);
criterion_main!(benches);
