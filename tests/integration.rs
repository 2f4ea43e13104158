//! End-to-end scenarios across the set algebra, the wire format, and the
//! zero-copy view.

use roaring32::{ContainerType, ImmutableBitmap, RoaringBitmap};

#[test]
fn empty_union_singleton() {
    let empty = RoaringBitmap::new();
    let single: RoaringBitmap = [5u32].into_iter().collect();
    let union = empty.or(&single);
    assert_eq!(union.cardinality(), 1);
    assert_eq!(union.to_vec(), vec![5]);
}

#[test]
fn serialized_view_cardinality_and_intersection() {
    let rb: RoaringBitmap = (1..=10_000u32).collect();
    let bytes = rb.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(view.cardinality(), 10_000);

    let probe: RoaringBitmap = (5_000..=15_000u32).collect();
    assert_eq!(probe.and_cardinality_against_immutable(&view), 5_001);
    assert_eq!(probe.and_cardinality(&rb), 5_001);
}

#[test]
fn full_chunk_run_optimizes_to_single_full_run() {
    // Fill one high-16 chunk entirely through single adds, so the chunk
    // passes through array and bitmap form first.
    let mut rb = RoaringBitmap::new();
    for low in 0..=65_535u32 {
        rb.add((7 << 16) | low);
    }
    rb.run_optimize();
    assert_eq!(rb.cardinality(), 65_536);

    let bytes = rb.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(view.container_count(), 1);
    assert!(view.is_run_at(0));
    // One run of length 65536: start 0, stored length 65535.
    assert_eq!(view.card_minus_one_at(0), 65_535);
    assert!(view.contains(7 << 16));
    assert!(view.contains((7 << 16) | 65_535));

    let back = RoaringBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(back, rb);
}

#[test]
fn array_tail_append_promotion_sequence() {
    // 4096 even values, then a tail append, then one more even value.
    let mut rb = RoaringBitmap::new();
    for i in 0..4096u32 {
        rb.add(i * 2);
    }
    rb.add(8191);
    assert_eq!(rb.cardinality(), 4097);
    rb.add(8192);
    assert_eq!(rb.cardinality(), 4098);
    // Round-trip now serializes the chunk as a bitmap container.
    let bytes = rb.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert!(!view.is_run_at(0));
    assert!(view.card_minus_one_at(0) as usize >= roaring32::ARRAY_DEFAULT_MAX_SIZE);
    assert_eq!(RoaringBitmap::from_buffer(&bytes).unwrap(), rb);
}

#[test]
fn small_array_algebra() {
    let l: RoaringBitmap = [1u32, 3, 5, 7].into_iter().collect();
    let r: RoaringBitmap = [3u32, 7, 11].into_iter().collect();
    assert_eq!(l.or(&r).to_vec(), vec![1, 3, 5, 7, 11]);
    assert_eq!(l.and(&r).to_vec(), vec![3, 7]);
    assert_eq!(l.and_not(&r).to_vec(), vec![1, 5]);
    assert_eq!(l.xor(&r).to_vec(), vec![1, 5, 11]);
}

#[test]
fn round_trip_preserves_membership_across_representations() {
    // A sparse chunk, a dense chunk, and a run chunk.
    let mut rb = RoaringBitmap::new();
    for v in [10u32, 77, 30_000] {
        rb.add(v);
    }
    for v in 65_536..80_000u32 {
        rb.add(v);
    }
    rb.add_range(10 << 16, (10 << 16) + 1000);
    rb.run_optimize();

    let bytes = rb.to_bytes().unwrap();
    let back = RoaringBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(back.cardinality(), rb.cardinality());
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    for v in rb.to_vec() {
        assert!(back.contains(v));
        assert!(view.contains(v));
    }
}

#[test]
fn view_equivalence_with_materialized_operations() {
    let b: RoaringBitmap = (0..300_000u32).step_by(11).collect();
    let bytes = b.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(view.cardinality(), b.cardinality());

    let a: RoaringBitmap = (0..300_000u32).step_by(7).collect();
    assert_eq!(
        a.and_cardinality_against_immutable(&view),
        a.and_cardinality(&b)
    );

    let mut via_view = a.clone();
    via_view.or_against_immutable(&view);
    assert_eq!(via_view, a.or(&b));
}

#[test]
fn cow_clone_does_not_leak_mutations() {
    let b1: RoaringBitmap = (0..100_000u32).collect();
    let mut b2 = b1.clone();
    b2.remove_range(0, 50_000);
    assert_eq!(b1.cardinality(), 100_000);
    assert_eq!(b2.cardinality(), 50_000);

    let mut b3 = b1.clone();
    b3.ior(&b2);
    assert_eq!(b3, b1);
    assert_eq!(b2.cardinality(), 50_000);
}

#[test]
fn representation_does_not_affect_equality() {
    // Same set reached through different operation histories.
    let mut via_ranges = RoaringBitmap::new();
    via_ranges.add_range(0, 10_000);
    via_ranges.remove_range(5_000, 10_000);

    let via_adds: RoaringBitmap = (0..5_000u32).collect();
    assert_eq!(via_ranges, via_adds);

    let mut optimized = via_adds.clone();
    optimized.run_optimize();
    assert_eq!(optimized, via_ranges);
    assert_eq!(optimized.to_bytes().unwrap().len(), {
        // Run form: one run beats 5000 array entries on the wire.
        let mut copy = via_ranges.clone();
        copy.run_optimize();
        copy.to_bytes().unwrap().len()
    });
}

#[test]
fn inclusion_exclusion_over_mixed_chunks() {
    let a: RoaringBitmap = (0..500_000u32).step_by(3).collect();
    let mut b: RoaringBitmap = (0..500_000u32).step_by(4).collect();
    b.add_range(1 << 20, (1 << 20) + 70_000);

    assert_eq!(
        a.or(&b).cardinality() + a.and(&b).cardinality(),
        a.cardinality() + b.cardinality()
    );
    assert_eq!(a.or_cardinality(&b), a.or(&b).cardinality());
}

#[test]
fn filtered_or_against_view_matches_unfiltered_then_and() {
    let this: RoaringBitmap = (0..50u32 << 16).step_by(9).collect();
    let that: RoaringBitmap = (0..50u32 << 16).step_by(13).collect();
    let filter: RoaringBitmap = (5u32 << 16..20u32 << 16).step_by(2).collect();

    let bytes = that.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();

    let mut filtered = this.clone();
    filtered.or_against_immutable_with_filter(&view, &filter);
    filtered.iand(&filter);

    let expected = this.or(&that).and(&filter);
    assert_eq!(filtered, expected);
}

#[test]
fn file_round_trip() {
    use std::io::Write;

    let mut rb: RoaringBitmap = (0..200_000u32).step_by(17).collect();
    rb.add_range(1 << 24, (1 << 24) + 100_000);
    rb.run_optimize();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&rb.to_bytes().unwrap()).unwrap();
    let data = std::fs::read(file.path()).unwrap();

    let view = ImmutableBitmap::from_buffer(&data).unwrap();
    assert_eq!(view.cardinality(), rb.cardinality());
    assert_eq!(RoaringBitmap::from_buffer(&data).unwrap(), rb);
}

#[test]
fn container_type_transitions_via_public_surface() {
    let mut rb = RoaringBitmap::new();
    // Array while small.
    for i in 0..100u32 {
        rb.add(i);
    }
    let bytes = rb.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert!((view.card_minus_one_at(0) as usize) < roaring32::ARRAY_DEFAULT_MAX_SIZE);

    // Dense: serializes as a bitmap container.
    rb.add_range(0, 30_000);
    let bytes = rb.to_bytes().unwrap();
    let back = RoaringBitmap::from_buffer(&bytes).unwrap();
    assert_eq!(back.cardinality(), 30_000);

    // Run-optimized: serializes as one run.
    let mut runny = back;
    runny.run_optimize();
    let bytes = runny.to_bytes().unwrap();
    let view = ImmutableBitmap::from_buffer(&bytes).unwrap();
    assert!(view.is_run_at(0));
}

#[test]
fn container_enum_surface() {
    // The container layer is public; spot-check the dispatch surface.
    use roaring32::container::{ArrayContainer, Container};
    let a = Container::Array(ArrayContainer::from_sorted_vec(vec![1, 2, 3]));
    let b = Container::from_range(2, 10);
    assert_eq!(b.container_type(), ContainerType::Run);
    assert_eq!(a.or(&b).cardinality(), 10);
    assert_eq!(a.and_cardinality(&b), 2);
}
