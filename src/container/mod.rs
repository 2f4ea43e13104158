//! Container representations and the cross-type dispatch table.
//!
//! One 16-bit chunk of the keyspace is held by a [`Container`]: a sorted
//! array while sparse, a fixed bitmap while dense, or run-length intervals
//! while run-heavy. All three variants and every pairwise routing decision
//! live in this module, so the 3×3 kernel matrix has no cross-module
//! cycles to fight.

pub mod array;
pub mod bitmap;
pub mod byteops;
pub mod run;

pub use array::ArrayContainer;
pub use bitmap::BitmapContainer;
pub use run::{run_serialized_size, Interval, RunContainer};

use crate::kernels;

/// Largest cardinality stored in array form; past it, inserts densify to a
/// bitmap. A tail append may carry an array one value beyond the limit;
/// the next insert densifies.
pub const ARRAY_DEFAULT_MAX_SIZE: usize = 4096;

/// Serialized size of a bitmap container payload.
pub const BITMAP_CONTAINER_SIZE: usize = 8192;

/// Representation tag, as recorded in the serialized format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Sorted `u16` array.
    Array,
    /// 1024-word bitmap.
    Bitmap,
    /// Run-length intervals.
    Run,
}

/// One chunk of the keyspace in whichever representation currently fits.
#[derive(Debug, Clone)]
pub enum Container {
    /// Sparse form: sorted unique values.
    Array(ArrayContainer),
    /// Dense form: one bit per slot.
    Bitmap(BitmapContainer),
    /// Run-length form: disjoint inclusive intervals.
    Run(RunContainer),
}

impl Container {
    /// Wrap an array, promoting to bitmap if it exceeds the array limit.
    pub fn from_array(ac: ArrayContainer) -> Container {
        if ac.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
            Container::Bitmap(ac.to_bitmap())
        } else {
            Container::Array(ac)
        }
    }

    /// Wrap a bitmap, demoting to array if it is at or below the limit.
    pub fn from_bitmap(bc: BitmapContainer) -> Container {
        if bc.cardinality() as usize <= ARRAY_DEFAULT_MAX_SIZE {
            Container::Array(bc.to_array())
        } else {
            Container::Bitmap(bc)
        }
    }

    /// A container holding exactly `[lo, hi)`, in run form.
    pub fn from_range(lo: u32, hi: u32) -> Container {
        debug_assert!(lo < hi && hi <= 65_536);
        let mut rc = RunContainer::new();
        rc.iadd_range(lo, hi);
        Container::Run(rc)
    }

    pub fn container_type(&self) -> ContainerType {
        match self {
            Container::Array(_) => ContainerType::Array,
            Container::Bitmap(_) => ContainerType::Bitmap,
            Container::Run(_) => ContainerType::Run,
        }
    }

    pub fn cardinality(&self) -> u32 {
        match self {
            Container::Array(ac) => ac.cardinality() as u32,
            Container::Bitmap(bc) => bc.cardinality(),
            Container::Run(rc) => rc.cardinality(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Container::Array(ac) => ac.is_empty(),
            Container::Bitmap(bc) => bc.is_empty(),
            Container::Run(rc) => rc.is_empty(),
        }
    }

    pub fn is_full(&self) -> bool {
        match self {
            Container::Array(_) => false,
            Container::Bitmap(bc) => bc.is_full(),
            Container::Run(rc) => rc.is_full(),
        }
    }

    pub fn min(&self) -> u16 {
        match self {
            Container::Array(ac) => ac.min(),
            Container::Bitmap(bc) => bc.min(),
            Container::Run(rc) => rc.min(),
        }
    }

    pub fn max(&self) -> u16 {
        match self {
            Container::Array(ac) => ac.max(),
            Container::Bitmap(bc) => bc.max(),
            Container::Run(rc) => rc.max(),
        }
    }

    pub fn contains(&self, x: u16) -> bool {
        match self {
            Container::Array(ac) => ac.contains(x),
            Container::Bitmap(bc) => bc.contains(x),
            Container::Run(rc) => rc.contains(x),
        }
    }

    /// One-based count of values `<= x`.
    pub fn rank(&self, x: u16) -> usize {
        match self {
            Container::Array(ac) => ac.rank(x),
            Container::Bitmap(bc) => bc.rank(x),
            Container::Run(rc) => rc.rank(x),
        }
    }

    /// The value at index `i` in ascending order.
    pub fn select(&self, i: usize) -> u16 {
        match self {
            Container::Array(ac) => ac.select(i),
            Container::Bitmap(bc) => bc.select(i),
            Container::Run(rc) => rc.select(i),
        }
    }

    pub fn number_of_runs(&self) -> usize {
        match self {
            Container::Array(ac) => ac.number_of_runs(),
            Container::Bitmap(bc) => bc.number_of_runs(),
            Container::Run(rc) => rc.number_of_runs(),
        }
    }

    /// Exact on-wire payload size of this container.
    ///
    /// The format types containers by cardinality, so an array riding one
    /// past the limit serializes in bitmap form.
    pub fn serialized_size_in_bytes(&self) -> usize {
        match self {
            Container::Array(ac) => {
                if ac.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
                    BITMAP_CONTAINER_SIZE
                } else {
                    2 * ac.cardinality()
                }
            }
            Container::Bitmap(_) => BITMAP_CONTAINER_SIZE,
            Container::Run(rc) => run_serialized_size(rc.number_of_runs()),
        }
    }

    /// Convert to whichever representation serializes smallest.
    ///
    /// Run form wins ties; otherwise the array/bitmap split follows the
    /// cardinality threshold.
    pub fn to_efficient_container(&self) -> Container {
        let n_runs = self.number_of_runs();
        let card = self.cardinality() as usize;
        let size_run = run_serialized_size(n_runs);
        let size_array = if card <= ARRAY_DEFAULT_MAX_SIZE {
            2 * card
        } else {
            usize::MAX
        };
        if size_run <= size_array.min(BITMAP_CONTAINER_SIZE) {
            return match self {
                Container::Array(ac) => {
                    Container::Run(RunContainer::from_sorted_array(ac.values()))
                }
                Container::Bitmap(bc) => Container::Run(RunContainer::from_bitmap(bc)),
                Container::Run(rc) => Container::Run(rc.clone()),
            };
        }
        if card <= ARRAY_DEFAULT_MAX_SIZE {
            match self {
                Container::Array(ac) => Container::Array(ac.clone()),
                Container::Bitmap(bc) => Container::Array(bc.to_array()),
                Container::Run(rc) => Container::Array(rc.to_array()),
            }
        } else {
            match self {
                Container::Array(ac) => Container::Bitmap(ac.to_bitmap()),
                Container::Bitmap(bc) => Container::Bitmap(bc.clone()),
                Container::Run(rc) => Container::Bitmap(rc.to_bitmap()),
            }
        }
    }

    /// Iterate values in ascending order.
    pub fn iter(&self) -> ContainerIter<'_> {
        match self {
            Container::Array(ac) => ContainerIter::Array(ac.values().iter()),
            Container::Bitmap(bc) => ContainerIter::Bitmap {
                words: &bc.words()[..],
                word_idx: 0,
                current: bc.words()[0],
            },
            Container::Run(rc) => ContainerIter::Run {
                runs: rc.intervals().iter(),
                cur: None,
            },
        }
    }

    /// Insert `x`. Returns whether the value was newly added.
    ///
    /// Arrays promote to bitmap when a non-append insert hits the limit;
    /// a tail append is allowed to overshoot by one, so the densification
    /// lands on the following insert.
    pub fn iadd(&mut self, x: u16) -> bool {
        let (added, replacement) = match &mut *self {
            Container::Array(ac) => {
                let tail_append = ac.values().last().map_or(true, |&last| last < x);
                if tail_append && ac.cardinality() <= ARRAY_DEFAULT_MAX_SIZE {
                    (ac.iadd(x), None)
                } else if !tail_append && ac.contains(x) {
                    (false, None)
                } else if ac.cardinality() < ARRAY_DEFAULT_MAX_SIZE {
                    (ac.iadd(x), None)
                } else {
                    let mut bc = ac.to_bitmap();
                    let added = bc.iadd(x);
                    (added, Some(Container::Bitmap(bc)))
                }
            }
            Container::Bitmap(bc) => (bc.iadd(x), None),
            Container::Run(rc) => (rc.iadd(x), None),
        };
        if let Some(c) = replacement {
            *self = c;
        }
        added
    }

    /// Remove `x`, demoting bitmap form at the limit. Returns whether the
    /// value was present. The container may become empty; the index is
    /// responsible for dropping it.
    pub fn iremove(&mut self, x: u16) -> bool {
        let (removed, replacement) = match &mut *self {
            Container::Array(ac) => (ac.iremove(x), None),
            Container::Bitmap(bc) => {
                let removed = bc.iremove(x);
                if removed && bc.cardinality() as usize <= ARRAY_DEFAULT_MAX_SIZE {
                    (true, Some(Container::Array(bc.to_array())))
                } else {
                    (removed, None)
                }
            }
            Container::Run(rc) => (rc.iremove(x), None),
        };
        if let Some(c) = replacement {
            *self = c;
        }
        removed
    }

    /// Add every value in `[lo, hi)`.
    pub fn iadd_range(&mut self, lo: u32, hi: u32) {
        if lo >= hi {
            return;
        }
        let replacement = match &mut *self {
            Container::Array(ac) => {
                if ac.cardinality_with_range(lo, hi) > ARRAY_DEFAULT_MAX_SIZE {
                    let mut bc = ac.to_bitmap();
                    bc.iadd_range(lo, hi);
                    Some(Container::Bitmap(bc))
                } else {
                    ac.iadd_range(lo, hi);
                    None
                }
            }
            Container::Bitmap(bc) => {
                bc.iadd_range(lo, hi);
                None
            }
            Container::Run(rc) => {
                rc.iadd_range(lo, hi);
                None
            }
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// Remove every value in `[lo, hi)`.
    pub fn iremove_range(&mut self, lo: u32, hi: u32) {
        if lo >= hi {
            return;
        }
        let replacement = match &mut *self {
            Container::Array(ac) => {
                ac.iremove_range(lo, hi);
                None
            }
            Container::Bitmap(bc) => {
                bc.iremove_range(lo, hi);
                demote_if_small(bc)
            }
            Container::Run(rc) => {
                rc.iremove_range(lo, hi);
                None
            }
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// Flip every value in `[lo, hi)`.
    pub fn inot(&mut self, lo: u32, hi: u32) {
        if lo >= hi {
            return;
        }
        let replacement = match &mut *self {
            Container::Array(ac) => match ac.not_range(lo, hi, ARRAY_DEFAULT_MAX_SIZE) {
                Some(flipped) => {
                    *ac = flipped;
                    None
                }
                None => {
                    let mut bc = ac.to_bitmap();
                    bc.inot_range(lo, hi);
                    Some(Container::Bitmap(bc))
                }
            },
            Container::Bitmap(bc) => {
                bc.inot_range(lo, hi);
                demote_if_small(bc)
            }
            Container::Run(rc) => {
                let mut bc = rc.to_bitmap();
                bc.inot_range(lo, hi);
                Some(Container::from_bitmap(bc))
            }
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// Shift every value by `offset`, splitting into this chunk's image
    /// and the spill into the next chunk.
    pub fn add_offset(&self, offset: u16) -> (Option<Container>, Option<Container>) {
        match self {
            Container::Array(ac) => {
                let (low, high) = ac.add_offset(offset);
                (low.map(Container::Array), high.map(Container::Array))
            }
            Container::Bitmap(bc) => {
                let (low, high) = bc.to_array().add_offset(offset);
                (low.map(Container::from_array), high.map(Container::from_array))
            }
            Container::Run(rc) => {
                let (low, high) = rc.add_offset(offset);
                (low.map(Container::Run), high.map(Container::Run))
            }
        }
    }

    // ---- allocating set algebra ----

    /// Union.
    pub fn or(&self, other: &Container) -> Container {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => or_array_array(a, b),
            (Array(a), Bitmap(b)) | (Bitmap(b), Array(a)) => {
                Bitmap(or_bitmap_array(b, a.values()))
            }
            (Array(a), Run(r)) | (Run(r), Array(a)) => {
                if r.is_full() {
                    Run(RunContainer::full())
                } else {
                    Run(r.union_with_values(a.values()))
                }
            }
            (Bitmap(a), Bitmap(b)) => Bitmap(or_bitmap_bitmap(a, b)),
            (Bitmap(b), Run(r)) | (Run(r), Bitmap(b)) => {
                if r.is_full() {
                    Run(RunContainer::full())
                } else {
                    Bitmap(or_bitmap_run(b, r))
                }
            }
            (Run(a), Run(b)) => Run(a.union_with(b)),
        }
    }

    /// Intersection.
    pub fn and(&self, other: &Container) -> Container {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => {
                let mut out = Vec::new();
                kernels::intersect2by2(a.values(), b.values(), &mut out);
                Array(ArrayContainer::from_sorted_vec(out))
            }
            (Array(a), Bitmap(b)) | (Bitmap(b), Array(a)) => {
                Array(and_bitmap_array(b, a.values()))
            }
            (Array(a), Run(r)) | (Run(r), Array(a)) => {
                if r.is_full() {
                    Array(a.clone())
                } else {
                    Array(r.and_array(a.values()))
                }
            }
            (Bitmap(a), Bitmap(b)) => Container::from_bitmap(and_bitmap_bitmap(a, b)),
            (Bitmap(b), Run(r)) | (Run(r), Bitmap(b)) => {
                if r.is_full() {
                    Bitmap(b.clone())
                } else {
                    let mut masked = b.clone();
                    iand_bitmap_run(&mut masked, r);
                    Container::from_bitmap(masked)
                }
            }
            (Run(a), Run(b)) => Run(a.intersect_with(b)),
        }
    }

    /// Difference (`self` without `other`).
    pub fn and_not(&self, other: &Container) -> Container {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => {
                let mut out = Vec::new();
                kernels::difference(a.values(), b.values(), &mut out);
                Array(ArrayContainer::from_sorted_vec(out))
            }
            (Array(a), Bitmap(b)) => Array(and_not_array_bitmap(a.values(), b)),
            (Array(a), Run(r)) => Array(and_not_array_run(a.values(), r)),
            (Bitmap(a), Array(b)) => {
                let mut out = a.clone();
                for &v in b.values() {
                    out.iremove(v);
                }
                Container::from_bitmap(out)
            }
            (Bitmap(a), Bitmap(b)) => Container::from_bitmap(and_not_bitmap_bitmap(a, b)),
            (Bitmap(a), Run(r)) => {
                let mut out = a.clone();
                for iv in r.intervals() {
                    out.iremove_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                Container::from_bitmap(out)
            }
            (Run(a), Array(b)) => {
                Run(a.difference_with(&RunContainer::from_sorted_array(b.values())))
            }
            (Run(a), Bitmap(b)) => {
                let mut out = a.to_bitmap();
                iand_not_bitmap_bitmap(&mut out, b);
                Container::from_bitmap(out)
            }
            (Run(a), Run(b)) => Run(a.difference_with(b)),
        }
    }

    /// Symmetric difference.
    pub fn xor(&self, other: &Container) -> Container {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => xor_array_array(a, b),
            (Array(a), Bitmap(b)) | (Bitmap(b), Array(a)) => {
                let mut out = b.clone();
                ixor_bitmap_values(&mut out, a.values());
                Container::from_bitmap(out)
            }
            (Array(a), Run(r)) | (Run(r), Array(a)) => xor_run_values(r, a.values()),
            (Bitmap(a), Bitmap(b)) => Container::from_bitmap(xor_bitmap_bitmap(a, b)),
            (Bitmap(b), Run(r)) | (Run(r), Bitmap(b)) => {
                let mut out = b.clone();
                for iv in r.intervals() {
                    out.inot_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                Container::from_bitmap(out)
            }
            (Run(a), Run(b)) => Run(a.difference_with(b).union_with(&b.difference_with(a))),
        }
    }

    /// Cardinality of the intersection, without materializing it.
    pub fn and_cardinality(&self, other: &Container) -> u32 {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => {
                kernels::intersect2by2_cardinality(a.values(), b.values()) as u32
            }
            (Array(a), Bitmap(b)) | (Bitmap(b), Array(a)) => {
                a.values().iter().map(|&v| b.bit_value(v) as u32).sum()
            }
            (Array(a), Run(r)) | (Run(r), Array(a)) => {
                if r.is_full() {
                    a.cardinality() as u32
                } else {
                    r.and_array_cardinality(a.values()) as u32
                }
            }
            (Bitmap(a), Bitmap(b)) => a
                .words()
                .iter()
                .zip(b.words().iter())
                .map(|(&x, &y)| (x & y).count_ones())
                .sum(),
            (Bitmap(b), Run(r)) | (Run(r), Bitmap(b)) => r
                .intervals()
                .iter()
                .map(|iv| b.cardinality_in_range(u32::from(iv.start), u32::from(iv.last) + 1))
                .sum(),
            (Run(a), Run(b)) => run_and_run_cardinality(a, b),
        }
    }

    /// Cardinality of the union, without materializing it.
    pub fn or_cardinality(&self, other: &Container) -> u32 {
        self.cardinality() + other.cardinality() - self.and_cardinality(other)
    }

    // ---- in-place set algebra ----

    /// In-place union.
    pub fn ior(&mut self, other: &Container) {
        use Container::{Array, Bitmap, Run};
        let replacement = match (&mut *self, other) {
            (Array(a), Array(b)) => {
                if a.cardinality() + b.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
                    Some(or_array_array(a, b))
                } else {
                    kernels::union_in_place(a.values_mut(), b.values());
                    None
                }
            }
            (Array(a), Bitmap(b)) => Some(Bitmap(or_bitmap_array(b, a.values()))),
            (Array(a), Run(r)) => {
                if r.is_full() {
                    Some(Run(RunContainer::full()))
                } else {
                    Some(Run(r.union_with_values(a.values())))
                }
            }
            (Bitmap(a), Array(b)) => {
                ior_bitmap_values(a, b.values());
                None
            }
            (Bitmap(a), Bitmap(b)) => {
                for (x, y) in a.words_mut().iter_mut().zip(b.words().iter()) {
                    *x |= y;
                }
                a.repair();
                None
            }
            (Bitmap(a), Run(r)) => {
                for iv in r.intervals() {
                    a.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                None
            }
            (Run(a), _) if a.is_full() => None,
            (Run(a), Array(b)) => Some(Run(a.union_with_values(b.values()))),
            (Run(a), Bitmap(b)) => Some(Bitmap(or_bitmap_run(b, a))),
            (Run(a), Run(b)) => Some(Run(a.union_with(b))),
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// In-place intersection. The container may become empty.
    pub fn iand(&mut self, other: &Container) {
        use Container::{Array, Bitmap, Run};
        let replacement = match (&mut *self, other) {
            (Array(a), Array(b)) => {
                kernels::intersect_in_place(a.values_mut(), b.values());
                None
            }
            (Array(a), Bitmap(b)) => {
                iand_values_bitmap(a.values_mut(), b);
                None
            }
            (Array(a), Run(r)) => {
                if !r.is_full() {
                    *a = r.and_array(a.values());
                }
                None
            }
            (Bitmap(a), Array(b)) => Some(Array(and_bitmap_array(a, b.values()))),
            (Bitmap(a), Bitmap(b)) => {
                for (x, y) in a.words_mut().iter_mut().zip(b.words().iter()) {
                    *x &= y;
                }
                a.repair();
                demote_if_small(a)
            }
            (Bitmap(a), Run(r)) => {
                if r.is_full() {
                    None
                } else {
                    iand_bitmap_run(a, r);
                    demote_if_small(a)
                }
            }
            (Run(a), Array(b)) => {
                if a.is_full() {
                    Some(Array(b.clone()))
                } else {
                    Some(Array(a.and_array(b.values())))
                }
            }
            (Run(a), Bitmap(b)) => {
                if a.is_full() {
                    Some(Bitmap(b.clone()))
                } else {
                    let mut masked = b.clone();
                    iand_bitmap_run(&mut masked, a);
                    Some(Container::from_bitmap(masked))
                }
            }
            (Run(a), Run(b)) => Some(Run(a.intersect_with(b))),
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// In-place difference. The container may become empty.
    pub fn iand_not(&mut self, other: &Container) {
        use Container::{Array, Bitmap, Run};
        let replacement = match (&mut *self, other) {
            (Array(a), Array(b)) => {
                kernels::difference_in_place(a.values_mut(), b.values());
                None
            }
            (Array(a), Bitmap(b)) => {
                iand_not_values_bitmap(a.values_mut(), b);
                None
            }
            (Array(a), Run(r)) => {
                *a = and_not_array_run(a.values(), r);
                None
            }
            (Bitmap(a), Array(b)) => {
                for &v in b.values() {
                    a.iremove(v);
                }
                demote_if_small(a)
            }
            (Bitmap(a), Bitmap(b)) => {
                iand_not_bitmap_bitmap(a, b);
                demote_if_small(a)
            }
            (Bitmap(a), Run(r)) => {
                for iv in r.intervals() {
                    a.iremove_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                demote_if_small(a)
            }
            (Run(a), Array(b)) => Some(Run(
                a.difference_with(&RunContainer::from_sorted_array(b.values())),
            )),
            (Run(a), Bitmap(b)) => {
                let mut out = a.to_bitmap();
                iand_not_bitmap_bitmap(&mut out, b);
                Some(Container::from_bitmap(out))
            }
            (Run(a), Run(b)) => Some(Run(a.difference_with(b))),
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// In-place symmetric difference. The container may become empty.
    pub fn ixor(&mut self, other: &Container) {
        use Container::{Array, Bitmap, Run};
        let replacement = match (&mut *self, other) {
            (Array(a), Array(b)) => Some(xor_array_array(a, b)),
            (Array(a), Bitmap(b)) => {
                let mut out = b.clone();
                ixor_bitmap_values(&mut out, a.values());
                Some(Container::from_bitmap(out))
            }
            (Array(a), Run(r)) => Some(xor_run_values(r, a.values())),
            (Bitmap(a), Array(b)) => {
                ixor_bitmap_values(a, b.values());
                demote_if_small(a)
            }
            (Bitmap(a), Bitmap(b)) => {
                for (x, y) in a.words_mut().iter_mut().zip(b.words().iter()) {
                    *x ^= y;
                }
                a.repair();
                demote_if_small(a)
            }
            (Bitmap(a), Run(r)) => {
                for iv in r.intervals() {
                    a.inot_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                demote_if_small(a)
            }
            (Run(a), Array(b)) => Some(xor_run_values(a, b.values())),
            (Run(a), Bitmap(b)) => {
                let mut out = b.clone();
                for iv in a.intervals() {
                    out.inot_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                Some(Container::from_bitmap(out))
            }
            (Run(a), Run(b)) => Some(Run(a.difference_with(b).union_with(&b.difference_with(a)))),
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    // ---- lazy union ----

    /// Union that skips demotion and cardinality maintenance.
    ///
    /// Bitmap results carry the dirty cardinality sentinel; the caller
    /// must run [`Container::repair_after_lazy`] before observing.
    pub fn lazy_or(&self, other: &Container) -> Container {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => {
                if a.cardinality() + b.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
                    let mut bc = a.to_bitmap();
                    for &v in b.values() {
                        bc.set_bit(v);
                    }
                    bc.invalidate_cardinality();
                    Bitmap(bc)
                } else {
                    let mut out = Vec::new();
                    kernels::union2by2(a.values(), b.values(), &mut out);
                    Array(ArrayContainer::from_sorted_vec(out))
                }
            }
            (Array(a), Bitmap(b)) | (Bitmap(b), Array(a)) => {
                let mut out = b.clone();
                for &v in a.values() {
                    out.set_bit(v);
                }
                out.invalidate_cardinality();
                Bitmap(out)
            }
            (Bitmap(a), Bitmap(b)) => {
                let mut out = a.clone();
                for (x, y) in out.words_mut().iter_mut().zip(b.words().iter()) {
                    *x |= y;
                }
                out.invalidate_cardinality();
                Bitmap(out)
            }
            (Bitmap(b), Run(r)) | (Run(r), Bitmap(b)) => {
                if r.is_full() {
                    Run(RunContainer::full())
                } else {
                    let mut out = b.clone();
                    for iv in r.intervals() {
                        kernels::set_bitmap_range(
                            out.words_mut(),
                            usize::from(iv.start),
                            usize::from(iv.last) + 1,
                        );
                    }
                    out.invalidate_cardinality();
                    Bitmap(out)
                }
            }
            _ => self.or(other),
        }
    }

    /// In-place flavor of [`Container::lazy_or`].
    pub fn lazy_ior(&mut self, other: &Container) {
        use Container::{Array, Bitmap, Run};
        let replacement = match (&mut *self, other) {
            (Bitmap(a), Array(b)) => {
                for &v in b.values() {
                    a.set_bit(v);
                }
                a.invalidate_cardinality();
                None
            }
            (Bitmap(a), Bitmap(b)) => {
                for (x, y) in a.words_mut().iter_mut().zip(b.words().iter()) {
                    *x |= y;
                }
                a.invalidate_cardinality();
                None
            }
            (Bitmap(a), Run(r)) => {
                if r.is_full() {
                    Some(Run(RunContainer::full()))
                } else {
                    for iv in r.intervals() {
                        kernels::set_bitmap_range(
                            a.words_mut(),
                            usize::from(iv.start),
                            usize::from(iv.last) + 1,
                        );
                    }
                    a.invalidate_cardinality();
                    None
                }
            }
            (Array(a), Array(b)) => {
                if a.cardinality() + b.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
                    let mut bc = a.to_bitmap();
                    for &v in b.values() {
                        bc.set_bit(v);
                    }
                    bc.invalidate_cardinality();
                    Some(Bitmap(bc))
                } else {
                    kernels::union_in_place(a.values_mut(), b.values());
                    None
                }
            }
            (Array(a), Bitmap(b)) => {
                let mut out = b.clone();
                for &v in a.values() {
                    out.set_bit(v);
                }
                out.invalidate_cardinality();
                Some(Bitmap(out))
            }
            (Array(a), Run(r)) => {
                if r.is_full() {
                    Some(Run(RunContainer::full()))
                } else {
                    Some(Run(r.union_with_values(a.values())))
                }
            }
            (Run(a), _) if a.is_full() => None,
            (Run(a), Array(b)) => Some(Run(a.union_with_values(b.values()))),
            (Run(a), Bitmap(b)) => Some(Bitmap(or_bitmap_run(b, a))),
            (Run(a), Run(b)) => Some(Run(a.union_with(b))),
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }

    /// Reconcile after a lazy union chain: recompute dirty cardinality and
    /// apply the deferred demotion.
    pub fn repair_after_lazy(&mut self) {
        let replacement = match &mut *self {
            Container::Bitmap(bc) => {
                if bc.is_dirty() {
                    bc.repair();
                }
                demote_if_small(bc)
            }
            _ => None,
        };
        if let Some(c) = replacement {
            *self = c;
        }
    }
}

/// Representation-independent set equality.
impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        use Container::{Array, Bitmap, Run};
        match (self, other) {
            (Array(a), Array(b)) => a == b,
            (Bitmap(a), Bitmap(b)) => a.words()[..] == b.words()[..],
            (Run(a), Run(b)) => a == b,
            _ => {
                self.cardinality() == other.cardinality()
                    && self.iter().zip(other.iter()).all(|(x, y)| x == y)
            }
        }
    }
}

impl Eq for Container {}

/// Ascending value iterator over any representation.
pub enum ContainerIter<'a> {
    /// Walks the sorted values directly.
    Array(std::slice::Iter<'a, u16>),
    /// Scans words, clearing the lowest set bit as it goes.
    Bitmap {
        /// The container's word storage.
        words: &'a [u64],
        /// Index of the word currently being drained.
        word_idx: usize,
        /// Remaining bits of the current word.
        current: u64,
    },
    /// Expands intervals one value at a time.
    Run {
        /// Remaining intervals.
        runs: std::slice::Iter<'a, Interval>,
        /// `(next, last)` of the interval being expanded.
        cur: Option<(u32, u32)>,
    },
}

impl Iterator for ContainerIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            ContainerIter::Array(it) => it.next().copied(),
            ContainerIter::Bitmap {
                words,
                word_idx,
                current,
            } => loop {
                if *current != 0 {
                    let t = current.trailing_zeros() as usize;
                    *current &= *current - 1;
                    return Some((*word_idx * 64 + t) as u16);
                }
                if *word_idx + 1 >= words.len() {
                    return None;
                }
                *word_idx += 1;
                *current = words[*word_idx];
            },
            ContainerIter::Run { runs, cur } => {
                if cur.is_none() {
                    let iv = runs.next()?;
                    *cur = Some((u32::from(iv.start), u32::from(iv.last)));
                }
                let (next, last) = match cur {
                    Some(state) => *state,
                    None => return None,
                };
                if next < last {
                    *cur = Some((next + 1, last));
                } else {
                    *cur = None;
                }
                Some(next as u16)
            }
        }
    }
}

// ---- pairwise helpers ----

/// Demotion check shared by the mutating bitmap paths.
fn demote_if_small(bc: &BitmapContainer) -> Option<Container> {
    if bc.cardinality() as usize <= ARRAY_DEFAULT_MAX_SIZE {
        Some(Container::Array(bc.to_array()))
    } else {
        None
    }
}

fn or_array_array(a: &ArrayContainer, b: &ArrayContainer) -> Container {
    if a.cardinality() + b.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
        let mut bc = a.to_bitmap();
        for &v in b.values() {
            bc.set_bit(v);
        }
        bc.repair();
        Container::from_bitmap(bc)
    } else {
        let mut out = Vec::new();
        kernels::union2by2(a.values(), b.values(), &mut out);
        Container::Array(ArrayContainer::from_sorted_vec(out))
    }
}

fn xor_array_array(a: &ArrayContainer, b: &ArrayContainer) -> Container {
    if a.cardinality() + b.cardinality() > ARRAY_DEFAULT_MAX_SIZE {
        let mut bc = a.to_bitmap();
        ixor_bitmap_values(&mut bc, b.values());
        Container::from_bitmap(bc)
    } else {
        let mut out = Vec::new();
        kernels::exclusive_union2by2(a.values(), b.values(), &mut out);
        Container::Array(ArrayContainer::from_sorted_vec(out))
    }
}

/// Run ⊕ values, composed from the two one-sided differences.
fn xor_run_values(r: &RunContainer, values: &[u16]) -> Container {
    let as_runs = RunContainer::from_sorted_array(values);
    let left = r.difference_with(&as_runs);
    let right = as_runs.difference_with(r);
    Container::Run(left.union_with(&right))
}

fn or_bitmap_array(b: &BitmapContainer, values: &[u16]) -> BitmapContainer {
    let mut out = b.clone();
    ior_bitmap_values(&mut out, values);
    out
}

fn ior_bitmap_values(b: &mut BitmapContainer, values: &[u16]) {
    let mut added = 0;
    for &v in values {
        let before = b.bit_value(v);
        b.set_bit(v);
        added += 1 - before as u32;
    }
    let cardinality = b.cardinality() + added;
    b.set_cardinality(cardinality);
}

fn or_bitmap_bitmap(a: &BitmapContainer, b: &BitmapContainer) -> BitmapContainer {
    let mut out = a.clone();
    for (x, y) in out.words_mut().iter_mut().zip(b.words().iter()) {
        *x |= y;
    }
    out.repair();
    out
}

fn or_bitmap_run(b: &BitmapContainer, r: &RunContainer) -> BitmapContainer {
    let mut out = b.clone();
    for iv in r.intervals() {
        out.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
    }
    out
}

fn and_bitmap_bitmap(a: &BitmapContainer, b: &BitmapContainer) -> BitmapContainer {
    let mut out = a.clone();
    for (x, y) in out.words_mut().iter_mut().zip(b.words().iter()) {
        *x &= y;
    }
    out.repair();
    out
}

fn and_not_bitmap_bitmap(a: &BitmapContainer, b: &BitmapContainer) -> BitmapContainer {
    let mut out = a.clone();
    iand_not_bitmap_bitmap(&mut out, b);
    out
}

fn iand_not_bitmap_bitmap(a: &mut BitmapContainer, b: &BitmapContainer) {
    for (x, y) in a.words_mut().iter_mut().zip(b.words().iter()) {
        *x &= !y;
    }
    a.repair();
}

fn xor_bitmap_bitmap(a: &BitmapContainer, b: &BitmapContainer) -> BitmapContainer {
    let mut out = a.clone();
    for (x, y) in out.words_mut().iter_mut().zip(b.words().iter()) {
        *x ^= y;
    }
    out.repair();
    out
}

/// Mask a bitmap down to the values covered by `r` by clearing the gaps
/// between runs. Leaves cardinality repaired.
fn iand_bitmap_run(b: &mut BitmapContainer, r: &RunContainer) {
    let mut gap_start = 0u32;
    for iv in r.intervals() {
        kernels::reset_bitmap_range(b.words_mut(), gap_start as usize, usize::from(iv.start));
        gap_start = u32::from(iv.last) + 1;
    }
    kernels::reset_bitmap_range(b.words_mut(), gap_start as usize, 65_536);
    b.repair();
}

/// Branchless filtered copy: keep the values whose bit is set.
fn and_bitmap_array(b: &BitmapContainer, values: &[u16]) -> ArrayContainer {
    let mut out = vec![0u16; values.len()];
    let mut pos = 0;
    for &v in values {
        out[pos] = v;
        pos += b.bit_value(v) as usize;
    }
    out.truncate(pos);
    ArrayContainer::from_sorted_vec(out)
}

/// Branchless filtered copy: keep the values whose bit is clear.
fn and_not_array_bitmap(values: &[u16], b: &BitmapContainer) -> ArrayContainer {
    let mut out = vec![0u16; values.len()];
    let mut pos = 0;
    for &v in values {
        out[pos] = v;
        pos += 1 - b.bit_value(v) as usize;
    }
    out.truncate(pos);
    ArrayContainer::from_sorted_vec(out)
}

/// Keep the values not covered by any run, probing with a moving index.
fn and_not_array_run(values: &[u16], r: &RunContainer) -> ArrayContainer {
    let runs = r.intervals();
    let mut out = Vec::new();
    let mut i = 0;
    for &v in values {
        while i < runs.len() && runs[i].last < v {
            i += 1;
        }
        if i == runs.len() || runs[i].start > v {
            out.push(v);
        }
    }
    ArrayContainer::from_sorted_vec(out)
}

/// In-place branchless filtered copy over the array's own storage.
fn iand_values_bitmap(values: &mut Vec<u16>, b: &BitmapContainer) {
    let mut pos = 0;
    for k in 0..values.len() {
        let v = values[k];
        values[pos] = v;
        pos += b.bit_value(v) as usize;
    }
    values.truncate(pos);
}

fn iand_not_values_bitmap(values: &mut Vec<u16>, b: &BitmapContainer) {
    let mut pos = 0;
    for k in 0..values.len() {
        let v = values[k];
        values[pos] = v;
        pos += 1 - b.bit_value(v) as usize;
    }
    values.truncate(pos);
}

/// Toggle each value's bit, tracking the cardinality delta.
fn ixor_bitmap_values(b: &mut BitmapContainer, values: &[u16]) {
    let mut delta = 0i64;
    for &v in values {
        let before = b.bit_value(v) as i64;
        let word = &mut b.words_mut()[usize::from(v) >> 6];
        *word ^= 1u64 << (v % 64);
        delta += 1 - 2 * before;
    }
    let cardinality = (i64::from(b.cardinality()) + delta) as u32;
    b.set_cardinality(cardinality);
}

/// Overlap cardinality of two interval sequences, without materializing.
fn run_and_run_cardinality(a: &RunContainer, b: &RunContainer) -> u32 {
    let (x, y) = (a.intervals(), b.intervals());
    let mut i = 0;
    let mut j = 0;
    let mut n = 0u32;
    while i < x.len() && j < y.len() {
        let lo = x[i].start.max(y[j].start);
        let hi = x[i].last.min(y[j].last);
        if lo <= hi {
            n += u32::from(hi) - u32::from(lo) + 1;
        }
        if x[i].last <= y[j].last {
            i += 1;
        } else {
            j += 1;
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn array_of(values: &[u16]) -> Container {
        Container::Array(ArrayContainer::from_sorted_vec(values.to_vec()))
    }

    fn bitmap_of(values: &[u16]) -> Container {
        let mut bc = BitmapContainer::new();
        for &v in values {
            bc.iadd(v);
        }
        Container::Bitmap(bc)
    }

    fn run_of(values: &[u16]) -> Container {
        Container::Run(RunContainer::from_sorted_array(values))
    }

    fn reference_or(a: &[u16], b: &[u16]) -> Vec<u16> {
        let mut v: Vec<u16> = a.iter().chain(b.iter()).copied().collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    fn reference_and(a: &[u16], b: &[u16]) -> Vec<u16> {
        a.iter().copied().filter(|v| b.contains(v)).collect()
    }

    fn reference_and_not(a: &[u16], b: &[u16]) -> Vec<u16> {
        a.iter().copied().filter(|v| !b.contains(v)).collect()
    }

    fn reference_xor(a: &[u16], b: &[u16]) -> Vec<u16> {
        let mut v: Vec<u16> = a
            .iter()
            .copied()
            .filter(|x| !b.contains(x))
            .chain(b.iter().copied().filter(|x| !a.contains(x)))
            .collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    fn sample_sets() -> (Vec<u16>, Vec<u16>) {
        let a: Vec<u16> = (0..600).map(|i| i * 3).collect();
        let mut b: Vec<u16> = (0..500).map(|i| i * 4 + 2).chain(1200..1400).collect();
        b.sort_unstable();
        b.dedup();
        (a, b)
    }

    #[test]
    fn test_all_pairs_match_reference() {
        let (a_vals, b_vals) = sample_sets();
        let builders: [fn(&[u16]) -> Container; 3] = [array_of, bitmap_of, run_of];
        for build_a in builders {
            for build_b in builders {
                let a = build_a(&a_vals);
                let b = build_b(&b_vals);
                assert_eq!(
                    a.or(&b).iter().collect::<Vec<_>>(),
                    reference_or(&a_vals, &b_vals)
                );
                assert_eq!(
                    a.and(&b).iter().collect::<Vec<_>>(),
                    reference_and(&a_vals, &b_vals)
                );
                assert_eq!(
                    a.and_not(&b).iter().collect::<Vec<_>>(),
                    reference_and_not(&a_vals, &b_vals)
                );
                assert_eq!(
                    a.xor(&b).iter().collect::<Vec<_>>(),
                    reference_xor(&a_vals, &b_vals)
                );
                assert_eq!(
                    a.and_cardinality(&b) as usize,
                    reference_and(&a_vals, &b_vals).len()
                );
                assert_eq!(
                    a.or_cardinality(&b) as usize,
                    reference_or(&a_vals, &b_vals).len()
                );
            }
        }
    }

    #[test]
    fn test_all_pairs_in_place_match_reference() {
        let (a_vals, b_vals) = sample_sets();
        let builders: [fn(&[u16]) -> Container; 3] = [array_of, bitmap_of, run_of];
        for build_a in builders {
            for build_b in builders {
                let b = build_b(&b_vals);

                let mut c = build_a(&a_vals);
                c.ior(&b);
                assert_eq!(c.iter().collect::<Vec<_>>(), reference_or(&a_vals, &b_vals));

                let mut c = build_a(&a_vals);
                c.iand(&b);
                assert_eq!(c.iter().collect::<Vec<_>>(), reference_and(&a_vals, &b_vals));

                let mut c = build_a(&a_vals);
                c.iand_not(&b);
                assert_eq!(
                    c.iter().collect::<Vec<_>>(),
                    reference_and_not(&a_vals, &b_vals)
                );

                let mut c = build_a(&a_vals);
                c.ixor(&b);
                assert_eq!(c.iter().collect::<Vec<_>>(), reference_xor(&a_vals, &b_vals));
            }
        }
    }

    #[test]
    fn test_tail_append_overshoots_then_promotes() {
        // 4096 even values; a tail append rides one past the limit.
        let mut c = Container::Array(ArrayContainer::from_sorted_vec(
            (0..4096u32).map(|i| (i * 2) as u16).collect(),
        ));
        assert!(c.iadd(8191));
        assert_eq!(c.container_type(), ContainerType::Array);
        assert_eq!(c.cardinality(), 4097);
        // The next insert densifies.
        assert!(c.iadd(8192));
        assert_eq!(c.container_type(), ContainerType::Bitmap);
        assert_eq!(c.cardinality(), 4098);
    }

    #[test]
    fn test_non_append_insert_promotes_at_limit() {
        let mut c = Container::Array(ArrayContainer::from_sorted_vec(
            (0..4096u32).map(|i| (i * 2) as u16).collect(),
        ));
        assert!(!c.iadd(0));
        assert_eq!(c.container_type(), ContainerType::Array);
        assert!(c.iadd(1));
        assert_eq!(c.container_type(), ContainerType::Bitmap);
        assert_eq!(c.cardinality(), 4097);
    }

    #[test]
    fn test_demotion_on_iremove() {
        let mut c = Container::Array(ArrayContainer::from_sorted_vec(
            (0..4096u32).map(|i| (i * 2) as u16).collect(),
        ));
        c.iadd(1);
        assert_eq!(c.container_type(), ContainerType::Bitmap);
        assert!(c.iremove(1));
        assert_eq!(c.container_type(), ContainerType::Array);
        assert_eq!(c.cardinality(), 4096);
    }

    #[test]
    fn test_to_efficient_container() {
        // One long run: run form is far smaller than either alternative.
        let c = Container::from_range(0, 65_536);
        let eff = c.to_efficient_container();
        assert_eq!(eff.container_type(), ContainerType::Run);
        assert!(eff.is_full());

        // Scattered values: array form wins.
        let scattered = array_of(&[1, 100, 200, 3000]);
        assert_eq!(
            scattered.to_efficient_container().container_type(),
            ContainerType::Array
        );

        // Dense but runless alternating bits: bitmap form wins.
        let mut bc = BitmapContainer::new();
        for v in 0..10_000u32 {
            bc.iadd((v * 2) as u16);
        }
        let dense = Container::Bitmap(bc);
        assert_eq!(
            dense.to_efficient_container().container_type(),
            ContainerType::Bitmap
        );
    }

    #[test]
    fn test_cross_representation_equality() {
        let values: Vec<u16> = (100..200).chain(500..550).collect();
        let a = array_of(&values);
        let b = bitmap_of(&values);
        let r = run_of(&values);
        assert_eq!(a, b);
        assert_eq!(b, r);
        assert_eq!(a, r);

        let other = array_of(&[1, 2, 3]);
        assert_ne!(a, other);
    }

    #[test]
    fn test_lazy_or_and_repair() {
        let a_vals: Vec<u16> = (0..3000).map(|i| (i * 2) as u16).collect();
        let b_vals: Vec<u16> = (0..3000).map(|i| (i * 2 + 1) as u16).collect();
        let a = array_of(&a_vals);
        let b = array_of(&b_vals);

        let mut lazy = a.lazy_or(&b);
        // The lazy path goes through a bitmap without counting bits.
        assert_eq!(lazy.container_type(), ContainerType::Bitmap);
        lazy.repair_after_lazy();
        assert_eq!(lazy.cardinality(), 6000);
        assert_eq!(lazy, a.or(&b));

        // A lazy chain that ends small must demote on repair.
        let small_a = array_of(&[1, 2]);
        let small_b = bitmap_of(&[3]);
        let mut lazy = small_a.lazy_or(&small_b);
        lazy.repair_after_lazy();
        assert_eq!(lazy.container_type(), ContainerType::Array);
        assert_eq!(lazy.iter().collect::<Vec<_>>(), vec![1, 2, 3]);

        // In-place flavor over a mixed chain.
        let mut acc = bitmap_of(&a_vals);
        acc.lazy_ior(&array_of(&b_vals));
        acc.lazy_ior(&run_of(&[60_000, 60_001]));
        acc.repair_after_lazy();
        assert_eq!(acc.cardinality(), 6002);
    }

    #[test]
    fn test_inot_promotes_and_demotes() {
        let mut c = array_of(&[0, 2, 4]);
        c.inot(0, 8192);
        assert_eq!(c.container_type(), ContainerType::Bitmap);
        assert_eq!(c.cardinality(), 8192 - 3);
        c.inot(0, 8192);
        assert_eq!(c.container_type(), ContainerType::Array);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn test_full_run_short_circuits() {
        let full = Container::Run(RunContainer::full());
        let a = array_of(&[5, 10]);
        assert!(a.or(&full).is_full());
        assert_eq!(a.and(&full), a);
        let b = bitmap_of(&(0..5000).map(|i| i as u16).collect::<Vec<_>>());
        assert!(b.or(&full).is_full());
        assert_eq!(b.and(&full), b);
    }

    #[test]
    fn test_add_offset_dispatch() {
        let c = array_of(&[0, 1, 65_535]);
        let (low, high) = c.add_offset(10);
        assert_eq!(low.unwrap().iter().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(high.unwrap().iter().collect::<Vec<_>>(), vec![9]);
    }
}
