//! The mutable 32-bit set and its pairwise top-level walks.
//!
//! A [`RoaringBitmap`] is an ordered index of 16-bit keys, each owning one
//! container for the matching chunk. Binary operations drive two indexes
//! through a lockstep walk, galloping over key gaps, and route each
//! matching pair through the container dispatch layer.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::container::{ArrayContainer, Container, ARRAY_DEFAULT_MAX_SIZE};
use crate::index::RoaringArray;

/// Split an element into its (high16, low16) halves.
#[inline]
pub(crate) fn split(x: u32) -> (u16, u16) {
    ((x >> 16) as u16, x as u16)
}

/// Rebuild an element from its halves.
#[inline]
pub(crate) fn join(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Compressed set of `u32` values.
///
/// Cloning is cheap: containers are shared copy-on-write between the
/// clones and only materialize on first mutation.
#[derive(Debug, Clone, Default)]
pub struct RoaringBitmap {
    pub(crate) index: RoaringArray,
}

impl RoaringBitmap {
    pub fn new() -> Self {
        RoaringBitmap {
            index: RoaringArray::new(),
        }
    }

    /// Insert `x`, returning whether it was newly added.
    pub fn add(&mut self, x: u32) -> bool {
        let (high, low) = split(x);
        match self.index.position_of_key(high) {
            Ok(i) => self.index.get_writable_container_at(i).iadd(low),
            Err(i) => {
                let ac = ArrayContainer::from_sorted_vec(vec![low]);
                self.index.insert_at(i, high, Arc::new(Container::Array(ac)));
                true
            }
        }
    }

    /// Remove `x`, returning whether it was present.
    pub fn remove(&mut self, x: u32) -> bool {
        let (high, low) = split(x);
        match self.index.position_of_key(high) {
            Ok(i) => {
                let removed = self.index.get_writable_container_at(i).iremove(low);
                if removed && self.index.container_at(i).is_empty() {
                    self.index.remove_at(i);
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, x: u32) -> bool {
        let (high, low) = split(x);
        match self.index.position_of_key(high) {
            Ok(i) => self.index.container_at(i).contains(low),
            Err(_) => false,
        }
    }

    /// Number of values in the set.
    pub fn cardinality(&self) -> u64 {
        self.index
            .entries()
            .map(|(_, c)| u64::from(c.cardinality()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn min(&self) -> Option<u32> {
        if self.index.is_empty() {
            return None;
        }
        Some(join(self.index.key_at(0), self.index.container_at(0).min()))
    }

    pub fn max(&self) -> Option<u32> {
        if self.index.is_empty() {
            return None;
        }
        let i = self.index.len() - 1;
        Some(join(self.index.key_at(i), self.index.container_at(i).max()))
    }

    /// Count of values `<= x`.
    pub fn rank(&self, x: u32) -> u64 {
        let (high, low) = split(x);
        let mut r = 0u64;
        for (key, c) in self.index.entries() {
            match key.cmp(&high) {
                Ordering::Less => r += u64::from(c.cardinality()),
                Ordering::Equal => {
                    r += c.rank(low) as u64;
                    break;
                }
                Ordering::Greater => break,
            }
        }
        r
    }

    /// The `n`-th smallest value (zero-based), if any.
    pub fn select(&self, n: u64) -> Option<u32> {
        let mut remaining = n;
        for (key, c) in self.index.entries() {
            let card = u64::from(c.cardinality());
            if remaining < card {
                return Some(join(key, c.select(remaining as usize)));
            }
            remaining -= card;
        }
        None
    }

    /// All values, ascending.
    pub fn to_vec(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.cardinality() as usize);
        for (key, c) in self.index.entries() {
            let base = u32::from(key) << 16;
            out.extend(c.iter().map(|low| base | u32::from(low)));
        }
        out
    }

    /// Add every value in `[lo, hi)`.
    pub fn add_range(&mut self, lo: u32, hi: u32) {
        if lo >= hi {
            return;
        }
        let (first_key, _) = split(lo);
        let (last_key, _) = split(hi - 1);
        for key in first_key..=last_key {
            let chunk_lo = if key == first_key {
                u32::from(split(lo).1)
            } else {
                0
            };
            let chunk_hi = if key == last_key {
                u32::from(split(hi - 1).1) + 1
            } else {
                65_536
            };
            match self.index.position_of_key(key) {
                Ok(i) => self
                    .index
                    .get_writable_container_at(i)
                    .iadd_range(chunk_lo, chunk_hi),
                Err(i) => self.index.insert_at(
                    i,
                    key,
                    Arc::new(Container::from_range(chunk_lo, chunk_hi)),
                ),
            }
        }
    }

    /// Remove every value in `[lo, hi)`.
    pub fn remove_range(&mut self, lo: u32, hi: u32) {
        if lo >= hi {
            return;
        }
        let (first_key, _) = split(lo);
        let (last_key, _) = split(hi - 1);
        for key in first_key..=last_key {
            let chunk_lo = if key == first_key {
                u32::from(split(lo).1)
            } else {
                0
            };
            let chunk_hi = if key == last_key {
                u32::from(split(hi - 1).1) + 1
            } else {
                65_536
            };
            if let Ok(i) = self.index.position_of_key(key) {
                self.index
                    .get_writable_container_at(i)
                    .iremove_range(chunk_lo, chunk_hi);
                if self.index.container_at(i).is_empty() {
                    self.index.remove_at(i);
                }
            }
        }
    }

    // ---- allocating set algebra ----

    /// Union. Containers present on only one side are shared, not copied.
    pub fn or(&self, other: &RoaringBitmap) -> RoaringBitmap {
        let mut out = RoaringArray::new();
        let (len1, len2) = (self.index.len(), other.index.len());
        let (mut i, mut j) = (0, 0);
        while i < len1 && j < len2 {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => {
                    out.append(k1, Arc::clone(self.index.arc_at(i)));
                    i += 1;
                }
                Ordering::Greater => {
                    out.append(k2, Arc::clone(other.index.arc_at(j)));
                    j += 1;
                }
                Ordering::Equal => {
                    let c = self.index.container_at(i).or(other.index.container_at(j));
                    out.append(k1, Arc::new(c));
                    i += 1;
                    j += 1;
                }
            }
        }
        while i < len1 {
            out.append(self.index.key_at(i), Arc::clone(self.index.arc_at(i)));
            i += 1;
        }
        while j < len2 {
            out.append(other.index.key_at(j), Arc::clone(other.index.arc_at(j)));
            j += 1;
        }
        RoaringBitmap { index: out }
    }

    /// Intersection. Key gaps are skipped with galloping advances.
    pub fn and(&self, other: &RoaringBitmap) -> RoaringBitmap {
        let mut out = RoaringArray::new();
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => i = self.index.advance_until(k2, i),
                Ordering::Greater => j = other.index.advance_until(k1, j),
                Ordering::Equal => {
                    let c = self.index.container_at(i).and(other.index.container_at(j));
                    if !c.is_empty() {
                        out.append(k1, Arc::new(c));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        RoaringBitmap { index: out }
    }

    /// Difference. Left-only containers are retained by sharing.
    pub fn and_not(&self, other: &RoaringBitmap) -> RoaringBitmap {
        let mut out = RoaringArray::new();
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => {
                    out.append(k1, Arc::clone(self.index.arc_at(i)));
                    i += 1;
                }
                Ordering::Greater => j = other.index.advance_until(k1, j),
                Ordering::Equal => {
                    let c = self
                        .index
                        .container_at(i)
                        .and_not(other.index.container_at(j));
                    if !c.is_empty() {
                        out.append(k1, Arc::new(c));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        while i < self.index.len() {
            out.append(self.index.key_at(i), Arc::clone(self.index.arc_at(i)));
            i += 1;
        }
        RoaringBitmap { index: out }
    }

    /// Symmetric difference.
    pub fn xor(&self, other: &RoaringBitmap) -> RoaringBitmap {
        let mut out = RoaringArray::new();
        let (len1, len2) = (self.index.len(), other.index.len());
        let (mut i, mut j) = (0, 0);
        while i < len1 && j < len2 {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => {
                    out.append(k1, Arc::clone(self.index.arc_at(i)));
                    i += 1;
                }
                Ordering::Greater => {
                    out.append(k2, Arc::clone(other.index.arc_at(j)));
                    j += 1;
                }
                Ordering::Equal => {
                    let c = self.index.container_at(i).xor(other.index.container_at(j));
                    if !c.is_empty() {
                        out.append(k1, Arc::new(c));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        while i < len1 {
            out.append(self.index.key_at(i), Arc::clone(self.index.arc_at(i)));
            i += 1;
        }
        while j < len2 {
            out.append(other.index.key_at(j), Arc::clone(other.index.arc_at(j)));
            j += 1;
        }
        RoaringBitmap { index: out }
    }

    /// `|self ∩ other|` without materializing the intersection.
    pub fn and_cardinality(&self, other: &RoaringBitmap) -> u64 {
        let mut n = 0u64;
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => i = self.index.advance_until(k2, i),
                Ordering::Greater => j = other.index.advance_until(k1, j),
                Ordering::Equal => {
                    n += u64::from(
                        self.index
                            .container_at(i)
                            .and_cardinality(other.index.container_at(j)),
                    );
                    i += 1;
                    j += 1;
                }
            }
        }
        n
    }

    /// `|self ∪ other|` without materializing the union.
    pub fn or_cardinality(&self, other: &RoaringBitmap) -> u64 {
        self.cardinality() + other.cardinality() - self.and_cardinality(other)
    }

    // ---- in-place set algebra ----

    /// In-place union.
    pub fn ior(&mut self, other: &RoaringBitmap) {
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => i += 1,
                Ordering::Greater => {
                    self.index.insert_at(i, k2, Arc::clone(other.index.arc_at(j)));
                    i += 1;
                    j += 1;
                }
                Ordering::Equal => {
                    self.index
                        .get_writable_container_at(i)
                        .ior(other.index.container_at(j));
                    i += 1;
                    j += 1;
                }
            }
        }
        while j < other.index.len() {
            self.index
                .append(other.index.key_at(j), Arc::clone(other.index.arc_at(j)));
            j += 1;
        }
    }

    /// In-place intersection.
    pub fn iand(&mut self, other: &RoaringBitmap) {
        let entries = std::mem::take(&mut self.index);
        let mut result = RoaringArray::new();
        let mut j = 0;
        for (key, mut arc) in entries.into_entries() {
            j = other.index.advance_until(key, j);
            if j < other.index.len() && other.index.key_at(j) == key {
                let c = Arc::make_mut(&mut arc);
                c.iand(other.index.container_at(j));
                if !c.is_empty() {
                    result.append(key, arc);
                }
            }
        }
        self.index = result;
    }

    /// In-place difference.
    pub fn iand_not(&mut self, other: &RoaringBitmap) {
        let entries = std::mem::take(&mut self.index);
        let mut result = RoaringArray::new();
        let mut j = 0;
        for (key, mut arc) in entries.into_entries() {
            j = other.index.advance_until(key, j);
            if j < other.index.len() && other.index.key_at(j) == key {
                let c = Arc::make_mut(&mut arc);
                c.iand_not(other.index.container_at(j));
                if !c.is_empty() {
                    result.append(key, arc);
                }
            } else {
                result.append(key, arc);
            }
        }
        self.index = result;
    }

    /// In-place symmetric difference.
    pub fn ixor(&mut self, other: &RoaringBitmap) {
        let entries = std::mem::take(&mut self.index);
        let mut left = entries.into_entries().peekable();
        let mut result = RoaringArray::new();
        let mut j = 0;
        loop {
            let next_left_key = left.peek().map(|&(k, _)| k);
            match (next_left_key, j < other.index.len()) {
                (None, false) => break,
                (Some(_), false) => {
                    for (key, arc) in left.by_ref() {
                        result.append(key, arc);
                    }
                }
                (None, true) => {
                    result.append(other.index.key_at(j), Arc::clone(other.index.arc_at(j)));
                    j += 1;
                }
                (Some(k1), true) => {
                    let k2 = other.index.key_at(j);
                    match k1.cmp(&k2) {
                        Ordering::Less => {
                            if let Some((key, arc)) = left.next() {
                                result.append(key, arc);
                            }
                        }
                        Ordering::Greater => {
                            result.append(k2, Arc::clone(other.index.arc_at(j)));
                            j += 1;
                        }
                        Ordering::Equal => {
                            if let Some((key, mut arc)) = left.next() {
                                let c = Arc::make_mut(&mut arc);
                                c.ixor(other.index.container_at(j));
                                if !c.is_empty() {
                                    result.append(key, arc);
                                }
                            }
                            j += 1;
                        }
                    }
                }
            }
        }
        self.index = result;
    }

    /// Multi-way union through the lazy path: cardinality bookkeeping and
    /// demotions are deferred to a single repair sweep at the end.
    pub fn fast_or(bitmaps: &[&RoaringBitmap]) -> RoaringBitmap {
        let mut result = match bitmaps.split_first() {
            None => return RoaringBitmap::new(),
            Some((first, rest)) => {
                let mut acc = (*first).clone();
                for b in rest {
                    acc.lazy_ior(b);
                }
                acc
            }
        };
        result.repair_after_lazy();
        result
    }

    /// Lazy in-place union; containers may be left with dirty cardinality.
    fn lazy_ior(&mut self, other: &RoaringBitmap) {
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            let k1 = self.index.key_at(i);
            let k2 = other.index.key_at(j);
            match k1.cmp(&k2) {
                Ordering::Less => i += 1,
                Ordering::Greater => {
                    self.index.insert_at(i, k2, Arc::clone(other.index.arc_at(j)));
                    i += 1;
                    j += 1;
                }
                Ordering::Equal => {
                    self.index
                        .get_writable_container_at(i)
                        .lazy_ior(other.index.container_at(j));
                    i += 1;
                    j += 1;
                }
            }
        }
        while j < other.index.len() {
            self.index
                .append(other.index.key_at(j), Arc::clone(other.index.arc_at(j)));
            j += 1;
        }
    }

    /// Reconcile every container left dirty or undemoted by a lazy chain.
    fn repair_after_lazy(&mut self) {
        for i in 0..self.index.len() {
            let needs_repair = match self.index.container_at(i) {
                Container::Bitmap(bc) => {
                    bc.is_dirty() || bc.cardinality() as usize <= ARRAY_DEFAULT_MAX_SIZE
                }
                _ => false,
            };
            if needs_repair {
                self.index.get_writable_container_at(i).repair_after_lazy();
            }
        }
    }

    /// Replace every container with its smallest serialized form.
    pub fn run_optimize(&mut self) {
        for i in 0..self.index.len() {
            let current = self.index.container_at(i);
            let efficient = current.to_efficient_container();
            if efficient.container_type() != current.container_type() {
                self.index.replace_container_at(i, Arc::new(efficient));
            }
        }
    }

    /// The set `{ x + offset | x ∈ self }`, dropping values that leave
    /// the 32-bit domain.
    pub fn add_offset(&self, offset: i64) -> RoaringBitmap {
        let low_shift = offset.rem_euclid(65_536) as u16;
        let high_shift = (offset - i64::from(low_shift)) >> 16;
        let mut out = RoaringArray::new();
        for (key, c) in self.index.entries() {
            let base = i64::from(key) + high_shift;
            let (low, high) = c.add_offset(low_shift);
            if let Some(c) = low {
                if (0..=65_535).contains(&base) {
                    out.append_or_merge(base as u16, c);
                }
            }
            if let Some(c) = high {
                if (0..=65_535).contains(&(base + 1)) {
                    out.append_or_merge((base + 1) as u16, c);
                }
            }
        }
        RoaringBitmap { index: out }
    }
}

impl PartialEq for RoaringBitmap {
    fn eq(&self, other: &Self) -> bool {
        self.index.len() == other.index.len()
            && self
                .index
                .entries()
                .zip(other.index.entries())
                .all(|((k1, c1), (k2, c2))| k1 == k2 && c1 == c2)
    }
}

impl Eq for RoaringBitmap {}

impl FromIterator<u32> for RoaringBitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut rb = RoaringBitmap::new();
        for x in iter {
            rb.add(x);
        }
        rb
    }
}

impl Extend<u32> for RoaringBitmap {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for x in iter {
            self.add(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_union_singleton() {
        let empty = RoaringBitmap::new();
        let mut single = RoaringBitmap::new();
        single.add(5);
        let union = empty.or(&single);
        assert_eq!(union.cardinality(), 1);
        assert_eq!(union.to_vec(), vec![5]);
    }

    #[test]
    fn test_small_set_algebra() {
        let l: RoaringBitmap = [1u32, 3, 5, 7].into_iter().collect();
        let r: RoaringBitmap = [3u32, 7, 11].into_iter().collect();
        assert_eq!(l.or(&r).to_vec(), vec![1, 3, 5, 7, 11]);
        assert_eq!(l.and(&r).to_vec(), vec![3, 7]);
        assert_eq!(l.and_not(&r).to_vec(), vec![1, 5]);
        assert_eq!(l.xor(&r).to_vec(), vec![1, 5, 11]);
        assert_eq!(l.and_cardinality(&r), 2);
        assert_eq!(l.or_cardinality(&r), 5);
    }

    #[test]
    fn test_multi_chunk_operations() {
        let a: RoaringBitmap = (0..200_000u32).step_by(3).collect();
        let b: RoaringBitmap = (0..200_000u32).step_by(5).collect();
        let union = a.or(&b);
        let inter = a.and(&b);
        assert_eq!(
            union.cardinality() + inter.cardinality(),
            a.cardinality() + b.cardinality()
        );
        assert_eq!(inter.to_vec(), (0..200_000u32).step_by(15).collect::<Vec<_>>());

        let mut c = a.clone();
        c.ior(&b);
        assert_eq!(c, union);

        let mut c = a.clone();
        c.iand(&b);
        assert_eq!(c, inter);

        let mut c = a.clone();
        c.iand_not(&b);
        assert_eq!(c, a.and_not(&b));

        let mut c = a.clone();
        c.ixor(&b);
        assert_eq!(c, a.xor(&b));
    }

    #[test]
    fn test_remove_drops_empty_containers() {
        let mut rb = RoaringBitmap::new();
        rb.add(70_000);
        assert_eq!(rb.cardinality(), 1);
        assert!(rb.remove(70_000));
        assert!(rb.is_empty());
        assert!(!rb.remove(70_000));
    }

    #[test]
    fn test_min_max_rank_select() {
        let rb: RoaringBitmap = [10u32, 100_000, 4_000_000_000].into_iter().collect();
        assert_eq!(rb.min(), Some(10));
        assert_eq!(rb.max(), Some(4_000_000_000));
        assert_eq!(rb.rank(9), 0);
        assert_eq!(rb.rank(10), 1);
        assert_eq!(rb.rank(100_000), 2);
        assert_eq!(rb.rank(u32::MAX), 3);
        assert_eq!(rb.select(0), Some(10));
        assert_eq!(rb.select(2), Some(4_000_000_000));
        assert_eq!(rb.select(3), None);
    }

    #[test]
    fn test_add_range_spanning_chunks() {
        let mut rb = RoaringBitmap::new();
        rb.add_range(60_000, 200_000);
        assert_eq!(rb.cardinality(), 140_000);
        assert!(rb.contains(60_000));
        assert!(rb.contains(199_999));
        assert!(!rb.contains(200_000));

        rb.remove_range(65_000, 199_000);
        assert_eq!(rb.cardinality(), 140_000 - (199_000 - 65_000));
        assert!(rb.contains(64_999));
        assert!(!rb.contains(65_000));
        assert!(rb.contains(199_000));
    }

    #[test]
    fn test_cow_clone_independence() {
        let mut b1: RoaringBitmap = (0..10_000u32).collect();
        let b2 = b1.clone();
        b1.add(1_000_000);
        b1.remove(0);
        assert_eq!(b2.cardinality(), 10_000);
        assert!(b2.contains(0));
        assert!(!b2.contains(1_000_000));
        // And the reverse direction.
        let mut b3 = b2.clone();
        b3.remove(1);
        assert!(b2.contains(1));
    }

    #[test]
    fn test_fast_or_matches_pairwise() {
        let a: RoaringBitmap = (0..5000u32).map(|i| i * 2).collect();
        let b: RoaringBitmap = (0..5000u32).map(|i| i * 2 + 1).collect();
        let c: RoaringBitmap = (100_000..130_000u32).collect();
        let fast = RoaringBitmap::fast_or(&[&a, &b, &c]);
        let slow = a.or(&b).or(&c);
        assert_eq!(fast, slow);
        assert_eq!(fast.cardinality(), 40_000);
        assert!(RoaringBitmap::fast_or(&[]).is_empty());
    }

    #[test]
    fn test_add_offset() {
        let rb: RoaringBitmap = [0u32, 1, 65_535, 65_536, 1_000_000].into_iter().collect();
        let shifted = rb.add_offset(10);
        assert_eq!(shifted.to_vec(), vec![10, 11, 65_545, 65_546, 1_000_010]);

        let back = shifted.add_offset(-10);
        assert_eq!(back, rb);

        // Values shifted past the domain are dropped.
        let top: RoaringBitmap = [u32::MAX].into_iter().collect();
        assert!(top.add_offset(1).is_empty());
        let bottom: RoaringBitmap = [0u32].into_iter().collect();
        assert!(bottom.add_offset(-1).is_empty());
    }

    #[test]
    fn test_run_optimize_full_chunk() {
        let mut rb = RoaringBitmap::new();
        rb.add_range(65_536, 131_072);
        rb.run_optimize();
        assert_eq!(rb.cardinality(), 65_536);
        assert_eq!(rb.index.len(), 1);
        assert!(rb.index.container_at(0).is_full());
        assert_eq!(rb.index.container_at(0).number_of_runs(), 1);
    }
}
