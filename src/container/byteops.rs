//! Set operations executed directly against serialized container bytes.
//!
//! The right-hand operand of `or_bytes`, `ior_bytes` and
//! `and_cardinality_bytes` is a container payload exactly as it sits in a
//! serialized bitmap. A [`SerializedContainer`] lays typed accessors over
//! the slice — unaligned little-endian loads, no materialization — and the
//! kernels below walk those accessors the same way their decoded twins
//! walk container storage. Results are bit-for-bit identical to
//! decode-then-operate.

use byteorder::{ByteOrder, LittleEndian};

use crate::container::run::merge_interval_streams;
use crate::container::{
    ArrayContainer, BitmapContainer, Container, Interval, RunContainer, ARRAY_DEFAULT_MAX_SIZE,
};
use crate::kernels::{advance_until, BITMAP_WORDS, GALLOP_THRESHOLD};

/// Typed view over one serialized container payload.
///
/// The tag comes from the run bitmap and the descriptive header: run
/// containers are flagged explicitly, and the array/bitmap split follows
/// the cardinality threshold, exactly as the wire format defines it.
pub enum SerializedContainer<'a> {
    /// Sorted values, two bytes each.
    Array(ArrayBytes<'a>),
    /// 1024 words, eight bytes each.
    Bitmap(BitmapBytes<'a>),
    /// Run count then `(start, length-1)` pairs.
    Run(RunBytes<'a>),
}

impl<'a> SerializedContainer<'a> {
    pub fn new(is_run: bool, card_minus_one: u16, bytes: &'a [u8]) -> SerializedContainer<'a> {
        if is_run {
            SerializedContainer::Run(RunBytes { bytes })
        } else if (card_minus_one as usize) < ARRAY_DEFAULT_MAX_SIZE {
            SerializedContainer::Array(ArrayBytes {
                bytes,
                len: card_minus_one as usize + 1,
            })
        } else {
            SerializedContainer::Bitmap(BitmapBytes {
                bytes,
                cardinality: u32::from(card_minus_one) + 1,
            })
        }
    }

    pub fn cardinality(&self) -> u32 {
        match self {
            SerializedContainer::Array(av) => av.len as u32,
            SerializedContainer::Bitmap(bv) => bv.cardinality,
            SerializedContainer::Run(rv) => rv.cardinality(),
        }
    }

    pub fn contains(&self, v: u16) -> bool {
        match self {
            SerializedContainer::Array(av) => av.binary_search(v),
            SerializedContainer::Bitmap(bv) => bv.bit_value(v) != 0,
            SerializedContainer::Run(rv) => rv.contains(v),
        }
    }

    /// Materialize an owned container. This is the adoption path for
    /// views; the byte-op kernels themselves never call it.
    pub fn to_container(&self) -> Container {
        match self {
            SerializedContainer::Array(av) => {
                Container::Array(ArrayContainer::from_sorted_vec(av.values().collect()))
            }
            SerializedContainer::Bitmap(bv) => {
                Container::Bitmap(bitmap_from_view(bv))
            }
            SerializedContainer::Run(rv) => Container::Run(RunContainer::from_intervals_unchecked(
                rv.intervals().collect(),
            )),
        }
    }
}

/// Sorted `u16` values in wire order.
pub struct ArrayBytes<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl ArrayBytes<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn value(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.bytes[2 * i..])
    }

    pub fn values(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len).map(|i| self.value(i))
    }

    fn binary_search(&self, v: u16) -> bool {
        let mut lo = 0;
        let mut hi = self.len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.value(mid).cmp(&v) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    /// First index `i >= from` with `value(i) >= target`, or `len`.
    fn advance_until(&self, from: usize, target: u16) -> usize {
        let end = self.len;
        let mut lower = from;
        if lower >= end {
            return end;
        }
        if self.value(lower) >= target {
            return lower;
        }
        let mut span = 1;
        while lower + span < end && self.value(lower + span) < target {
            span *= 2;
        }
        let upper = if lower + span < end { lower + span } else { end };
        lower += span / 2;
        let mut lo = lower;
        let mut hi = upper;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value(mid) < target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }
}

/// 1024 little-endian words in wire order.
pub struct BitmapBytes<'a> {
    bytes: &'a [u8],
    cardinality: u32,
}

impl BitmapBytes<'_> {
    #[inline]
    pub fn word(&self, i: usize) -> u64 {
        LittleEndian::read_u64(&self.bytes[8 * i..])
    }

    #[inline]
    pub fn bit_value(&self, v: u16) -> u64 {
        (self.word(usize::from(v) >> 6) >> (v % 64)) & 1
    }
}

/// Run count plus `(start, length-1)` pairs in wire order.
pub struct RunBytes<'a> {
    bytes: &'a [u8],
}

impl RunBytes<'_> {
    #[inline]
    pub fn n_runs(&self) -> usize {
        usize::from(LittleEndian::read_u16(self.bytes))
    }

    #[inline]
    pub fn run(&self, i: usize) -> Interval {
        let start = LittleEndian::read_u16(&self.bytes[2 + 4 * i..]);
        let len_minus_one = LittleEndian::read_u16(&self.bytes[4 + 4 * i..]);
        Interval {
            start,
            last: start + len_minus_one,
        }
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        (0..self.n_runs()).map(|i| self.run(i))
    }

    pub fn cardinality(&self) -> u32 {
        self.intervals().map(|iv| iv.len()).sum()
    }

    pub fn is_full(&self) -> bool {
        self.n_runs() == 1 && {
            let iv = self.run(0);
            iv.start == 0 && iv.last == u16::MAX
        }
    }

    fn contains(&self, v: u16) -> bool {
        let mut lo = 0;
        let mut hi = self.n_runs();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let iv = self.run(mid);
            if iv.last < v {
                lo = mid + 1;
            } else if iv.start > v {
                hi = mid;
            } else {
                return true;
            }
        }
        false
    }
}

impl Container {
    /// `|self ∩ bytes|` without decoding the right-hand container.
    pub fn and_cardinality_bytes(&self, is_run: bool, card_minus_one: u16, bytes: &[u8]) -> u32 {
        use Container::{Array, Bitmap, Run};
        use SerializedContainer as S;
        let view = S::new(is_run, card_minus_one, bytes);
        match (self, &view) {
            (Array(a), S::Array(av)) => array_view_and_cardinality(a.values(), av),
            (Array(a), S::Bitmap(bv)) => {
                a.values().iter().map(|&v| bv.bit_value(v) as u32).sum()
            }
            (Array(a), S::Run(rv)) => {
                let mut n = 0;
                let mut i = 0;
                let n_runs = rv.n_runs();
                for &v in a.values() {
                    while i < n_runs && rv.run(i).last < v {
                        i += 1;
                    }
                    if i == n_runs {
                        break;
                    }
                    if rv.run(i).start <= v {
                        n += 1;
                    }
                }
                n
            }
            (Bitmap(b), S::Array(av)) => av.values().map(|v| b.bit_value(v) as u32).sum(),
            (Bitmap(b), S::Bitmap(bv)) => (0..BITMAP_WORDS)
                .map(|i| (b.words()[i] & bv.word(i)).count_ones())
                .sum(),
            (Bitmap(b), S::Run(rv)) => rv
                .intervals()
                .map(|iv| b.cardinality_in_range(u32::from(iv.start), u32::from(iv.last) + 1))
                .sum(),
            (Run(r), S::Array(av)) => {
                let runs = r.intervals();
                let mut n = 0;
                let mut i = 0;
                for v in av.values() {
                    while i < runs.len() && runs[i].last < v {
                        i += 1;
                    }
                    if i == runs.len() {
                        break;
                    }
                    if runs[i].start <= v {
                        n += 1;
                    }
                }
                n
            }
            (Run(r), S::Bitmap(bv)) => r
                .intervals()
                .iter()
                .map(|iv| view_range_cardinality(bv, u32::from(iv.start), u32::from(iv.last) + 1))
                .sum(),
            (Run(r), S::Run(rv)) => {
                let x = r.intervals();
                let mut i = 0;
                let mut j = 0;
                let n_runs = rv.n_runs();
                let mut n = 0u32;
                while i < x.len() && j < n_runs {
                    let y = rv.run(j);
                    let lo = x[i].start.max(y.start);
                    let hi = x[i].last.min(y.last);
                    if lo <= hi {
                        n += u32::from(hi) - u32::from(lo) + 1;
                    }
                    if x[i].last <= y.last {
                        i += 1;
                    } else {
                        j += 1;
                    }
                }
                n
            }
        }
    }

    /// `self ∪ bytes` without decoding the right-hand container.
    pub fn or_bytes(&self, is_run: bool, card_minus_one: u16, bytes: &[u8]) -> Container {
        use Container::{Array, Bitmap, Run};
        use SerializedContainer as S;
        let view = S::new(is_run, card_minus_one, bytes);
        match (self, &view) {
            (Array(a), S::Array(av)) => or_array_view(a, av),
            (Array(a), S::Bitmap(bv)) => {
                let mut out = bitmap_from_view(bv);
                let mut added = 0;
                for &v in a.values() {
                    let before = out.bit_value(v);
                    out.set_bit(v);
                    added += 1 - before as u32;
                }
                let cardinality = out.cardinality() + added;
                out.set_cardinality(cardinality);
                Bitmap(out)
            }
            (Array(a), S::Run(rv)) => {
                if rv.is_full() {
                    Run(RunContainer::full())
                } else {
                    Run(RunContainer::from_intervals_unchecked(
                        merge_interval_streams(
                            rv.intervals(),
                            a.values().iter().map(|&v| Interval { start: v, last: v }),
                        ),
                    ))
                }
            }
            (Bitmap(b), S::Array(av)) => {
                let mut out = b.clone();
                let mut added = 0;
                for v in av.values() {
                    let before = out.bit_value(v);
                    out.set_bit(v);
                    added += 1 - before as u32;
                }
                let cardinality = out.cardinality() + added;
                out.set_cardinality(cardinality);
                Bitmap(out)
            }
            (Bitmap(b), S::Bitmap(bv)) => {
                let mut out = b.clone();
                for (i, x) in out.words_mut().iter_mut().enumerate() {
                    *x |= bv.word(i);
                }
                out.repair();
                Bitmap(out)
            }
            (Bitmap(b), S::Run(rv)) => {
                if rv.is_full() {
                    Run(RunContainer::full())
                } else {
                    let mut out = b.clone();
                    for iv in rv.intervals() {
                        out.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
                    }
                    Bitmap(out)
                }
            }
            (Run(r), S::Array(av)) => {
                if r.is_full() {
                    Run(RunContainer::full())
                } else {
                    Run(RunContainer::from_intervals_unchecked(
                        merge_interval_streams(
                            r.intervals().iter().copied(),
                            av.values().map(|v| Interval { start: v, last: v }),
                        ),
                    ))
                }
            }
            (Run(r), S::Bitmap(bv)) => {
                if r.is_full() {
                    Run(RunContainer::full())
                } else {
                    let mut out = bitmap_from_view(bv);
                    for iv in r.intervals() {
                        out.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
                    }
                    Bitmap(out)
                }
            }
            (Run(r), S::Run(rv)) => {
                if r.is_full() || rv.is_full() {
                    Run(RunContainer::full())
                } else {
                    Run(RunContainer::from_intervals_unchecked(
                        merge_interval_streams(r.intervals().iter().copied(), rv.intervals()),
                    ))
                }
            }
        }
    }

    /// In-place `self ∪= bytes`.
    ///
    /// Returns `None` when the mutation happened within the current
    /// representation, or `Some(new)` when the representation had to
    /// change; the caller replaces its entry with the returned container.
    pub fn ior_bytes(
        &mut self,
        is_run: bool,
        card_minus_one: u16,
        bytes: &[u8],
    ) -> Option<Container> {
        use Container::{Array, Bitmap, Run};
        use SerializedContainer as S;
        let view = S::new(is_run, card_minus_one, bytes);
        match (&mut *self, &view) {
            (Array(a), S::Array(av)) => {
                if a.cardinality() + av.len() > ARRAY_DEFAULT_MAX_SIZE {
                    return Some(or_array_view(a, av));
                }
                let mut merged = Vec::with_capacity(a.cardinality() + av.len());
                let mut i = 0;
                let mut j = 0;
                let values = a.values();
                while i < values.len() && j < av.len() {
                    let (x, y) = (values[i], av.value(j));
                    match x.cmp(&y) {
                        std::cmp::Ordering::Less => {
                            merged.push(x);
                            i += 1;
                        }
                        std::cmp::Ordering::Greater => {
                            merged.push(y);
                            j += 1;
                        }
                        std::cmp::Ordering::Equal => {
                            merged.push(x);
                            i += 1;
                            j += 1;
                        }
                    }
                }
                merged.extend_from_slice(&values[i..]);
                merged.extend((j..av.len()).map(|k| av.value(k)));
                *a = ArrayContainer::from_sorted_vec(merged);
                None
            }
            (Array(a), S::Bitmap(bv)) => {
                let mut out = bitmap_from_view(bv);
                let mut added = 0;
                for &v in a.values() {
                    let before = out.bit_value(v);
                    out.set_bit(v);
                    added += 1 - before as u32;
                }
                let cardinality = out.cardinality() + added;
                out.set_cardinality(cardinality);
                Some(Bitmap(out))
            }
            (Array(a), S::Run(rv)) => {
                if rv.is_full() {
                    Some(Run(RunContainer::full()))
                } else {
                    Some(Run(RunContainer::from_intervals_unchecked(
                        merge_interval_streams(
                            rv.intervals(),
                            a.values().iter().map(|&v| Interval { start: v, last: v }),
                        ),
                    )))
                }
            }
            (Bitmap(b), S::Array(av)) => {
                let mut added = 0;
                for v in av.values() {
                    let before = b.bit_value(v);
                    b.set_bit(v);
                    added += 1 - before as u32;
                }
                let cardinality = b.cardinality() + added;
                b.set_cardinality(cardinality);
                None
            }
            (Bitmap(b), S::Bitmap(bv)) => {
                for (i, x) in b.words_mut().iter_mut().enumerate() {
                    *x |= bv.word(i);
                }
                b.repair();
                None
            }
            (Bitmap(b), S::Run(rv)) => {
                if rv.is_full() {
                    Some(Run(RunContainer::full()))
                } else {
                    for iv in rv.intervals() {
                        b.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
                    }
                    None
                }
            }
            (Run(r), _) if r.is_full() => None,
            (Run(r), S::Array(av)) => {
                *r = RunContainer::from_intervals_unchecked(merge_interval_streams(
                    r.intervals().iter().copied(),
                    av.values().map(|v| Interval { start: v, last: v }),
                ));
                None
            }
            (Run(r), S::Bitmap(bv)) => {
                let mut out = bitmap_from_view(bv);
                for iv in r.intervals() {
                    out.iadd_range(u32::from(iv.start), u32::from(iv.last) + 1);
                }
                Some(Bitmap(out))
            }
            (Run(r), S::Run(rv)) => {
                *r = RunContainer::from_intervals_unchecked(merge_interval_streams(
                    r.intervals().iter().copied(),
                    rv.intervals(),
                ));
                None
            }
        }
    }
}

/// Build an owned bitmap from a serialized bitmap payload.
fn bitmap_from_view(bv: &BitmapBytes<'_>) -> BitmapContainer {
    let mut words = Box::new([0u64; BITMAP_WORDS]);
    for (i, w) in words.iter_mut().enumerate() {
        *w = bv.word(i);
    }
    BitmapContainer::from_words(words, bv.cardinality)
}

/// Intersection cardinality of a value slice against a serialized array,
/// galloping from whichever side is lopsidedly smaller.
///
/// The reference implementation's second branch compared the right length
/// against itself and so never galloped from that side; the corrected
/// symmetric comparison is used here.
fn array_view_and_cardinality(values: &[u16], av: &ArrayBytes<'_>) -> u32 {
    if values.is_empty() || av.len() == 0 {
        return 0;
    }
    if values.len() * GALLOP_THRESHOLD < av.len() {
        let mut n = 0;
        let mut k = 0;
        for &v in values {
            k = av.advance_until(k, v);
            if k == av.len() {
                return n;
            }
            if av.value(k) == v {
                n += 1;
            }
        }
        n
    } else if av.len() * GALLOP_THRESHOLD < values.len() {
        let mut n = 0;
        let mut k = 0;
        for j in 0..av.len() {
            let v = av.value(j);
            k = advance_until(values, k, values.len(), v);
            if k == values.len() {
                return n;
            }
            if values[k] == v {
                n += 1;
            }
        }
        n
    } else {
        let mut n = 0;
        let mut i = 0;
        let mut j = 0;
        while i < values.len() && j < av.len() {
            let (x, y) = (values[i], av.value(j));
            match x.cmp(&y) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    n += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        n
    }
}

/// Union of an array container with a serialized array.
fn or_array_view(a: &ArrayContainer, av: &ArrayBytes<'_>) -> Container {
    if a.cardinality() + av.len() > ARRAY_DEFAULT_MAX_SIZE {
        let mut bc = a.to_bitmap();
        for v in av.values() {
            bc.set_bit(v);
        }
        bc.repair();
        Container::from_bitmap(bc)
    } else {
        let mut merged = Vec::with_capacity(a.cardinality() + av.len());
        let values = a.values();
        let mut i = 0;
        let mut j = 0;
        while i < values.len() && j < av.len() {
            let (x, y) = (values[i], av.value(j));
            match x.cmp(&y) {
                std::cmp::Ordering::Less => {
                    merged.push(x);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(y);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(x);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&values[i..]);
        merged.extend((j..av.len()).map(|k| av.value(k)));
        Container::Array(ArrayContainer::from_sorted_vec(merged))
    }
}

/// Set-bit count of a serialized bitmap within `[lo, hi)`.
fn view_range_cardinality(bv: &BitmapBytes<'_>, lo: u32, hi: u32) -> u32 {
    if lo >= hi {
        return 0;
    }
    let (lo, hi) = (lo as usize, hi as usize);
    let first = lo / 64;
    let last = (hi - 1) / 64;
    let first_mask = u64::MAX << (lo % 64);
    let last_mask = u64::MAX >> (63 - ((hi - 1) % 64));
    if first == last {
        return (bv.word(first) & first_mask & last_mask).count_ones();
    }
    let mut n = (bv.word(first) & first_mask).count_ones();
    for i in first + 1..last {
        n += bv.word(i).count_ones();
    }
    n + (bv.word(last) & last_mask).count_ones()
}
