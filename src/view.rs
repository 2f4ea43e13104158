//! Zero-copy read-only view over a serialized bitmap.
//!
//! Parsing lays a descriptor over the buffer without copying container
//! payloads: the descriptive header, the run-marker bitmap and (when the
//! format carries one) the offset table are all borrowed slices. Container
//! payloads stay raw until an operation needs them, and the byte-op walks
//! below feed them directly to the left-hand containers.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::bitmap::{split, RoaringBitmap};
use crate::container::byteops::SerializedContainer;
use crate::container::{Container, ARRAY_DEFAULT_MAX_SIZE, BITMAP_CONTAINER_SIZE};
use crate::error::{Result, RoaringError};
use crate::serialization::{NO_OFFSET_THRESHOLD, SERIAL_COOKIE, SERIAL_COOKIE_NO_RUNCONTAINER};

/// Read-only bitmap borrowing a serialized buffer.
///
/// The buffer must stay untouched while the view lives; the borrow makes
/// that a compile-time guarantee rather than a caller obligation.
#[derive(Debug)]
pub struct ImmutableBitmap<'a> {
    data: &'a [u8],
    containers: usize,
    run_bitmap: Option<&'a [u8]>,
    header: &'a [u8],
    offsets: Offsets<'a>,
}

/// Offset table: borrowed when the format carries one, otherwise computed
/// during the parse walk.
#[derive(Debug)]
enum Offsets<'a> {
    Borrowed(&'a [u8]),
    Computed(Vec<u32>),
}

impl<'a> ImmutableBitmap<'a> {
    /// Lay a view over `data` without copying container payloads.
    pub fn from_buffer(data: &'a [u8]) -> Result<ImmutableBitmap<'a>> {
        let mut pointer = 0usize;
        take(data, pointer, 4)?;
        let cookie = LittleEndian::read_u32(data);
        pointer += 4;

        let (containers, run_bitmap) = if cookie & 0xFFFF == u32::from(SERIAL_COOKIE) {
            let containers = (cookie >> 16) as usize + 1;
            let run_bitmap_size = (containers + 7) / 8;
            let run_bitmap = take(data, pointer, run_bitmap_size)?;
            pointer += run_bitmap_size;
            (containers, Some(run_bitmap))
        } else if cookie == SERIAL_COOKIE_NO_RUNCONTAINER {
            take(data, pointer, 4)?;
            let containers = LittleEndian::read_u32(&data[pointer..]) as usize;
            pointer += 4;
            (containers, None)
        } else {
            return Err(RoaringError::UnknownCookie { cookie });
        };

        if containers > 1 << 16 {
            return Err(RoaringError::TooManyContainers { count: containers });
        }

        let header = take(data, pointer, 4 * containers)?;
        pointer += 4 * containers;

        let offsets = if run_bitmap.is_none() || containers >= NO_OFFSET_THRESHOLD {
            let table = take(data, pointer, 4 * containers)?;
            Offsets::Borrowed(table)
        } else {
            let mut computed = Vec::with_capacity(containers);
            for i in 0..containers {
                computed.push(pointer as u32);
                let is_run = run_bitmap
                    .map_or(false, |rb| rb[i / 8] & (1 << (i % 8)) != 0);
                pointer += payload_size(data, pointer, is_run, LittleEndian::read_u16(&header[4 * i + 2..]))?;
            }
            Offsets::Computed(computed)
        };

        let view = ImmutableBitmap {
            data,
            containers,
            run_bitmap,
            header,
            offsets,
        };
        // With a borrowed table the payloads have not been walked yet;
        // check each extent so later accessors cannot run off the buffer.
        if matches!(view.offsets, Offsets::Borrowed(_)) {
            for i in 0..containers {
                let offset = view.offset_at(i);
                payload_size(data, offset, view.is_run_at(i), view.card_minus_one_at(i))?;
            }
        }
        Ok(view)
    }

    /// Number of containers in the view.
    pub fn container_count(&self) -> usize {
        self.containers
    }

    pub fn is_empty(&self) -> bool {
        self.containers == 0
    }

    /// Total cardinality, straight from the descriptive header.
    pub fn cardinality(&self) -> u64 {
        (0..self.containers)
            .map(|i| u64::from(self.card_minus_one_at(i)) + 1)
            .sum()
    }

    pub fn key_at(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.header[4 * i..])
    }

    pub fn card_minus_one_at(&self, i: usize) -> u16 {
        LittleEndian::read_u16(&self.header[4 * i + 2..])
    }

    pub fn is_run_at(&self, i: usize) -> bool {
        self.run_bitmap
            .map_or(false, |rb| rb[i / 8] & (1 << (i % 8)) != 0)
    }

    fn offset_at(&self, i: usize) -> usize {
        match &self.offsets {
            Offsets::Borrowed(table) => LittleEndian::read_u32(&table[4 * i..]) as usize,
            Offsets::Computed(offsets) => offsets[i] as usize,
        }
    }

    /// The raw serialized payload of container `i`: the byte-op operand.
    pub fn container_bytes_at(&self, i: usize) -> &'a [u8] {
        let offset = self.offset_at(i);
        let len = if self.is_run_at(i) {
            let n_runs = usize::from(LittleEndian::read_u16(&self.data[offset..]));
            2 + 4 * n_runs
        } else if usize::from(self.card_minus_one_at(i)) < ARRAY_DEFAULT_MAX_SIZE {
            2 * (usize::from(self.card_minus_one_at(i)) + 1)
        } else {
            BITMAP_CONTAINER_SIZE
        };
        &self.data[offset..offset + len]
    }

    /// Zero-copy typed view of container `i`. Read-only: its storage is a
    /// slice of the underlying buffer.
    pub fn container_view_at(&self, i: usize) -> SerializedContainer<'a> {
        SerializedContainer::new(
            self.is_run_at(i),
            self.card_minus_one_at(i),
            self.container_bytes_at(i),
        )
    }

    /// An owned copy of container `i`, safe to adopt into a mutable
    /// bitmap that may outlive the buffer.
    pub fn get_container_clone(&self, i: usize) -> Container {
        self.container_view_at(i).to_container()
    }

    /// Membership test against the raw buffer.
    pub fn contains(&self, x: u32) -> bool {
        let (high, low) = split(x);
        let mut lo = 0;
        let mut hi = self.containers;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(&high) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return self.container_view_at(mid).contains(low);
                }
            }
        }
        false
    }
}

/// Bounds-checked subslice.
fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    match data.get(offset..offset + len) {
        Some(slice) => Ok(slice),
        None => Err(RoaringError::Truncated {
            offset,
            needed: len,
            available: data.len().saturating_sub(offset),
        }),
    }
}

/// Byte length of the container payload at `offset`, validated against the
/// buffer end.
fn payload_size(data: &[u8], offset: usize, is_run: bool, card_minus_one: u16) -> Result<usize> {
    let len = if is_run {
        let prefix = take(data, offset, 2)?;
        2 + 4 * usize::from(LittleEndian::read_u16(prefix))
    } else if usize::from(card_minus_one) < ARRAY_DEFAULT_MAX_SIZE {
        2 * (usize::from(card_minus_one) + 1)
    } else {
        BITMAP_CONTAINER_SIZE
    };
    take(data, offset, len)?;
    Ok(len)
}

impl RoaringBitmap {
    /// `|self ∩ view|` through the byte-op fast path: matching containers
    /// are intersected against their raw serialized bytes.
    pub fn and_cardinality_against_immutable(&self, view: &ImmutableBitmap<'_>) -> u64 {
        let mut n = 0u64;
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < view.container_count() {
            let k1 = self.index.key_at(i);
            let k2 = view.key_at(j);
            match k1.cmp(&k2) {
                std::cmp::Ordering::Less => i = self.index.advance_until(k2, i),
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    n += u64::from(self.index.container_at(i).and_cardinality_bytes(
                        view.is_run_at(j),
                        view.card_minus_one_at(j),
                        view.container_bytes_at(j),
                    ));
                    i += 1;
                    j += 1;
                }
            }
        }
        n
    }

    /// In-place union with a serialized bitmap, container payloads
    /// consumed without decode. Containers present only in the view are
    /// adopted as owned copies.
    pub fn or_against_immutable(&mut self, view: &ImmutableBitmap<'_>) {
        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < view.container_count() {
            let k1 = self.index.key_at(i);
            let k2 = view.key_at(j);
            match k1.cmp(&k2) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => {
                    self.index
                        .insert_at(i, k2, Arc::new(view.get_container_clone(j)));
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    let writable = self.index.get_writable_container_at(i);
                    if let Some(new_container) = writable.ior_bytes(
                        view.is_run_at(j),
                        view.card_minus_one_at(j),
                        view.container_bytes_at(j),
                    ) {
                        self.index
                            .replace_key_and_container_at(i, k1, Arc::new(new_container));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        while j < view.container_count() {
            self.index
                .append(view.key_at(j), Arc::new(view.get_container_clone(j)));
            j += 1;
        }
    }

    /// [`RoaringBitmap::or_against_immutable`] restricted to the keys of
    /// `filter`: the walk advances across the minimum of the three key
    /// streams and only acts where the filter has a container.
    pub fn or_against_immutable_with_filter(
        &mut self,
        view: &ImmutableBitmap<'_>,
        filter: &RoaringBitmap,
    ) {
        let mut i = 0;
        let mut j = 0;
        let mut f = 0;
        while j < view.container_count() && f < filter.index.len() {
            let k2 = view.key_at(j);
            let kf = filter.index.key_at(f);
            match k2.cmp(&kf) {
                std::cmp::Ordering::Less => j += 1,
                std::cmp::Ordering::Greater => f = filter.index.advance_until(k2, f),
                std::cmp::Ordering::Equal => {
                    i = self.index.advance_until(k2, i);
                    if i < self.index.len() && self.index.key_at(i) == k2 {
                        let writable = self.index.get_writable_container_at(i);
                        if let Some(new_container) = writable.ior_bytes(
                            view.is_run_at(j),
                            view.card_minus_one_at(j),
                            view.container_bytes_at(j),
                        ) {
                            self.index
                                .replace_key_and_container_at(i, k2, Arc::new(new_container));
                        }
                    } else {
                        self.index
                            .insert_at(i, k2, Arc::new(view.get_container_clone(j)));
                    }
                    j += 1;
                    f += 1;
                }
            }
        }
    }
}
