//! The portable little-endian wire format.
//!
//! Layout: a 4-byte cookie (run-aware form folds the container count into
//! its high half and is followed by a run-marker bitmap), a descriptive
//! header of `(key, cardinality-1)` pairs, an offset table when the
//! format requires one, then the container payloads in key order.

use std::io;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bitmap::RoaringBitmap;
use crate::container::{Container, ContainerType};
use crate::error::Result;
use crate::index::RoaringArray;
use crate::view::ImmutableBitmap;

/// Cookie of the run-aware format; the high 16 bits hold `containers - 1`.
pub const SERIAL_COOKIE: u16 = 12347;

/// Cookie of the run-free format, followed by a 4-byte container count.
pub const SERIAL_COOKIE_NO_RUNCONTAINER: u32 = 12346;

/// Run-aware bitmaps with at least this many containers carry an offset
/// table; smaller ones compute offsets while parsing.
pub const NO_OFFSET_THRESHOLD: usize = 4;

impl RoaringBitmap {
    /// Exact byte length of [`RoaringBitmap::write_to`] output.
    pub fn serialized_size(&self) -> usize {
        let n = self.index.len();
        let has_runs = self.has_run_containers();
        let mut size = if has_runs { 4 + (n + 7) / 8 } else { 8 };
        size += 4 * n;
        if !has_runs || n >= NO_OFFSET_THRESHOLD {
            size += 4 * n;
        }
        size += self
            .index
            .entries()
            .map(|(_, c)| c.serialized_size_in_bytes())
            .sum::<usize>();
        size
    }

    /// Serialize into `writer`.
    pub fn write_to<W: io::Write>(&self, mut writer: W) -> Result<()> {
        let n = self.index.len();
        let has_runs = self.has_run_containers();

        if has_runs {
            let cookie = u32::from(SERIAL_COOKIE) | ((n as u32 - 1) << 16);
            writer.write_u32::<LittleEndian>(cookie)?;
            let mut run_bitmap = vec![0u8; (n + 7) / 8];
            for (i, (_, c)) in self.index.entries().enumerate() {
                if c.container_type() == ContainerType::Run {
                    run_bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            writer.write_all(&run_bitmap)?;
        } else {
            writer.write_u32::<LittleEndian>(SERIAL_COOKIE_NO_RUNCONTAINER)?;
            writer.write_u32::<LittleEndian>(n as u32)?;
        }

        for (key, c) in self.index.entries() {
            writer.write_u16::<LittleEndian>(key)?;
            writer.write_u16::<LittleEndian>((c.cardinality() - 1) as u16)?;
        }

        if !has_runs || n >= NO_OFFSET_THRESHOLD {
            let preamble = if has_runs { 4 + (n + 7) / 8 } else { 8 };
            let mut offset = (preamble + 8 * n) as u32;
            for (_, c) in self.index.entries() {
                writer.write_u32::<LittleEndian>(offset)?;
                offset += c.serialized_size_in_bytes() as u32;
            }
        }

        for (_, c) in self.index.entries() {
            match c {
                Container::Array(ac) => {
                    // An array riding one past the limit (tail-append
                    // overshoot) types as a bitmap on the wire.
                    if ac.cardinality() > crate::container::ARRAY_DEFAULT_MAX_SIZE {
                        for &w in ac.to_bitmap().words().iter() {
                            writer.write_u64::<LittleEndian>(w)?;
                        }
                        continue;
                    }
                    for &v in ac.values() {
                        writer.write_u16::<LittleEndian>(v)?;
                    }
                }
                Container::Bitmap(bc) => {
                    for &w in bc.words().iter() {
                        writer.write_u64::<LittleEndian>(w)?;
                    }
                }
                Container::Run(rc) => {
                    writer.write_u16::<LittleEndian>(rc.number_of_runs() as u16)?;
                    for iv in rc.intervals() {
                        writer.write_u16::<LittleEndian>(iv.start)?;
                        writer.write_u16::<LittleEndian>(iv.last - iv.start)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Materialize a bitmap from a serialized buffer.
    ///
    /// The wire form dictates each container's representation: flagged
    /// containers load as runs, and the cardinality threshold splits the
    /// rest between array and bitmap form.
    pub fn from_buffer(bytes: &[u8]) -> Result<RoaringBitmap> {
        let view = ImmutableBitmap::from_buffer(bytes)?;
        let mut index = RoaringArray::new();
        for i in 0..view.container_count() {
            index.append(view.key_at(i), Arc::new(view.get_container_clone(i)));
        }
        Ok(RoaringBitmap { index })
    }

    fn has_run_containers(&self) -> bool {
        self.index
            .entries()
            .any(|(_, c)| c.container_type() == ContainerType::Run)
    }
}
