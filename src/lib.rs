//! roaring32 - Compressed Bitmaps for 32-bit Sets
//!
//! This library implements a compressed-bitmap engine in the Roaring
//! family: sets of `u32` values stored as a two-level structure whose
//! chunks adapt between sorted-array, bitmap, and run-length form as
//! density changes.
//!
//! # Features
//!
//! - **Adaptive containers**: each 65 536-value chunk picks the cheapest
//!   of three representations, promoted and demoted automatically
//! - **Full set algebra**: union, intersection, difference and symmetric
//!   difference, in allocating and in-place flavors, plus
//!   cardinality-only fast paths
//! - **Copy-on-write clones**: cloning a bitmap shares containers and
//!   costs O(containers), not O(values)
//! - **Portable serialization**: the little-endian interoperable format,
//!   with run-container support
//! - **Zero-copy views**: operate directly against a serialized bitmap
//!   without materializing it
//!
//! # Quick Start
//!
//! ```rust
//! use roaring32::RoaringBitmap;
//!
//! let mut rb = RoaringBitmap::new();
//! rb.add(1);
//! rb.add(2);
//! rb.add_range(100, 1000);
//! assert!(rb.contains(500));
//! assert_eq!(rb.cardinality(), 902);
//!
//! let other: RoaringBitmap = (500..2000).collect();
//! assert_eq!(rb.and_cardinality(&other), 500);
//! ```
//!
//! # Operating on serialized bitmaps
//!
//! A serialized bitmap can be queried and combined without decoding it:
//!
//! ```rust
//! use roaring32::{ImmutableBitmap, RoaringBitmap};
//!
//! let big: RoaringBitmap = (0..100_000).collect();
//! let bytes = big.to_bytes()?;
//!
//! let view = ImmutableBitmap::from_buffer(&bytes)?;
//! assert_eq!(view.cardinality(), 100_000);
//!
//! let mut small: RoaringBitmap = (99_990..100_010).collect();
//! assert_eq!(small.and_cardinality_against_immutable(&view), 10);
//! small.or_against_immutable(&view);
//! assert_eq!(small.cardinality(), 100_010);
//! # Ok::<(), roaring32::RoaringError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod bitmap;
pub mod container;
pub mod error;
mod index;
pub mod kernels;
mod serialization;
mod view;

pub use bitmap::RoaringBitmap;
pub use container::{Container, ContainerType, ARRAY_DEFAULT_MAX_SIZE};
pub use error::{Result, RoaringError};
pub use serialization::{NO_OFFSET_THRESHOLD, SERIAL_COOKIE, SERIAL_COOKIE_NO_RUNCONTAINER};
pub use view::ImmutableBitmap;
