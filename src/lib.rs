//! `line-sort` is an external sort of newline-delimited records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `line-sort` has the following properties:
//!
//! * **Bounded memory:**
//!   a single block buffer is allocated up front. It holds one chunk at a time while sorting and is split
//!   between all chunks while merging, so memory usage does not depend on the input size.
//! * **Zero-copy records:**
//!   records are sorted as `(offset, length)` references into the block buffer, never copied.
//! * **Numeric-friendly collation:**
//!   records are ordered by length first and then byte-wise, which sorts decimal numbers without leading
//!   zeros in numeric order.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::path;
//!
//! use line_sort::ExternalSorterBuilder;
//!
//! fn main() {
//!     let mut input = fs::File::open("input.txt").unwrap();
//!     let mut output = fs::File::create("output.txt").unwrap();
//!
//!     let mut sorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_block_size(64 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(&mut input, &mut output).unwrap();
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod merger;
pub mod record;
pub mod sort;

pub use buffer::{ByteBuffer, OutputBuffer};
pub use chunk::{ChunkStore, MemoryChunkStore, TempDirChunkStore};
pub use merger::{KWayMerger, MergeStats};
pub use record::{compare_records, extract_records, RecordRef};
pub use sort::{ExternalSorter, ExternalSorterBuilder, IoTarget, Phase, SortError, SortStats};
