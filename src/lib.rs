//! `ext-line-sort` sorts text files too large to fit in memory.
//!
//! Every line of the input is a record of the form `<number>. <text>`. Records are ordered by
//! the text part first (byte-wise comparison) and by the number part second:
//!
//! ```text
//! 415. Apple                               1. Apple
//! 30432. Something something something     415. Apple
//! 1. Apple                            ->   2. Banana is yellow
//! 32. Cherry is the best                   32. Cherry is the best
//! 2. Banana is yellow                      30432. Something something something
//! ```
//!
//! Sorting is achieved in two passes. During the first pass the input is split into chunks that
//! fit in RAM, every chunk is sorted and saved to a temporary run file. During the second pass
//! the runs are merged together through a binary heap. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Pipelined:**
//!   reading chunk N+1, sorting chunk N and writing chunk N-1 overlap, as do merging and writing
//!   the result. Stages hand items over through single-slot channels, so at most a couple of
//!   chunks are resident in memory whatever the input size.
//! * **Multithreading support:**
//!   chunks are sorted in parallel in a dedicated thread pool.
//! * **Memory limit support:**
//!   chunks are bounded by records count by default, or by consumed memory
//!   (`memory-limit` feature required).
//! * **Cleanup:**
//!   run files live in a temporary directory removed when the sort ends, successfully or not.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_line_sort::ExternalSorterBuilder;
//!
//! fn main() {
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_chunk_size(1_000_000)
//!         .with_batch_size(10_000)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter
//!         .sort_file(Path::new("testfile.txt"), Path::new("sortedfile.txt"))
//!         .unwrap();
//!     println!("{} records sorted", summary.written);
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod pipeline;
pub mod record;
pub mod run;
pub mod sort;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder};
pub use merger::BinaryHeapMerger;
pub use record::{ParseError, Record};
pub use run::{Run, RunReader, RunSet};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortSummary, Stage};
