//! `run-merge` is a memory-bounded, recursive run merge engine for index
//! build pipelines.
//!
//! An index build produces far more sorted records (terms, postings,
//! documents) than fit in memory at once. The pieces that do fit are *runs*:
//! each run is fed items, sorted, and sealed; a parent run then merges any
//! number of child runs into one globally ordered stream — and since a run
//! and the top-level sorter are the same recursive type, merge trees compose
//! to arbitrary depth.
//!
//! Refilling is lazy and order-safe: when a parent's cache empties it pulls
//! from every child only up to the *endpost* — the smallest of the
//! children's buffered maxima — so no item still sitting behind a child's
//! source can ever undercut something already handed out. The per-child
//! batches arrive as already-sorted slices and are merged pairwise in
//! O(n log k) instead of being re-sorted.
//!
//! # Overview
//!
//! * **Opaque items:** anything with a total order moves through the engine;
//!   feeding transfers ownership in, fetching transfers it out.
//! * **Injected comparator:** natural order via [`Sorter::new`], or any
//!   `Fn(&T, &T) -> Ordering` via [`Sorter::with_compare`].
//! * **Storage agnostic:** sealing a run hands its cache to a [`RunStore`]
//!   collaborator; a sealed leaf refills from the same collaborator. The
//!   engine defines no file format and triggers no spill itself.
//! * **Bounded memory:** caches grow amortized, shrink to exactly the unread
//!   remainder on demand, and allocation failure surfaces as an error.
//!
//! # Example
//!
//! ```
//! use run_merge::Sorter;
//!
//! let mut left: Sorter<u32> = Sorter::new();
//! for n in [4, 1, 3] {
//!     left.feed(n)?;
//! }
//! left.sort()?;
//! left.flip()?;
//!
//! let mut right: Sorter<u32> = Sorter::new();
//! for n in [5, 2] {
//!     right.feed(n)?;
//! }
//! right.sort()?;
//! right.flip()?;
//!
//! let mut merged: Sorter<u32> = Sorter::new();
//! merged.add_run(left);
//! merged.add_run(right);
//!
//! let sorted: Result<Vec<u32>, _> = merged.drain().collect();
//! assert_eq!(sorted?, vec![1, 2, 3, 4, 5]);
//! # Ok::<(), run_merge::SortError>(())
//! ```

mod buffer;
mod merge;
pub mod sorter;
pub mod store;

pub use sorter::{Drain, SortError, Sorter};
pub use store::{NoStore, RunStore, StoreError};
