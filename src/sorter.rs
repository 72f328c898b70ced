//! The recursive sorter / run.
//!
//! A [`Sorter`] is fed items, sealed with [`flip`](Sorter::flip), and then
//! drained in comparator order. It is simultaneously a sortable buffer and a
//! merge node: child runs registered with [`add_run`](Sorter::add_run) are
//! the same type, so merge trees compose to arbitrary depth. When the cache
//! empties, the sorter pulls a bounded, order-safe batch from every child —
//! bounded by the *endpost*, the smallest of the children's buffered maxima,
//! which no item still upstream of any child can undercut — and merges the
//! per-child slices by exploiting that each one is already sorted.

use log;
use std::cmp::Ordering;
use std::collections::TryReserveError;
use std::error::Error;
use std::fmt;

use crate::buffer::Buffer;
use crate::merge;
use crate::store::{NoStore, RunStore, StoreError};

/// Sorting engine error.
#[derive(Debug)]
pub enum SortError {
    /// A write-phase operation was attempted on a sealed run.
    Sealed(&'static str),
    /// `sort` was called after items had already been fetched.
    SortAfterFetch { fetched: usize },
    /// Slice absorption was attempted while the cache still held items.
    CacheNotEmpty { buffered: usize },
    /// A registered run exposed an empty window during endpost selection;
    /// registry maintenance should have excised it.
    BadRunWindow { run: usize },
    /// Cache or scratch growth could not allocate.
    Alloc(TryReserveError),
    /// The storage collaborator reported a failure.
    Store(StoreError),
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::Sealed(op) => write!(f, "can't {} a sealed run", op),
            SortError::SortAfterFetch { fetched } => {
                write!(f, "can't sort the cache after fetching {} items", fetched)
            }
            SortError::CacheNotEmpty { buffered } => {
                write!(f, "can't absorb slices while {} items are cached", buffered)
            }
            SortError::BadRunWindow { run } => {
                write!(f, "registered run {} exposed an empty window", run)
            }
            SortError::Alloc(err) => write!(f, "cache growth failed: {}", err),
            SortError::Store(err) => write!(f, "storage collaborator failed: {}", err),
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SortError::Alloc(err) => Some(err),
            SortError::Store(err) => Some(&**err as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

impl From<TryReserveError> for SortError {
    fn from(err: TryReserveError) -> Self {
        SortError::Alloc(err)
    }
}

/// A sortable, mergeable run of items.
///
/// The comparator is injected at construction and must be a total order
/// consistent across every run merged together. A run exclusively owns its
/// cache and its children; dropping it drops every still-buffered item and
/// recursively every child run.
pub struct Sorter<T: 'static, C = fn(&T, &T) -> Ordering> {
    /// The cache this run serves from.
    buffer: Buffer<T>,
    /// Merge workspace, grown on demand and reused across refills.
    scratch: Vec<T>,
    /// Child runs feeding this run's cache.
    runs: Vec<Sorter<T, C>>,
    /// Injected three-way comparator.
    compare: C,
    /// Storage collaborator invoked at `flip` and on leaf refills.
    store: Box<dyn RunStore<T>>,
    /// Advisory item budget; stored for collaborators, never read here.
    mem_thresh: usize,
    /// Write phase is over.
    flipped: bool,
}

impl<T: Ord + 'static> Sorter<T> {
    /// Creates a run ordered by `T`'s natural order.
    pub fn new() -> Self {
        Sorter::with_compare(T::cmp)
    }
}

impl<T: Ord + 'static> Default for Sorter<T> {
    fn default() -> Self {
        Sorter::new()
    }
}

impl<T, C> Sorter<T, C>
where
    T: 'static,
    C: Fn(&T, &T) -> Ordering + Copy,
{
    /// Creates a run ordered by `compare`.
    ///
    /// # Arguments
    /// * `compare` - Three-way comparator; shared (copied) by every run in
    ///   one merge tree.
    pub fn with_compare(compare: C) -> Self {
        Sorter {
            buffer: Buffer::new(),
            scratch: Vec::new(),
            runs: Vec::new(),
            compare,
            store: Box::new(NoStore),
            mem_thresh: usize::MAX,
            flipped: false,
        }
    }

    /// Attaches a storage collaborator, replacing the in-memory default.
    pub fn with_store(mut self, store: impl RunStore<T> + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Sets the advisory item budget exposed through
    /// [`mem_thresh`](Sorter::mem_thresh).
    pub fn with_mem_thresh(mut self, mem_thresh: usize) -> Self {
        self.mem_thresh = mem_thresh;
        self
    }

    /// Advisory item budget. The engine stores it for collaborators that
    /// decide when a run should be sealed and spilled; its own growth
    /// policy is unconditional.
    pub fn mem_thresh(&self) -> usize {
        self.mem_thresh
    }

    /// Number of items currently cached at this level.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the run has been sealed by [`flip`](Sorter::flip).
    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// Appends an item to the cache, taking ownership of it.
    ///
    /// Fails with [`SortError::Sealed`] once the run has been flipped.
    pub fn feed(&mut self, item: T) -> Result<(), SortError> {
        if self.flipped {
            return Err(SortError::Sealed("feed"));
        }
        self.buffer.push(item)?;
        return Ok(());
    }

    /// Stable-sorts the cache with the injected comparator.
    ///
    /// Legal only while no item has been fetched since the cache was
    /// created or last compacted — sorting a partially consumed window
    /// would corrupt the order already handed out. No-op on an empty cache.
    pub fn sort(&mut self) -> Result<(), SortError> {
        if self.flipped {
            return Err(SortError::Sealed("sort"));
        }
        if self.buffer.tick() != 0 {
            return Err(SortError::SortAfterFetch {
                fetched: self.buffer.tick(),
            });
        }
        self.buffer.sort_by(self.compare);
        return Ok(());
    }

    /// Seals the run: invokes the storage collaborator's flush hook, then
    /// enters read phase. `feed` and `sort` fail afterwards.
    pub fn flip(&mut self) -> Result<(), SortError> {
        if self.flipped {
            return Err(SortError::Sealed("flip"));
        }
        self.store
            .flush(self.buffer.items_mut())
            .map_err(SortError::Store)?;
        self.flipped = true;
        log::debug!("run sealed, {} items left in cache", self.buffer.len());
        return Ok(());
    }

    /// Registers `run` as a child feeding this run's cache.
    ///
    /// Children are expected to be sealed and internally sorted; their
    /// relative order is preserved until each is exhausted and excised.
    pub fn add_run(&mut self, run: Sorter<T, C>) {
        self.runs.push(run);
    }

    /// Returns the next item in sort order without consuming it, refilling
    /// the cache from child runs if needed. `Ok(None)` means every source
    /// is exhausted.
    pub fn peek(&mut self) -> Result<Option<&T>, SortError> {
        if self.buffer.is_empty() {
            self.refill()?;
        }
        return Ok(self.buffer.front());
    }

    /// Removes and returns the next item in sort order, transferring
    /// ownership to the caller. `Ok(None)` means every source is exhausted,
    /// and stays `Ok(None)` on repeated calls.
    pub fn fetch(&mut self) -> Result<Option<T>, SortError> {
        if self.buffer.is_empty() {
            self.refill()?;
        }
        return Ok(self.buffer.pop());
    }

    /// Iterator over [`fetch`](Sorter::fetch), yielding items until
    /// exhaustion or the first error.
    pub fn drain(&mut self) -> Drain<'_, T, C> {
        Drain { sorter: self }
    }

    /// Releases every byte not needed to serve the remaining items: compacts
    /// the cache to exactly its unread window, drops the scratch buffer, and
    /// recurses into every child run.
    pub fn shrink(&mut self) {
        self.buffer.shrink();
        self.scratch = Vec::new();
        for run in &mut self.runs {
            run.shrink();
        }
    }

    /// Repopulates an empty cache from the child runs (or, for a leaf run,
    /// from the storage collaborator). Returns the number of items cached.
    fn refill(&mut self) -> Result<usize, SortError> {
        self.buffer.clear();

        if self.runs.is_empty() {
            let delivered = self
                .store
                .refill(self.buffer.items_mut())
                .map_err(SortError::Store)?;
            return Ok(delivered);
        }

        // Every registered run must hold at least one buffered item before
        // the endpost is chosen; runs with nothing left are excised.
        let mut index = 0;
        while index < self.runs.len() {
            let run = &mut self.runs[index];
            if !run.buffer.is_empty() || run.refill()? > 0 {
                index += 1;
            } else {
                self.runs.remove(index);
                log::debug!("child run {} exhausted, excised", index);
            }
        }

        if self.runs.is_empty() {
            return Ok(0);
        }

        let endpost_run = self.find_endpost()?;
        self.absorb_slices(endpost_run)?;
        return Ok(self.buffer.len());
    }

    /// Picks the run holding the endpost: the item highest in sort order
    /// within its own cache but guaranteed not to outsort anything still
    /// upstream of any run — the minimum of the per-run cached maxima.
    fn find_endpost(&self) -> Result<usize, SortError> {
        let mut maxima = Vec::with_capacity(self.runs.len());
        for (index, run) in self.runs.iter().enumerate() {
            match run.buffer.back() {
                Some(item) => maxima.push(item),
                None => return Err(SortError::BadRunWindow { run: index }),
            }
        }

        let mut endpost = 0;
        for index in 1..maxima.len() {
            if (self.compare)(maxima[index], maxima[endpost]) == Ordering::Less {
                endpost = index;
            }
        }
        return Ok(endpost);
    }

    /// Moves every in-range item out of every child into this run's cache,
    /// one sorted slice per child in registry order, then merges the slices.
    fn absorb_slices(&mut self, endpost_run: usize) -> Result<(), SortError> {
        if !self.buffer.is_empty() {
            return Err(SortError::CacheNotEmpty {
                buffered: self.buffer.len(),
            });
        }
        let compare = self.compare;

        let mut sizes = Vec::with_capacity(self.runs.len());
        {
            let endpost = match self.runs[endpost_run].buffer.back() {
                Some(item) => item,
                None => return Err(SortError::BadRunWindow { run: endpost_run }),
            };
            for run in &self.runs {
                sizes.push(slice_size(&run.buffer, endpost, compare));
            }
        }

        let mut slices = Vec::with_capacity(self.runs.len());
        for (run, count) in self.runs.iter_mut().zip(&sizes) {
            if *count > 0 {
                slices.push(run.buffer.take(*count)?);
            }
        }

        let num_slices = slices.len();
        let merged = merge::merge_slices(slices, &mut self.scratch, compare)?;
        self.buffer.absorb(merged)?;
        log::trace!(
            "absorbed {} items across {} slices",
            self.buffer.len(),
            num_slices
        );
        return Ok(());
    }
}

#[cfg(feature = "memory-limit")]
impl<T, C> Sorter<T, C>
where
    T: deepsize::DeepSizeOf + 'static,
    C: Fn(&T, &T) -> Ordering + Copy,
{
    /// Deep size in bytes of every item buffered by this run and its
    /// children. Measurement only — collaborators weigh it against
    /// [`mem_thresh`](Sorter::mem_thresh); the engine never does.
    pub fn buffered_bytes(&self) -> u64 {
        let own: u64 = self
            .buffer
            .items()
            .iter()
            .map(|item| item.deep_size_of() as u64)
            .sum();
        own + self.runs.iter().map(|run| run.buffered_bytes()).sum::<u64>()
    }
}

/// Number of items in `window` at or below `endpost`. The window is sorted
/// ascending, so this is a single monotonic partition point.
fn slice_size<T, C>(window: &Buffer<T>, endpost: &T, compare: C) -> usize
where
    C: Fn(&T, &T) -> Ordering,
{
    let mut lo = 0;
    let mut hi = window.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match window.get(mid) {
            Some(item) if compare(item, endpost) != Ordering::Greater => lo = mid + 1,
            _ => hi = mid,
        }
    }
    lo
}

/// Draining iterator returned by [`Sorter::drain`].
pub struct Drain<'a, T: 'static, C = fn(&T, &T) -> Ordering> {
    sorter: &'a mut Sorter<T, C>,
}

impl<T, C> Iterator for Drain<'_, T, C>
where
    T: 'static,
    C: Fn(&T, &T) -> Ordering + Copy,
{
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.sorter.fetch().transpose()
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::collections::VecDeque;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{SortError, Sorter};
    use crate::store::{RunStore, StoreError};

    /// Serves pre-cut sorted batches, simulating a run whose source still
    /// holds items beyond the cached window.
    struct BatchStore {
        batches: Vec<Vec<i32>>,
    }

    impl RunStore<i32> for BatchStore {
        fn refill(&mut self, window: &mut VecDeque<i32>) -> Result<usize, StoreError> {
            if self.batches.is_empty() {
                return Ok(0);
            }
            let batch = self.batches.remove(0);
            let delivered = batch.len();
            window.extend(batch);
            Ok(delivered)
        }
    }

    struct FailingStore;

    impl RunStore<i32> for FailingStore {
        fn flush(&mut self, _window: &mut VecDeque<i32>) -> Result<(), StoreError> {
            Err("backing volume full".into())
        }
    }

    fn sealed_run(items: &[i32]) -> Sorter<i32> {
        let mut run = Sorter::new();
        for &item in items {
            run.feed(item).unwrap();
        }
        run.sort().unwrap();
        run.flip().unwrap();
        run
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sort_and_drain(#[case] reversed: bool) {
        let compare: fn(&i32, &i32) -> Ordering = if reversed {
            |a, b| a.cmp(b).reverse()
        } else {
            |a, b| a.cmp(b)
        };

        let mut input: Vec<i32> = (0..100).map(|n| n % 37).collect();
        input.shuffle(&mut rand::thread_rng());

        let mut sorter = Sorter::with_compare(compare);
        for &item in &input {
            sorter.feed(item).unwrap();
        }
        sorter.sort().unwrap();
        sorter.flip().unwrap();

        let drained: Result<Vec<i32>, _> = sorter.drain().collect();
        let drained = drained.unwrap();

        let mut expected = input;
        expected.sort_by(compare);
        assert_eq!(drained, expected);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    #[case(8)]
    fn test_merge_runs(#[case] num_runs: usize) {
        let mut input: Vec<i32> = (0..200).map(|n| n % 53).collect();
        input.shuffle(&mut rand::thread_rng());

        let mut merged: Sorter<i32> = Sorter::new();
        let chunk = input.len() / num_runs + 1;
        for part in input.chunks(chunk) {
            merged.add_run(sealed_run(part));
        }

        let drained: Result<Vec<i32>, _> = merged.drain().collect();
        let drained = drained.unwrap();

        let mut expected = input;
        expected.sort();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_empty_runs_are_excised() {
        let mut merged: Sorter<i32> = Sorter::new();
        merged.add_run(sealed_run(&[]));
        merged.add_run(sealed_run(&[1, 2]));
        merged.add_run(sealed_run(&[]));

        let drained: Result<Vec<i32>, _> = merged.drain().collect();
        assert_eq!(drained.unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_endpost_bounds_absorption() {
        // one run's source still holds items above 5, so nothing past 5 —
        // not even the resident 9 — may enter the cache on the first pass
        let mut gated = Sorter::new().with_store(BatchStore {
            batches: vec![vec![1, 3, 5], vec![6, 8]],
        });
        gated.flip().unwrap();

        let mut merged: Sorter<i32> = Sorter::new();
        merged.add_run(gated);
        merged.add_run(sealed_run(&[2, 4, 9]));

        assert_eq!(merged.peek().unwrap(), Some(&1));
        assert_eq!(merged.buffered(), 5);

        let drained: Result<Vec<i32>, _> = merged.drain().collect();
        assert_eq!(drained.unwrap(), vec![1, 2, 3, 4, 5, 6, 8, 9]);
    }

    #[test]
    fn test_leaf_refills_from_store() {
        let mut run = Sorter::new().with_store(BatchStore {
            batches: vec![vec![1, 2], vec![3, 4], vec![5]],
        });
        run.flip().unwrap();

        let drained: Result<Vec<i32>, _> = run.drain().collect();
        assert_eq!(drained.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_exhaustion_is_idempotent() {
        let mut sorter = sealed_run(&[7]);
        assert_eq!(sorter.fetch().unwrap(), Some(7));

        for _ in 0..3 {
            assert_eq!(sorter.fetch().unwrap(), None);
            assert_eq!(sorter.peek().unwrap(), None);
        }
    }

    #[test]
    fn test_sort_after_fetch_is_rejected() {
        let mut sorter: Sorter<i32> = Sorter::new();
        for item in [2, 3, 1] {
            sorter.feed(item).unwrap();
        }
        sorter.sort().unwrap();
        assert_eq!(sorter.fetch().unwrap(), Some(1));

        let err = sorter.sort().unwrap_err();
        assert!(matches!(err, SortError::SortAfterFetch { fetched: 1 }));

        // cache contents are untouched by the failed sort
        assert_eq!(sorter.fetch().unwrap(), Some(2));
        assert_eq!(sorter.fetch().unwrap(), Some(3));
    }

    #[test]
    fn test_write_ops_rejected_after_flip() {
        let mut sorter = sealed_run(&[1]);

        assert!(matches!(sorter.feed(4), Err(SortError::Sealed("feed"))));
        assert!(matches!(sorter.sort(), Err(SortError::Sealed("sort"))));
        assert!(matches!(sorter.flip(), Err(SortError::Sealed("flip"))));
    }

    #[test]
    fn test_flush_failure_propagates() {
        let mut run = Sorter::new().with_store(FailingStore);
        run.feed(1).unwrap();

        assert!(matches!(run.flip(), Err(SortError::Store(_))));
        assert!(!run.is_flipped());
    }

    #[test]
    fn test_shrink_keeps_fetch_order() {
        let mut merged: Sorter<i32> = Sorter::new();
        merged.add_run(sealed_run(&[1, 4, 5]));
        merged.add_run(sealed_run(&[2, 3, 6]));

        for expected in 1..=3 {
            assert_eq!(merged.fetch().unwrap(), Some(expected));
        }

        merged.shrink();

        let drained: Result<Vec<i32>, _> = merged.drain().collect();
        assert_eq!(drained.unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_sort_is_legal_again_after_shrink() {
        let mut sorter: Sorter<i32> = Sorter::new();
        for item in [3, 1, 2] {
            sorter.feed(item).unwrap();
        }
        sorter.sort().unwrap();
        assert_eq!(sorter.fetch().unwrap(), Some(1));

        sorter.shrink();
        sorter.sort().unwrap();
        assert_eq!(sorter.fetch().unwrap(), Some(2));
    }

    #[test]
    fn test_nested_run_tree() {
        let mut input: Vec<i32> = (0..120).map(|n| n % 31).collect();
        input.shuffle(&mut rand::thread_rng());

        let mut top: Sorter<i32> = Sorter::new();
        for half in input.chunks(60) {
            let mut mid: Sorter<i32> = Sorter::new();
            for part in half.chunks(17) {
                mid.add_run(sealed_run(part));
            }
            top.add_run(mid);
        }

        let drained: Result<Vec<i32>, _> = top.drain().collect();
        let drained = drained.unwrap();

        let mut expected = input;
        expected.sort();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_merge_is_stable_across_runs() {
        fn by_key(a: &(i32, i32), b: &(i32, i32)) -> Ordering {
            a.0.cmp(&b.0)
        }

        let mut merged = Sorter::with_compare(by_key);
        for tag in 0..2 {
            let mut run = Sorter::with_compare(by_key);
            for key in [1, 2] {
                run.feed((key, tag)).unwrap();
            }
            run.sort().unwrap();
            run.flip().unwrap();
            merged.add_run(run);
        }

        let drained: Result<Vec<(i32, i32)>, _> = merged.drain().collect();
        assert_eq!(drained.unwrap(), vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
    }
}
