//! Storage collaborator boundary.
//!
//! A run does not know how its contents are persisted. At `flip` time it
//! hands its window to the [`RunStore::flush`] hook; when a sealed leaf run
//! exhausts its window it asks [`RunStore::refill`] for the next batch. What
//! happens in between — file layout, serialization, caching — belongs
//! entirely to the collaborator.

use std::collections::VecDeque;
use std::error::Error;

/// Opaque failure raised by a storage collaborator. It propagates through
/// the engine unchanged.
pub type StoreError = Box<dyn Error + Send + Sync + 'static>;

/// Storage hooks a run invokes at its phase transitions.
///
/// Both hooks default to the in-memory behavior: `flush` leaves the window
/// untouched and `refill` reports exhaustion.
pub trait RunStore<T> {
    /// Invoked exactly once, when the run seals its write phase.
    ///
    /// The collaborator may drain `window` to externalize the items;
    /// whatever it leaves behind keeps being served from memory.
    fn flush(&mut self, window: &mut VecDeque<T>) -> Result<(), StoreError> {
        let _ = window;
        Ok(())
    }

    /// Invoked when a sealed leaf run's window empties. Pushes the next
    /// batch of items onto the back of `window` and returns how many were
    /// delivered; `0` means the source is exhausted.
    ///
    /// Batches must arrive in non-decreasing order, and no delivered item
    /// may sort below one delivered earlier — the endpost computation
    /// relies on a run's window maximum bounding everything still upstream.
    fn refill(&mut self, window: &mut VecDeque<T>) -> Result<usize, StoreError> {
        let _ = window;
        Ok(0)
    }
}

/// The default collaborator: keeps everything in memory.
pub struct NoStore;

impl<T> RunStore<T> for NoStore {}
