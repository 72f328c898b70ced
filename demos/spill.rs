//! Spilling collaborator demo: every time a run's cache reaches its
//! advisory threshold it is sorted, sealed and spilled to a temp file; the
//! parent then merges the spilled runs back, refilling in small batches so
//! memory stays bounded.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, prelude::*};

use env_logger;
use log;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use run_merge::{RunStore, Sorter, StoreError};

/// How many items a spilled run reads back per refill.
const REFILL_BATCH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct Posting {
    term: String,
    doc: u32,
}

/// Persists a sealed run to an anonymous temp file as a MessagePack stream
/// and serves it back in `REFILL_BATCH`-sized slices.
struct SpillStore {
    reader: Option<io::BufReader<fs::File>>,
    remaining: usize,
}

impl SpillStore {
    fn new() -> Self {
        SpillStore {
            reader: None,
            remaining: 0,
        }
    }
}

impl RunStore<Posting> for SpillStore {
    fn flush(&mut self, window: &mut VecDeque<Posting>) -> Result<(), StoreError> {
        let mut writer = io::BufWriter::new(tempfile::tempfile()?);

        self.remaining = window.len();
        for posting in window.drain(..) {
            rmp_serde::encode::write(&mut writer, &posting)?;
        }

        let mut file = writer.into_inner().map_err(|err| err.into_error())?;
        file.rewind()?;
        self.reader = Some(io::BufReader::new(file));

        return Ok(());
    }

    fn refill(&mut self, window: &mut VecDeque<Posting>) -> Result<usize, StoreError> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(0),
        };

        let count = self.remaining.min(REFILL_BATCH);
        for _ in 0..count {
            window.push_back(rmp_serde::decode::from_read(&mut *reader)?);
        }
        self.remaining -= count;

        return Ok(count);
    }
}

fn new_run() -> Sorter<Posting> {
    Sorter::new().with_store(SpillStore::new()).with_mem_thresh(8)
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let terms = ["alpha", "bravo", "charlie", "delta", "echo"];
    let mut postings: Vec<Posting> = (0..40)
        .map(|n: usize| Posting {
            term: terms[n * 7 % terms.len()].to_string(),
            doc: (n * 13 % 40) as u32,
        })
        .collect();
    postings.shuffle(&mut rand::thread_rng());

    let mut merged: Sorter<Posting> = Sorter::new();

    let mut run = new_run();
    for posting in postings {
        run.feed(posting).unwrap();
        if run.buffered() >= run.mem_thresh() {
            run.sort().unwrap();
            run.flip().unwrap();
            merged.add_run(run);
            run = new_run();
        }
    }
    if run.buffered() > 0 {
        run.sort().unwrap();
        run.flip().unwrap();
        merged.add_run(run);
    }

    for posting in merged.drain() {
        let posting = posting.unwrap();
        println!("{} {}", posting.term, posting.doc);
    }
}
