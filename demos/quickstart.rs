use env_logger;
use log;
use rand::seq::SliceRandom;

use run_merge::Sorter;

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mut values: Vec<u32> = (0..30).collect();
    values.shuffle(&mut rand::thread_rng());

    let mut merged: Sorter<u32> = Sorter::new();

    for batch in values.chunks(10) {
        let mut run: Sorter<u32> = Sorter::new();
        for &value in batch {
            run.feed(value).unwrap();
        }
        run.sort().unwrap();
        run.flip().unwrap();
        merged.add_run(run);
    }

    for value in merged.drain() {
        println!("{}", value.unwrap());
    }
}
