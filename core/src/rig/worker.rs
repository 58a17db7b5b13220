//! Bounded worker pool.
//!
//! `WorkerPool` drains a queue of work items with a fixed number of worker
//! threads. Each worker takes the next item, runs it to completion and only
//! then takes another. Workers share nothing but the queue cursor and the
//! result channel. `run` blocks until every item has been processed and
//! returns the results in submission order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::debug;


// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// A pool of `size` workers. Zero is treated as one.
    pub fn new(size: usize) -> Self {
        WorkerPool { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on every item with at most `size` items in flight.
    pub fn run<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let workers = self.size.min(items.len());
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, R)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let job = &job;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    debug!(worker, item = index, "worker picked up item");
                    if tx.send((index, job(item))).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
        for (index, result) in rx {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(1)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn results_follow_submission_order() {
        let pool = WorkerPool::new(3);
        let items: Vec<u64> = (0..20).collect();
        let out = pool.run(&items, |n| {
            thread::sleep(Duration::from_millis((20 - n) % 4));
            n * 10
        });
        assert_eq!(out, (0..20).map(|n| n * 10).collect::<Vec<_>>());
    }

    #[test]
    fn never_more_than_size_in_flight() {
        let pool = WorkerPool::new(2);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..10).collect();

        pool.run(&items, |_| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn every_item_processed_once() {
        let pool = WorkerPool::new(4);
        let seen = Mutex::new(Vec::new());
        let items = vec!["a", "b", "c", "d", "e"];
        pool.run(&items, |s| seen.lock().unwrap().push(s.to_string()));
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn zero_size_and_empty_input() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        let none: Vec<u8> = Vec::new();
        assert!(pool.run(&none, |b| *b).is_empty());
    }
}
