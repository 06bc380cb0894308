//! Work Queue and Thread Pool Module
//!
//! A closable multi-producer/multi-consumer queue with a completion barrier,
//! plus the small scoped pool built on it.
//!
//! # Lifecycle
//! 1. Producers [`push`](WorkQueue::push) items while workers
//!    [`pop`](WorkQueue::pop) them.
//! 2. A worker blocked on an empty queue wakes on the next push or on
//!    [`close`](WorkQueue::close).
//! 3. `pop` returns `None` only once the queue is closed *and* empty.
//! 4. Every popped item is acknowledged with
//!    [`task_done`](WorkQueue::task_done); [`join`](WorkQueue::join) blocks
//!    until all pushed items are acknowledged.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Pushed but not yet acknowledged.
    pending: usize,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    finished: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                pending: 0,
            }),
            available: Condvar::new(),
            finished: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues an item. A closed queue hands the item back.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        state.pending += 1;
        self.available.notify_one();
        Ok(())
    }

    /// No more pushes; wakes every waiting worker.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    /// Blocks for the next item; `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Acknowledges one popped item.
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.finished.notify_all();
        }
    }

    /// Blocks until every pushed item has been acknowledged.
    pub fn join(&self) {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

}

/// Acknowledges an item even if the worker panics.
struct Done<'a, T>(&'a WorkQueue<T>);

impl<T> Drop for Done<'_, T> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

/// Closes the queue when the producer finishes, panicking or not, so
/// workers blocked in `pop` always return.
struct CloseOnDrop<'a, T>(&'a WorkQueue<T>);

impl<T> Drop for CloseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn drain<T, W: Fn(T)>(queue: &WorkQueue<T>, work: &W) {
    while let Some(item) = queue.pop() {
        let _done = Done(queue);
        work(item);
    }
}

/// Runs `produce` on the calling thread while `threads - 1` scoped workers
/// apply `work` to whatever it pushes. Once `produce` returns, the queue is
/// closed, the calling thread helps drain it, and the call returns after the
/// last item is acknowledged.
pub fn run_pool<T, R, P, W>(threads: usize, produce: P, work: W) -> R
where
    T: Send,
    P: FnOnce(&WorkQueue<T>) -> R,
    W: Fn(T) + Sync,
{
    let queue = WorkQueue::new();
    std::thread::scope(|s| {
        for _ in 1..threads.max(1) {
            s.spawn(|| drain(&queue, &work));
        }
        let out = {
            let _close = CloseOnDrop(&queue);
            produce(&queue)
        };
        drain(&queue, &work);
        queue.join();
        out
    })
}

// ============================================================================
// Semaphore
// ============================================================================

/// Counting semaphore bounding how many jobs run at once.
pub struct Semaphore {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Semaphore {
            count: Mutex::new(count.max(1)),
            cvar: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            count = self.cvar.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        self.cvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fifo_and_close() {
        let queue = WorkQueue::new();
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.close();
        assert_eq!(queue.push(3), Err(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_blocked_worker_wakes_on_close() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        std::thread::scope(|s| {
            let worker = s.spawn(|| queue.pop());
            std::thread::sleep(Duration::from_millis(20));
            queue.close();
            assert_eq!(worker.join().unwrap(), None);
        });
    }

    #[test]
    fn test_worker_waits_for_late_producer() {
        let queue = WorkQueue::new();
        std::thread::scope(|s| {
            let worker = s.spawn(|| {
                let mut seen = Vec::new();
                while let Some(x) = queue.pop() {
                    seen.push(x);
                    queue.task_done();
                }
                seen
            });
            std::thread::sleep(Duration::from_millis(20));
            queue.push(7).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            queue.push(8).unwrap();
            queue.close();
            queue.join();
            assert_eq!(worker.join().unwrap(), vec![7, 8]);
        });
    }

    #[test]
    fn test_pool_processes_each_item_once() {
        let hits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        let produced = run_pool(
            8,
            |queue| {
                for i in 0..1000 {
                    queue.push(i).unwrap();
                }
                1000
            },
            |i: usize| {
                hits[i].fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(produced, 1000);
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_single_thread_pool() {
        let total = AtomicUsize::new(0);
        run_pool(
            1,
            |queue| {
                for i in 1..=10 {
                    queue.push(i).unwrap();
                }
            },
            |i: usize| {
                total.fetch_add(i, Ordering::SeqCst);
            },
        );
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }

    #[test]
    fn test_producer_panic_releases_workers() {
        let seen = AtomicUsize::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_pool(
                4,
                |queue: &WorkQueue<usize>| {
                    for i in 0..10 {
                        queue.push(i).unwrap();
                    }
                    panic!("report stream failed");
                },
                |_: usize| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
            )
        }));
        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_semaphore_limits_concurrency() {
        let sem = Semaphore::new(2);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    sem.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                    sem.release();
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
