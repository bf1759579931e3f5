use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use comms::sparse::SparseDataset;
use parking_lot::{Condvar, Mutex};

use super::RunState;

/// The minibatches parsed from one fetched range.
#[derive(Debug, Default)]
struct Segment {
    batches: VecDeque<SparseDataset>,
    /// No more minibatches will be appended.
    sealed: bool,
}

#[derive(Debug)]
struct Shared {
    segments: VecDeque<Segment>,
    ready: usize,
    run: RunState,
}

/// A bounded queue of minibatch segments between the prefetch thread and its consumer.
///
/// Holds at most `capacity` minibatches: the producer takes one slot per minibatch
/// before publishing it and the consumer gives it back on every pop. Every wait
/// returns once the ring is closed.
#[derive(Debug)]
pub struct MinibatchRing {
    capacity: usize,
    shared: Mutex<Shared>,
    readable: Condvar,
    writable: Condvar,
}

impl MinibatchRing {
    /// Creates a new `MinibatchRing`.
    ///
    /// # Arguments
    /// * `capacity` - The amount of minibatches that may be pending at once.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            shared: Mutex::new(Shared {
                segments: VecDeque::new(),
                ready: 0,
                run: RunState::Running,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The amount of minibatches waiting to be consumed.
    pub fn len(&self) -> usize {
        self.shared.lock().ready
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn run_state(&self) -> RunState {
        self.shared.lock().run
    }

    /// Appends `batch` to the open segment, opening a new one if needed.
    ///
    /// Blocks while the ring is full.
    ///
    /// # Returns
    /// `false` if the ring was closed, the minibatch is dropped.
    pub fn push(&self, batch: SparseDataset) -> bool {
        let mut shared = self.shared.lock();

        while shared.run.is_running() && shared.ready >= self.capacity {
            self.writable.wait(&mut shared);
        }

        if !shared.run.is_running() {
            return false;
        }

        match shared.segments.back_mut() {
            Some(segment) if !segment.sealed => segment.batches.push_back(batch),
            _ => shared.segments.push_back(Segment {
                batches: VecDeque::from([batch]),
                sealed: false,
            }),
        }

        shared.ready += 1;
        self.readable.notify_one();
        true
    }

    /// Closes the open segment, the next push opens a new one.
    pub fn seal(&self) {
        let mut shared = self.shared.lock();

        if let Some(segment) = shared.segments.back_mut() {
            segment.sealed = true;
        }
    }

    fn take(shared: &mut Shared) -> Option<SparseDataset> {
        while let Some(front) = shared.segments.front_mut() {
            if let Some(batch) = front.batches.pop_front() {
                shared.ready -= 1;
                return Some(batch);
            }

            if !front.sealed {
                return None;
            }

            shared.segments.pop_front();
        }

        None
    }

    /// Takes the oldest minibatch, blocking until there is one.
    ///
    /// # Returns
    /// `None` once the ring is closed and drained.
    pub fn pop(&self) -> Option<SparseDataset> {
        let mut shared = self.shared.lock();

        loop {
            if let Some(batch) = Self::take(&mut shared) {
                self.writable.notify_one();
                return Some(batch);
            }

            if !shared.run.is_running() {
                return None;
            }

            self.readable.wait(&mut shared);
        }
    }

    /// Takes the oldest minibatch if there is one.
    pub fn try_pop(&self) -> Option<SparseDataset> {
        let batch = Self::take(&mut self.shared.lock());

        if batch.is_some() {
            self.writable.notify_one();
        }

        batch
    }

    /// Asks the producer and the consumer to stop, wakes every wait.
    pub fn close(&self) {
        let mut shared = self.shared.lock();

        if shared.run.is_running() {
            shared.run = RunState::Stopping;
        }

        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Marks the producer as gone, wakes every wait.
    pub fn finish(&self) {
        self.shared.lock().run = RunState::Stopped;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Sleeps for `timeout` unless the ring is closed in the meantime.
    ///
    /// # Returns
    /// Whether the ring is still running.
    pub fn sleep_unless_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock();

        while shared.run.is_running() {
            if self
                .writable
                .wait_until(&mut shared, deadline)
                .timed_out()
            {
                break;
            }
        }

        shared.run.is_running()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use comms::sparse::SparseSample;

    use super::*;

    fn batch(id: u64) -> SparseDataset {
        [SparseSample::new(Some(1.), vec![(id, 1.)])]
            .into_iter()
            .collect()
    }

    fn id(batch: &SparseDataset) -> u64 {
        batch.samples()[0].features[0].0
    }

    fn ring(capacity: usize) -> MinibatchRing {
        MinibatchRing::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn pops_in_publish_order_across_segments() {
        let ring = ring(8);

        ring.push(batch(0));
        ring.push(batch(1));
        ring.seal();
        ring.push(batch(2));

        let ids: Vec<_> = (0..3).map(|_| id(&ring.pop().unwrap())).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(ring.try_pop().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn drained_sealed_segments_are_dropped() {
        let ring = ring(4);

        ring.push(batch(0));
        ring.seal();
        ring.pop();
        ring.seal();
        ring.push(batch(1));

        assert_eq!(id(&ring.try_pop().unwrap()), 1);
        assert_eq!(ring.shared.lock().segments.len(), 1);
    }

    #[test]
    fn closed_ring_drains_then_ends() {
        let ring = ring(4);

        ring.push(batch(0));
        ring.close();

        assert!(!ring.push(batch(1)));
        assert_eq!(id(&ring.pop().unwrap()), 0);
        assert!(ring.pop().is_none());
        assert_eq!(ring.run_state(), RunState::Stopping);

        ring.finish();
        assert_eq!(ring.run_state(), RunState::Stopped);
    }

    #[test]
    fn close_wakes_a_blocked_consumer() {
        let ring = Arc::new(ring(1));

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.pop())
        };

        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn full_ring_blocks_the_producer_until_a_pop() {
        const CAPACITY: usize = 3;
        let ring = Arc::new(ring(CAPACITY));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..=CAPACITY as u64 {
                    ring.push(batch(i));
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(ring.len(), CAPACITY);
        assert!(!producer.is_finished());

        assert_eq!(id(&ring.pop().unwrap()), 0);
        producer.join().unwrap();
        assert_eq!(ring.len(), CAPACITY);
    }

    #[test]
    fn sleep_is_cut_short_by_close() {
        let ring = Arc::new(ring(1));

        let sleeper = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.sleep_unless_closed(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert!(!sleeper.join().unwrap());
        assert!(!ring.sleep_unless_closed(Duration::ZERO));
    }
}
