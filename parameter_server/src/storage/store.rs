use comms::{
    msg::GradientShard,
    sparse::{FeatureIndex, ModelGradient},
};
use parking_lot::Mutex;

use crate::{
    optimization::Optimizer,
    storage::{Result, StorageErr},
};

/// The weights and the optimizer state, only ever touched behind the store's lock.
#[derive(Debug)]
struct Guarded<O> {
    weights: Box<[f32]>,
    optimizer: O,
    applied: u64,
}

/// The authoritative copy of a slice of the weight vector.
///
/// Every gradient is applied in a single critical section: the lock is taken once per
/// gradient, not once per entry. Concurrent writers therefore serialize on whole updates
/// and readers may observe the weights between any two of them, never halfway through one.
/// Finer grained locking would let more gradients overlap at the cost of torn reads.
#[derive(Debug)]
pub struct WeightStore<O: Optimizer> {
    len: usize,
    guarded: Mutex<Guarded<O>>,
}

impl<O: Optimizer> WeightStore<O> {
    /// Creates a new `WeightStore`.
    ///
    /// # Arguments
    /// * `weights` - The initial state of the weights.
    /// * `optimizer` - The update rule applied to every incoming gradient.
    pub fn new(weights: Vec<f32>, optimizer: O) -> Self {
        Self {
            len: weights.len(),
            guarded: Mutex::new(Guarded {
                weights: weights.into_boxed_slice(),
                optimizer,
                applied: 0,
            }),
        }
    }

    /// Returns the amount of weights in the store.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns how many gradients have been applied so far.
    pub fn applied(&self) -> u64 {
        self.guarded.lock().applied
    }

    fn check_index(&self, index: u64) -> Result<usize> {
        match usize::try_from(index) {
            Ok(i) if i < self.len => Ok(i),
            _ => Err(StorageErr::IndexOutOfRange {
                index,
                len: self.len,
            }),
        }
    }

    /// Applies `grad` to the weights through the optimizer.
    ///
    /// Sparse gradients are keyed by store index. Nothing is applied unless every
    /// entry fits in the store.
    ///
    /// # Arguments
    /// * `grad` - A dense or sparse gradient.
    ///
    /// # Returns
    /// The amount of entries applied, or a `StorageErr` if the gradient doesn't fit.
    pub fn apply_gradient(&self, grad: &ModelGradient) -> Result<usize> {
        match grad {
            ModelGradient::Dense(deltas) => {
                if deltas.len() != self.len {
                    return Err(StorageErr::SizeMismatch {
                        got: deltas.len(),
                        expected: self.len,
                    });
                }

                Ok(self.apply_entries(deltas.iter().copied().enumerate()))
            }
            ModelGradient::Sparse(grad) => {
                let entries = grad
                    .iter()
                    .map(|(i, d)| self.check_index(i).map(|i| (i, d)))
                    .collect::<Result<Vec<_>>>()?;

                Ok(self.apply_entries(entries))
            }
        }
    }

    /// Applies a gradient shard received from a worker, keyed by local index.
    ///
    /// # Returns
    /// The amount of entries applied, or a `StorageErr` if any index is out of range.
    pub fn apply_shard(&self, shard: &GradientShard) -> Result<usize> {
        for &(index, _) in &shard.entries {
            self.check_index(index.into())?;
        }

        let entries = shard.entries.iter().map(|&(i, d)| (i as usize, d));
        Ok(self.apply_entries(entries))
    }

    fn apply_entries<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (usize, f32)>,
    {
        let mut guarded = self.guarded.lock();
        let Guarded {
            weights,
            optimizer,
            applied,
        } = &mut *guarded;

        let mut count = 0;
        for (index, delta) in entries {
            optimizer.update(weights, index, delta);
            count += 1;
        }

        *applied += 1;
        count
    }

    /// Copies the weights at `indices`, in the same order.
    ///
    /// # Returns
    /// The weights or a `StorageErr` if any index is out of range.
    pub fn pull_subset<I>(&self, indices: I) -> Result<Vec<f32>>
    where
        I: IntoIterator,
        I::Item: Into<FeatureIndex>,
    {
        let indices = indices
            .into_iter()
            .map(|i| self.check_index(i.into()))
            .collect::<Result<Vec<_>>>()?;

        let guarded = self.guarded.lock();
        Ok(indices.into_iter().map(|i| guarded.weights[i]).collect())
    }

    /// Copies every weight in the store.
    pub fn pull_all(&self) -> Vec<f32> {
        self.guarded.lock().weights.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use comms::sparse::SparseGradient;

    use super::*;
    use crate::optimization::{GradientDescent, Momentum};

    #[test]
    fn sgd_adds_scaled_delta() {
        let store = WeightStore::new(vec![0.; 4], GradientDescent::new(0.5));
        let grad: SparseGradient = [(1, 2.0), (3, -4.0)].into_iter().collect();

        let applied = store.apply_gradient(&ModelGradient::Sparse(grad)).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(store.pull_all(), vec![0., 1., 0., -2.]);
        assert_eq!(store.applied(), 1);
    }

    #[test]
    fn dense_gradient_must_cover_the_store() {
        let store = WeightStore::new(vec![1.; 3], GradientDescent::new(1.));

        let err = store
            .apply_gradient(&ModelGradient::Dense(vec![1.; 2]))
            .unwrap_err();
        assert_eq!(err, StorageErr::SizeMismatch { got: 2, expected: 3 });

        store
            .apply_gradient(&ModelGradient::Dense(vec![1., 0., -1.]))
            .unwrap();
        assert_eq!(store.pull_all(), vec![2., 1., 0.]);
    }

    #[test]
    fn out_of_range_shard_applies_nothing() {
        let store = WeightStore::new(vec![0.; 2], GradientDescent::new(1.));
        let shard = GradientShard {
            entries: vec![(0, 1.), (2, 1.)],
            version: 1,
        };

        let err = store.apply_shard(&shard).unwrap_err();
        assert_eq!(err, StorageErr::IndexOutOfRange { index: 2, len: 2 });
        assert_eq!(store.pull_all(), vec![0., 0.]);
        assert_eq!(store.applied(), 0);
    }

    #[test]
    fn momentum_smooths_repeated_deltas() {
        let store = WeightStore::new(vec![0.], Momentum::new(1, 1., 0.5));
        let shard = GradientShard {
            entries: vec![(0, 1.)],
            version: 1,
        };

        store.apply_shard(&shard).unwrap();
        assert_eq!(store.pull_all(), vec![0.5]);

        store.apply_shard(&shard).unwrap();
        assert_eq!(store.pull_all(), vec![1.25]);
    }

    #[test]
    fn pull_subset_keeps_request_order() {
        let store = WeightStore::new(vec![0., 10., 20., 30.], GradientDescent::new(1.));

        assert_eq!(store.pull_subset([3u32, 0, 3]).unwrap(), vec![30., 0., 30.]);
        assert!(store.pull_subset([4u32]).is_err());
    }

    #[test]
    fn concurrent_gradients_are_not_lost() {
        const THREADS: usize = 8;
        const STEPS: usize = 500;

        let store = Arc::new(WeightStore::new(vec![0.; 2], GradientDescent::new(1.)));

        thread::scope(|s| {
            for _ in 0..THREADS {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    let shard = GradientShard {
                        entries: vec![(0, 1.), (1, 2.)],
                        version: 0,
                    };

                    for _ in 0..STEPS {
                        store.apply_shard(&shard).unwrap();
                    }
                });
            }
        });

        let expected = (THREADS * STEPS) as f32;
        assert_eq!(store.pull_all(), vec![expected, 2. * expected]);
        assert_eq!(store.applied(), (THREADS * STEPS) as u64);
    }
}
