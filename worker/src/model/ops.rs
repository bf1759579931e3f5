//! Gradient and loss kernels.
//!
//! Gradients follow the log-likelihood, `(y - p) * x` averaged over the labeled samples
//! of a minibatch, so an update adds `learning_rate * delta` to the weights.

use comms::sparse::{SparseDataset, SparseGradient};
use rayon::prelude::*;

use super::{Weights, predict, target};

const EPSILON: f32 = 1e-7;

/// Computes the sparse gradient of `batch`, only touched coordinates get an entry.
///
/// # Arguments
/// * `weights` - The current weights, at least for every index in `batch`.
/// * `batch` - The minibatch, unlabeled samples are skipped.
/// * `version` - The version to stamp the gradient with.
pub fn minibatch_gradient<W>(weights: &W, batch: &SparseDataset, version: u32) -> SparseGradient
where
    W: Weights + ?Sized,
{
    let mut grad = SparseGradient::new(version);
    let mut labeled = 0;

    for sample in batch {
        let Some(label) = sample.label else {
            continue;
        };

        let err = target(label) - predict(weights, sample);
        for &(index, x) in &sample.features {
            grad.accumulate(index, err * x);
        }

        labeled += 1;
    }

    if labeled > 0 {
        grad.scale(1. / labeled as f32);
    }

    grad
}

/// Computes the gradient of `batch` over the whole weight vector.
///
/// Indices past `weights.len()` are ignored.
pub fn dense_gradient(weights: &[f32], batch: &SparseDataset) -> Vec<f32> {
    let mut grad = vec![0.; weights.len()];
    let mut labeled = 0;

    for sample in batch {
        let Some(label) = sample.label else {
            continue;
        };

        let err = target(label) - predict(weights, sample);
        for &(index, x) in &sample.features {
            if let Some(g) = usize::try_from(index).ok().and_then(|i| grad.get_mut(i)) {
                *g += err * x;
            }
        }

        labeled += 1;
    }

    if labeled > 0 {
        let scale = 1. / labeled as f32;
        grad.iter_mut().for_each(|g| *g *= scale);
    }

    grad
}

/// The average binary cross entropy of the labeled samples of `dataset`.
///
/// # Returns
/// `None` if the dataset has no labeled sample.
pub fn log_loss<W>(weights: &W, dataset: &SparseDataset) -> Option<f32>
where
    W: Weights + Sync + ?Sized,
{
    let (sum, count) = dataset
        .samples()
        .par_iter()
        .filter_map(|sample| {
            let y = target(sample.label?);
            let p = predict(weights, sample).clamp(EPSILON, 1. - EPSILON);
            Some((-(y * p.ln() + (1. - y) * (1. - p).ln()) as f64, 1usize))
        })
        .reduce(|| (0., 0), |a, b| (a.0 + b.0, a.1 + b.1));

    (count > 0).then(|| (sum / count as f64) as f32)
}
