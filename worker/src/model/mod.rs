//! The sparse logistic regression model trained by the workers.

mod ops;

use comms::sparse::{FeatureIndex, SparseModel, SparseSample};

pub use ops::{dense_gradient, log_loss, minibatch_gradient};

/// Read access to a weight vector, missing coordinates read as zero.
pub trait Weights {
    fn weight(&self, index: FeatureIndex) -> f32;
}

impl Weights for SparseModel {
    #[inline]
    fn weight(&self, index: FeatureIndex) -> f32 {
        self.get(index).unwrap_or(0.)
    }
}

impl Weights for [f32] {
    #[inline]
    fn weight(&self, index: FeatureIndex) -> f32 {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.get(i))
            .copied()
            .unwrap_or(0.)
    }
}

#[inline]
pub fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

/// The probability of `sample` belonging to the positive class.
pub fn predict<W: Weights + ?Sized>(weights: &W, sample: &SparseSample) -> f32 {
    let z: f32 = sample
        .features
        .iter()
        .map(|&(i, x)| weights.weight(i) * x)
        .sum();

    sigmoid(z)
}

/// Maps a raw label onto `{0, 1}`, any positive label is the positive class.
#[inline]
pub fn target(label: f32) -> f32 {
    if label > 0. { 1. } else { 0. }
}
