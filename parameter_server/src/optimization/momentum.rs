use super::Optimizer;

/// Gradient descent over an exponentially weighted moving average of the deltas.
#[derive(Debug)]
pub struct Momentum {
    learning_rate: f32,
    beta: f32,
    velocity: Box<[f32]>,
}

impl Momentum {
    /// Creates a new `Momentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of weights this instance should track.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta` - The decay of the moving average, in `[0, 1)`.
    ///
    /// # Returns
    /// A new `Momentum` instance.
    pub fn new(len: usize, learning_rate: f32, beta: f32) -> Self {
        Self {
            learning_rate,
            beta,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Momentum {
    fn update(&mut self, weights: &mut [f32], index: usize, delta: f32) {
        let Self {
            learning_rate: lr,
            beta,
            ..
        } = *self;

        let v = &mut self.velocity[index];
        *v = beta * *v + (1. - beta) * lr * delta;
        weights[index] += *v;
    }
}
