use super::Optimizer;

/// Plain SGD, every delta moves its weight by `learning_rate * delta`.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update(&mut self, weights: &mut [f32], index: usize, delta: f32) {
        weights[index] += self.learning_rate * delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_touches_the_indexed_weight() {
        let mut weights = [1., 1., 1.];
        let mut sgd = GradientDescent::new(0.25);

        sgd.update(&mut weights, 1, 2.);
        sgd.update(&mut weights, 1, -4.);
        assert_eq!(weights, [1., 0.5, 1.]);
    }
}
