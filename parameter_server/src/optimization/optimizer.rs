/// Defines the rule that turns a gradient entry into a weight update.
///
/// Implementations are called with the store's lock held, once per gradient entry.
pub trait Optimizer: Send {
    /// Applies `delta` to the weight at `index`.
    ///
    /// # Arguments
    /// * `weights` - The weights of the store.
    /// * `index` - A position already checked to be inside `weights`.
    /// * `delta` - The accumulated gradient entry for that position.
    fn update(&mut self, weights: &mut [f32], index: usize, delta: f32);
}
