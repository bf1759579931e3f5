/// Produces the initial state of a shard's weights.
pub trait ParamGen {
    /// Overwrites every slot of `weights` with an initial value.
    fn init(&mut self, weights: &mut [f32]);

    /// Allocates `len` weights and initializes them.
    fn generate(&mut self, len: usize) -> Vec<f32> {
        let mut weights = vec![0.; len];
        self.init(&mut weights);
        weights
    }
}
