use super::ParamGen;

/// Starts every weight at the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstParamGen(f32);

impl ConstParamGen {
    pub fn new(value: f32) -> Self {
        Self(value)
    }

    pub fn zeros() -> Self {
        Self(0.)
    }
}

impl ParamGen for ConstParamGen {
    fn init(&mut self, weights: &mut [f32]) {
        weights.fill(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_weights() {
        assert_eq!(ConstParamGen::zeros().generate(3), vec![0.; 3]);
        assert!(ConstParamGen::zeros().generate(0).is_empty());
    }

    #[test]
    fn overwrites_previous_values() {
        let mut weights = vec![1., 2., 3.];
        ConstParamGen::new(-0.5).init(&mut weights);
        assert_eq!(weights, vec![-0.5; 3]);
    }
}
