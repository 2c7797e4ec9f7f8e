use ndarray::Array4;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

/// Standard normal tensor; the same seed always yields the same values.
pub fn randn(shape: (usize, usize, usize, usize), seed: Option<u64>) -> Array4<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Array4::from_shape_simple_fn(shape, || rng.sample(StandardNormal))
}
