use rand::Rng;
use std::time::Duration;

/// Returns `base` stretched by a random fraction in `[0, jitter)` of itself.
pub fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let mut rng = rand::thread_rng();
    let factor: f64 = rng.gen_range(0.0..jitter);
    base + base.mul_f64(factor)
}
