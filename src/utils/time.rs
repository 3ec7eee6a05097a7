use std::time::Duration;

use rand::Rng;

/// Spread a periodic duration by up to `factor` in either direction, to
/// keep independent caches from ticking in lockstep.
pub(crate) fn jitter(
    base: Duration,
    factor: f64,
) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    let spread = base.as_secs_f64() * factor;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
}
