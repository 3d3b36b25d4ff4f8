use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Exponentially distributed delays between critical section requests.
pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    pub rate: f64,
}

impl Poisson<SmallRng> {
    pub fn new(rate: f64, seed: &[u8; 32]) -> Self {
        Self {
            rng: Box::new(SmallRng::from_seed(*seed)),
            rate,
        }
    }

    pub fn from_entropy(rate: f64) -> Self {
        Self::new(rate, &rand::random())
    }
}

impl<R: Rng + ?Sized> Poisson<R> {
    /// Seconds until the next event.
    pub fn time_for_next_event(&mut self) -> f64 {
        -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate
    }

    pub fn next_delay(&mut self) -> Duration {
        let secs = self.time_for_next_event();
        if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}
