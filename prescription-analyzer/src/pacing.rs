use std::time::Duration;

use rand::Rng;

/// Human-like pauses between browser interactions.
///
/// Every delay is multiplied by `scale`; a scale of zero makes all pauses
/// return immediately.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    scale: f64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Pacer {
    pub fn new(scale: f64) -> Self {
        Self {
            scale: if scale.is_finite() { scale.max(0.0) } else { 1.0 },
        }
    }

    pub fn instant() -> Self {
        Self { scale: 0.0 }
    }

    pub fn is_instant(&self) -> bool {
        self.scale == 0.0
    }

    /// Sleep for a uniformly random duration between `min` and `max` seconds.
    pub async fn delay(&self, min: f64, max: f64) {
        let pause = self.sample(min, max);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    /// Pause between two keystrokes.
    pub async fn keystroke(&self) {
        self.delay(0.05, 0.15).await;
    }

    pub fn sample(&self, min: f64, max: f64) -> Duration {
        if self.is_instant() {
            return Duration::ZERO;
        }
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let lo = lo.max(0.0);
        let hi = hi.max(lo);
        let secs = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        Duration::from_secs_f64(secs * self.scale)
    }
}
