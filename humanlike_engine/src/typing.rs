//! Human-like typing delays.

use std::sync::Arc;
use std::time::Duration;

use crate::rng::RandomSource;

pub const MAX_TYPING_DELAY_MS: u64 = 15_000;
const JITTER_LOW: f64 = 0.85;
const JITTER_HIGH: f64 = 1.15;

/// Turns utterance length into the time a person would need to type it.
#[derive(Clone)]
pub struct TypingSimulator {
    min_speed: u32,
    max_speed: u32,
    rng: Arc<dyn RandomSource>,
}

impl TypingSimulator {
    /// Speeds are characters per second; zero speeds are bumped to 1.
    pub fn new(min_speed: u32, max_speed: u32, rng: Arc<dyn RandomSource>) -> Self {
        let min_speed = min_speed.max(1);
        let max_speed = max_speed.max(min_speed);
        Self {
            min_speed,
            max_speed,
            rng,
        }
    }

    /// Delay for `text`: `chars * 1000 / speed` ms, jittered by 0.85-1.15 and
    /// capped at 15 s.
    pub fn delay_for(&self, text: &str) -> Duration {
        let length = text.chars().count() as u64;
        let speed = self.rng.range_inclusive(self.min_speed, self.max_speed) as u64;
        let base_ms = length * 1000 / speed;
        let jitter = self.rng.uniform(JITTER_LOW, JITTER_HIGH);
        let delay_ms = ((base_ms as f64) * jitter) as u64;
        Duration::from_millis(delay_ms.min(MAX_TYPING_DELAY_MS))
    }

    pub async fn pause_for(&self, text: &str) {
        let delay = self.delay_for(text);
        tracing::trace!("Typing delay {:?} for {} chars", delay, text.chars().count());
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{SequenceRandom, ThreadRandom};

    fn bounds(length: u64, min: u32, max: u32) -> (u64, u64) {
        let low = ((length as f64) * 1000.0 / max as f64 * JITTER_LOW).min(15_000.0);
        let high = ((length as f64) * 1000.0 / min as f64 * JITTER_HIGH).min(15_000.0);
        (low.floor() as u64, high.ceil() as u64)
    }

    #[test]
    fn delay_stays_within_bounds() {
        let simulator = TypingSimulator::new(3, 8, Arc::new(ThreadRandom::seeded(7)));
        for length in [0usize, 1, 5, 17, 40, 120, 400] {
            let text: String = "x".repeat(length);
            let (low, high) = bounds(length as u64, 3, 8);
            for _ in 0..200 {
                let delay = simulator.delay_for(&text).as_millis() as u64;
                assert!(
                    delay + 1 >= low && delay <= high,
                    "length {} gave {}ms outside [{}, {}]",
                    length,
                    delay,
                    low,
                    high
                );
            }
        }
    }

    #[test]
    fn slowest_speed_with_max_jitter() {
        // speed draw 0.0 -> 3 cps; jitter draw 0.999.. -> ~1.15
        let rng = Arc::new(SequenceRandom::new(vec![0.0, 0.999_999]));
        let simulator = TypingSimulator::new(3, 8, rng);
        let delay = simulator.delay_for("abcdef").as_millis();
        assert!((2299..=2300).contains(&delay), "got {}", delay);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let simulator = TypingSimulator::new(4, 4, Arc::new(SequenceRandom::constant(0.5)));
        // 4 chars at 4 cps with a neutral jitter
        let delay = simulator.delay_for("你好世界").as_millis();
        assert!((999..=1000).contains(&delay), "got {}", delay);
    }

    #[test]
    fn long_text_is_capped() {
        let simulator = TypingSimulator::new(3, 8, Arc::new(SequenceRandom::constant(0.9)));
        let text = "a".repeat(5_000);
        assert_eq!(simulator.delay_for(&text), Duration::from_millis(MAX_TYPING_DELAY_MS));
    }
}
