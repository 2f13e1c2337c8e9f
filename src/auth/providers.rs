/// Time and Randomness Providers
///
/// The session service never reads the system clock or the thread RNG
/// directly. Both are injected so tests can pin `now` and make generated
/// secrets reproducible.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

/// Source of the current UTC time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a settable instant
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now = *now + by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned lock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Source of secret material and timing jitter
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Uniform value in `[low, high)`
    fn jitter_millis(&self, low: u64, high: u64) -> u64;
}

/// Operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    fn jitter_millis(&self, low: u64, high: u64) -> u64 {
        OsRng.gen_range(low..high)
    }
}

/// Deterministic generator for tests
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.lock().fill_bytes(dest);
    }

    fn jitter_millis(&self, low: u64, high: u64) -> u64 {
        self.lock().gen_range(low..high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);

        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);
        let mut buf_a = [0u8; 32];
        let mut buf_b = [0u8; 32];

        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);

        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let random = OsRandom;
        for _ in 0..100 {
            let ms = random.jitter_millis(150, 350);
            assert!((150..350).contains(&ms));
        }
    }
}
