use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

/// Reconnect delay calculator shared by the stream actors (linear, capped)
/// and the telemetry bridge (exponential, jittered).
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    backoff_type: BackoffType,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    attempt: u32,
}

impl BackoffStrategy {
    pub fn new(backoff_type: BackoffType, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            backoff_type,
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: false,
            attempt: 0,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffType::Fixed, delay, delay)
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffType::Linear, base_delay, max_delay)
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffType::Exponential, base_delay, max_delay)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let delay = match self.backoff_type {
            BackoffType::Fixed => self.base_delay,
            BackoffType::Linear => self.base_delay * self.attempt,
            BackoffType::Exponential => self.calculate_exponential_delay(),
        };

        let delay = self.apply_max_limit(delay);

        if self.jitter {
            self.apply_jitter(delay)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn get_attempt(&self) -> u32 {
        self.attempt
    }

    fn calculate_exponential_delay(&self) -> Duration {
        let multiplier = self.multiplier.powi(self.attempt.saturating_sub(1) as i32);

        let millis = (self.base_delay.as_millis() as f64 * multiplier) as u64;
        Duration::from_millis(millis)
    }

    fn apply_max_limit(&self, delay: Duration) -> Duration {
        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..=1.5);

        let millis = (delay.as_millis() as f64 * jitter_factor) as u64;
        let jittered = Duration::from_millis(millis);

        self.apply_max_limit(jittered)
    }
}
