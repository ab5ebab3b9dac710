// Copyright © 2026 Pathway

use std::time::Duration;

use log::warn;
use rand::Rng;

const DEFAULT_SLEEP_INITIAL_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_SLEEP_BACKOFF_FACTOR: f64 = 1.2;
const DEFAULT_JITTER: Duration = Duration::from_millis(800);

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    sleep_duration: Duration,
    backoff_factor: f64,
    jitter: Duration,
}

impl RetryConfig {
    pub fn new(sleep_duration: Duration, backoff_factor: f64, jitter: Duration) -> Self {
        Self {
            sleep_duration,
            backoff_factor,
            jitter,
        }
    }

    pub fn sleep_after_error(&mut self) {
        std::thread::sleep(self.sleep_duration);
        self.sleep_duration = self.sleep_duration.mul_f64(self.backoff_factor);
        if !self.jitter.is_zero() {
            self.sleep_duration += rand::rng().random_range(Duration::ZERO..self.jitter);
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_SLEEP_INITIAL_DURATION,
            DEFAULT_SLEEP_BACKOFF_FACTOR,
            DEFAULT_JITTER,
        )
    }
}

/// Runs `func` once and then up to `max_retries` more times while it fails
/// with an error accepted by `is_retriable`. The last result is returned as is.
pub fn execute_with_retries<T, E>(
    mut func: impl FnMut() -> Result<T, E>,
    mut retry_config: RetryConfig,
    max_retries: usize,
    is_retriable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    let mut exec_result = func();
    for attempt_idx in 0..max_retries {
        match &exec_result {
            Ok(_) => return exec_result,
            Err(error) if is_retriable(error) => {
                warn!("Attempt {attempt_idx}: retrying operation after an error: {error}");
            }
            Err(_) => return exec_result,
        }
        retry_config.sleep_after_error();
        exec_result = func();
    }

    exec_result
}
