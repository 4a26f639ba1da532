use crate::config::ProducerConfig;
use crate::error::codes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Error codes that mark a failed attempt as transient.
const RETRIABLE_CODES: &[&str] = &[
    codes::REQUEST_ERROR,
    codes::UNAUTHORIZED,
    codes::WRITE_QUOTA_EXCEED,
    codes::READ_QUOTA_EXCEED,
    codes::INTERNAL_SERVER_ERROR,
    codes::SERVER_BUSY,
    codes::SERVICE_UNAVAILABLE,
    codes::SIGNATURE_NOT_MATCH,
];

/// Decides whether a failed batch goes back to the retry queue and when.
///
/// Backoff for the n-th failure (zero-based) is
/// `min(max, base * 2^n) * (1 + jitter)` with jitter uniform in
/// `[-0.5, 0.5]`.
#[derive(Debug)]
pub struct RetryPolicy {
    retries: u32,
    base_retry_backoff_ms: u64,
    max_retry_backoff_ms: u64,
    retry_on_project_not_exist: bool,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    pub fn new(config: &ProducerConfig) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RetryPolicy {
            retries: config.retries,
            base_retry_backoff_ms: config.base_retry_backoff_ms,
            max_retry_backoff_ms: config.max_retry_backoff_ms,
            retry_on_project_not_exist: config.retry_on_project_not_exist,
            rng: Mutex::new(rng),
        }
    }

    pub fn is_retriable(&self, error_code: &str) -> bool {
        RETRIABLE_CODES.contains(&error_code)
            || (self.retry_on_project_not_exist && error_code == codes::PROJECT_NOT_EXIST)
    }

    /// A batch that has made `attempts` attempts, the last one failing with
    /// `error_code`, gets another try.
    pub fn should_retry(&self, error_code: &str, attempts: usize, closing: bool) -> bool {
        !closing && attempts <= self.retries as usize && self.is_retriable(error_code)
    }

    /// Un-jittered backoff after `attempt_index` earlier failures.
    pub fn base_delay_ms(&self, attempt_index: u32) -> u64 {
        let exp = self
            .base_retry_backoff_ms
            .saturating_mul(1u64.checked_shl(attempt_index).unwrap_or(u64::MAX));
        exp.min(self.max_retry_backoff_ms)
    }

    pub fn next_delay_ms(&self, attempt_index: u32) -> u64 {
        let jitter: f64 = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            rng.gen_range(-0.5..=0.5)
        };
        (self.base_delay_ms(attempt_index) as f64 * (1.0 + jitter)).round() as u64
    }
}
