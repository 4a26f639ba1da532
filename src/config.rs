use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

pub const MAX_BATCH_SIZE_IN_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_BATCH_COUNT: usize = 40960;
pub const MIN_LINGER_MS: u64 = 100;

/// Tuning knobs of a [`LogProducer`](crate::producer::LogProducer).
///
/// **Fields**
/// - `total_size_in_bytes`: memory cap over every record admitted but not
///   yet terminally completed.
/// - `max_block_ms`: how long `send` may wait for memory. `-1` waits
///   forever, `0` never waits.
/// - `io_thread_count`: number of sender workers.
/// - `batch_size_threshold_in_bytes` / `batch_count_threshold`: per-batch
///   caps; a batch is closed as soon as the next record would overflow
///   either one.
/// - `linger_ms`: longest time an open batch waits for more records.
/// - `retries`: retry budget per batch; `0` disables retries.
/// - `base_retry_backoff_ms` / `max_retry_backoff_ms`: exponential backoff
///   bounds, jittered by ±50%.
/// - `adjust_shard_hash` / `buckets`: collapse shard hashes onto `buckets`
///   evenly spaced hash keys.
/// - `retry_on_project_not_exist`: treat `ProjectNotExist` as transient.
/// - `jitter_seed`: fixed seed for the backoff jitter RNG.
///
/// Loadable from JSON with the camelCase option names, e.g.
/// `{"lingerMs": 500, "retries": 3}`; missing keys keep their defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProducerConfig {
    pub total_size_in_bytes: usize,
    pub max_block_ms: i64,
    pub io_thread_count: usize,
    pub batch_size_threshold_in_bytes: usize,
    pub batch_count_threshold: usize,
    pub linger_ms: u64,
    pub retries: u32,
    pub base_retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    pub adjust_shard_hash: bool,
    pub buckets: u32,
    pub retry_on_project_not_exist: bool,
    pub jitter_seed: Option<u64>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            total_size_in_bytes: 100 * 1024 * 1024,
            max_block_ms: 60 * 1000,
            io_thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size_threshold_in_bytes: 512 * 1024,
            batch_count_threshold: 4096,
            linger_ms: 2000,
            retries: 10,
            base_retry_backoff_ms: 100,
            max_retry_backoff_ms: 50 * 1000,
            adjust_shard_hash: true,
            buckets: 64,
            retry_on_project_not_exist: false,
            jitter_seed: None,
        }
    }
}

impl ProducerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document and validate the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ProducerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_total_size_in_bytes(mut self, bytes: usize) -> Self {
        self.total_size_in_bytes = bytes;
        self
    }

    pub fn with_max_block_ms(mut self, ms: i64) -> Self {
        self.max_block_ms = ms;
        self
    }

    pub fn with_io_thread_count(mut self, n: usize) -> Self {
        self.io_thread_count = n;
        self
    }

    pub fn with_batch_size_threshold_in_bytes(mut self, bytes: usize) -> Self {
        self.batch_size_threshold_in_bytes = bytes;
        self
    }

    pub fn with_batch_count_threshold(mut self, count: usize) -> Self {
        self.batch_count_threshold = count;
        self
    }

    pub fn with_linger_ms(mut self, ms: u64) -> Self {
        self.linger_ms = ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_base_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.base_retry_backoff_ms = ms;
        self
    }

    pub fn with_max_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.max_retry_backoff_ms = ms;
        self
    }

    pub fn with_adjust_shard_hash(mut self, adjust: bool) -> Self {
        self.adjust_shard_hash = adjust;
        self
    }

    pub fn with_buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn with_retry_on_project_not_exist(mut self, retry: bool) -> Self {
        self.retry_on_project_not_exist = retry;
        self
    }

    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_size_in_bytes == 0 || self.total_size_in_bytes > u32::MAX as usize {
            return Err(ConfigError::out_of_range(
                "totalSizeInBytes",
                "in 1..=4294967295",
                self.total_size_in_bytes as i64,
            ));
        }
        if self.max_block_ms < -1 {
            return Err(ConfigError::out_of_range(
                "maxBlockMs",
                "-1 (infinite) or non-negative",
                self.max_block_ms,
            ));
        }
        if self.io_thread_count == 0 {
            return Err(ConfigError::out_of_range("ioThreadCount", "positive", 0));
        }
        if self.batch_size_threshold_in_bytes == 0
            || self.batch_size_threshold_in_bytes > MAX_BATCH_SIZE_IN_BYTES
        {
            return Err(ConfigError::out_of_range(
                "batchSizeThresholdInBytes",
                "in 1..=5242880",
                self.batch_size_threshold_in_bytes as i64,
            ));
        }
        if self.batch_count_threshold == 0 || self.batch_count_threshold > MAX_BATCH_COUNT {
            return Err(ConfigError::out_of_range(
                "batchCountThreshold",
                "in 1..=40960",
                self.batch_count_threshold as i64,
            ));
        }
        if self.linger_ms < MIN_LINGER_MS {
            return Err(ConfigError::out_of_range(
                "lingerMs",
                "at least 100",
                self.linger_ms as i64,
            ));
        }
        if self.base_retry_backoff_ms == 0 {
            return Err(ConfigError::out_of_range("baseRetryBackoffMs", "positive", 0));
        }
        if self.max_retry_backoff_ms == 0 {
            return Err(ConfigError::out_of_range("maxRetryBackoffMs", "positive", 0));
        }
        if !self.buckets.is_power_of_two() || self.buckets > 256 {
            return Err(ConfigError::out_of_range(
                "buckets",
                "a power of two in 1..=256",
                self.buckets as i64,
            ));
        }
        Ok(())
    }
}

/// Endpoint and credentials of one project.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub project: String,
    /// Host (or base URL) of the region serving the project, e.g.
    /// `cn-hangzhou.log.example.com`.
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    #[serde(default)]
    pub security_token: Option<String>,
}

impl ProjectConfig {
    pub fn new(
        project: impl Into<String>,
        endpoint: impl Into<String>,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        ProjectConfig {
            project: project.into(),
            endpoint: endpoint.into(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
        }
    }

    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }
}

impl fmt::Debug for ProjectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectConfig")
            .field("project", &self.project)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Project name → [`ProjectConfig`] lookup shared by all sender workers.
///
/// Copy-on-write: readers grab an `Arc` snapshot, writers swap in a fresh
/// map, so lookups on the send path never contend with updates.
#[derive(Default)]
pub struct ProjectConfigs {
    snapshot: RwLock<Arc<HashMap<String, Arc<ProjectConfig>>>>,
}

impl ProjectConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: impl IntoIterator<Item = ProjectConfig>) -> Self {
        let map = configs
            .into_iter()
            .map(|c| (c.project.clone(), Arc::new(c)))
            .collect();
        ProjectConfigs {
            snapshot: RwLock::new(Arc::new(map)),
        }
    }

    pub fn get(&self, project: &str) -> Option<Arc<ProjectConfig>> {
        self.current().get(project).cloned()
    }

    /// Insert or replace the config for `config.project`.
    pub fn put(&self, config: ProjectConfig) {
        self.update(|map| {
            map.insert(config.project.clone(), Arc::new(config));
        });
    }

    pub fn remove(&self, project: &str) -> Option<Arc<ProjectConfig>> {
        let mut removed = None;
        self.update(|map| removed = map.remove(project));
        removed
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<HashMap<String, Arc<ProjectConfig>>> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, Arc<ProjectConfig>>)) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = HashMap::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl fmt::Debug for ProjectConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.current().values()).finish()
    }
}
