//! Session configuration.
//!
//! Settings are resolved once when a session is created: defaults, then
//! `GORPIPE_*` environment variables, then explicit builder calls (the CLI
//! flags). Nothing here is global; a [`SessionConfig`] travels with the
//! session that owns it.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of rows sampled to infer column types.
pub const DEFAULT_TYPE_SAMPLE: usize = 100;

/// Default fraction of a bucket's tags that must be requested before the
/// bucket file is read instead of the individual entry files.
pub const DEFAULT_BUCKET_THRESHOLD: f64 = 0.4;

/// Default ceiling on partitions a single parallel operator may create.
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 10_000;

/// Default nesting limit for virtual-file dependency walks.
pub const DEFAULT_MAX_MACRO_DEPTH: usize = 32;

/// Configuration for one query session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory for materialized sub-query results; a private temporary
    /// directory is used when unset.
    pub cache_dir: Option<PathBuf>,
    /// Worker threads for partitioned execution.
    pub max_workers: usize,
    /// Ceiling on partitions per parallel operator.
    pub max_parallel_jobs: usize,
    /// Rows sampled per stream for column type inference.
    pub type_sample_size: usize,
    /// Bucket substitution threshold in `[0, 1]`.
    pub bucket_threshold: f64,
    /// How long closing a partitioned stream waits for its workers.
    pub close_timeout: Duration,
    /// External programs the `cmd` source may run.
    pub allowed_commands: Vec<String>,
    /// Maximum depth of nested virtual-file references.
    pub max_macro_depth: usize,
    /// Genome file defining chromosome order and sizes.
    pub genome_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            cache_dir: None,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            type_sample_size: DEFAULT_TYPE_SAMPLE,
            bucket_threshold: DEFAULT_BUCKET_THRESHOLD,
            close_timeout: Duration::from_secs(10),
            allowed_commands: Vec::new(),
            max_macro_depth: DEFAULT_MAX_MACRO_DEPTH,
            genome_file: None,
        }
    }

    /// Defaults overlaid with `GORPIPE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(dir) = std::env::var("GORPIPE_CACHE_DIR") {
            if !dir.is_empty() {
                config.cache_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(n) = std::env::var("GORPIPE_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.max_workers = n;
        }
        if let Ok(list) = std::env::var("GORPIPE_ALLOWED_COMMANDS") {
            config.allowed_commands = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(genome) = std::env::var("GORPIPE_GENOME") {
            if !genome.is_empty() {
                config.genome_file = Some(PathBuf::from(genome));
            }
        }
        config
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    pub fn with_max_parallel_jobs(mut self, n: usize) -> Self {
        self.max_parallel_jobs = n;
        self
    }

    pub fn with_type_sample_size(mut self, n: usize) -> Self {
        self.type_sample_size = n;
        self
    }

    pub fn with_bucket_threshold(mut self, threshold: f64) -> Self {
        self.bucket_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_allowed_command(mut self, program: impl Into<String>) -> Self {
        self.allowed_commands.push(program.into());
        self
    }

    pub fn with_genome_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.genome_file = Some(path.into());
        self
    }
}
