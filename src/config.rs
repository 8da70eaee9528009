//! Small, explicitly-constructed configuration surface. No globals, no
//! environment-variable reads: every knob is threaded through `Writer::new`
//! or `Pool::new` by the caller.

/// Bytes of accumulated postings before the pool spills a run to disk.
pub const DEFAULT_POOL_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Approximate in-memory posting budget before a run is spilled.
    pub limit_bytes: usize,
    /// Directory new run files are created in.
    pub run_dir: std::path::PathBuf,
}

impl PoolConfig {
    pub fn new(run_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            limit_bytes: DEFAULT_POOL_LIMIT,
            run_dir: run_dir.into(),
        }
    }
    pub fn with_limit(mut self, limit_bytes: usize) -> Self {
        self.limit_bytes = limit_bytes;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub pool: PoolConfig,
    /// Maximum number of runs merged in one pass; wider fan-in means fewer
    /// merge passes but more simultaneously open run files.
    pub merge_fan_in: usize,
}

impl WriterConfig {
    pub fn new(run_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            pool: PoolConfig::new(run_dir),
            merge_fan_in: 16,
        }
    }
}
