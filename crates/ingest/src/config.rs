//! Loader configuration
//!
//! Sources, lowest precedence first: built-in defaults, the optional config
//! file, `INGEST_*` environment variables (`__` separates nested keys, e.g.
//! `INGEST_STORE__ENDPOINT`), then command-line flags.

use anyhow::{bail, Context, Result};
use ingest_lib::input::DEFAULT_FILE_SUFFIX;
use ingest_lib::pipeline::{default_workers, PoolConfig};
use ingest_lib::reporter::ReporterConfig;
use ingest_lib::store::{InsertPolicy, StoreConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard cap on the worker pool
pub const MAX_WORKERS: usize = 16;

/// Largest accepted backoff unit; the last retry waits twice this
pub const MAX_RETRY_BASE_DELAY_SECS: u64 = 3600;

/// Store connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: default_username(),
            password: String::new(),
            database: default_database(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub store: StoreSettings,

    /// Directory scanned for export files
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    /// Files per super-batch
    #[serde(default = "default_super_batch_size")]
    pub super_batch_size: usize,

    /// Rows per sub-batch after a failed bulk insert
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Prometheus textfile written at the end of the run
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[serde(default)]
    pub assume_yes: bool,

    /// Exit with status 2 when any file failed
    #[serde(default)]
    pub strict_exit: bool,
}

fn default_endpoint() -> String {
    "http://localhost:8123".to_string()
}

fn default_username() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_input_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_suffix() -> String {
    DEFAULT_FILE_SUFFIX.to_string()
}

fn default_super_batch_size() -> usize {
    10_000
}

fn default_sub_batch_size() -> usize {
    10_000
}

fn default_cooldown() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    3
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("import_logs")
}

/// Command-line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input_root: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub file_suffix: Option<String>,
    pub workers: Option<usize>,
    pub super_batch_size: Option<usize>,
    pub sub_batch_size: Option<usize>,
    pub cooldown_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_secs: Option<u64>,
    pub logs_dir: Option<PathBuf>,
    pub metrics_textfile: Option<PathBuf>,
    pub assume_yes: bool,
    pub strict_exit: bool,
}

impl LoaderConfig {
    /// Load from the config file and environment, then apply `overrides`
    pub fn load(file: &Path, overrides: Overrides) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("INGEST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", file.display()))?;

        let mut config: LoaderConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, o: Overrides) {
        if let Some(v) = o.input_root {
            self.input_root = v;
        }
        if let Some(v) = o.endpoint {
            self.store.endpoint = v;
        }
        if let Some(v) = o.username {
            self.store.username = v;
        }
        if let Some(v) = o.password {
            self.store.password = v;
        }
        if let Some(v) = o.database {
            self.store.database = v;
        }
        if let Some(v) = o.file_suffix {
            self.file_suffix = v;
        }
        if let Some(v) = o.workers {
            self.workers = v;
        }
        if let Some(v) = o.super_batch_size {
            self.super_batch_size = v;
        }
        if let Some(v) = o.sub_batch_size {
            self.sub_batch_size = v;
        }
        if let Some(v) = o.cooldown_secs {
            self.cooldown_secs = v;
        }
        if let Some(v) = o.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = o.retry_base_delay_secs {
            self.retry_base_delay_secs = v;
        }
        if let Some(v) = o.logs_dir {
            self.logs_dir = v;
        }
        if o.metrics_textfile.is_some() {
            self.metrics_textfile = o.metrics_textfile;
        }
        self.assume_yes |= o.assume_yes;
        self.strict_exit |= o.strict_exit;
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&mut self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.super_batch_size == 0 {
            bail!("super_batch_size must be at least 1");
        }
        if self.sub_batch_size == 0 {
            bail!("sub_batch_size must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.retry_base_delay_secs > MAX_RETRY_BASE_DELAY_SECS {
            bail!(
                "retry_base_delay_secs must be at most {}",
                MAX_RETRY_BASE_DELAY_SECS
            );
        }
        if self.store.request_timeout_secs == 0 {
            bail!("store.request_timeout_secs must be at least 1");
        }
        if self.file_suffix.is_empty() {
            bail!("file_suffix must not be empty");
        }
        self.workers = self.workers.min(MAX_WORKERS);
        Ok(())
    }

    /// Create the logs directory so a bad path fails before any work starts
    pub fn prepare_logs_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.logs_dir).with_context(|| {
            format!("Could not create logs directory {}", self.logs_dir.display())
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            endpoint: self.store.endpoint.clone(),
            username: self.store.username.clone(),
            password: self.store.password.clone(),
            database: self.store.database.clone(),
            request_timeout: Duration::from_secs(self.store.request_timeout_secs),
            ..StoreConfig::default()
        }
    }

    pub fn insert_policy(&self) -> InsertPolicy {
        InsertPolicy {
            sub_batch_size: self.sub_batch_size,
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            super_batch_size: self.super_batch_size,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn reporter_config(&self, show_progress: bool, run_id: String) -> ReporterConfig {
        ReporterConfig {
            logs_dir: self.logs_dir.clone(),
            show_progress,
            run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_file(contents: &str, overrides: Overrides) -> Result<LoaderConfig> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        LoaderConfig::load(file.path(), overrides)
    }

    #[test]
    fn test_defaults_without_file() {
        let config = LoaderConfig::load(Path::new("does-not-exist.toml"), Overrides::default())
            .unwrap();

        assert_eq!(config.store.endpoint, "http://localhost:8123");
        assert_eq!(config.store.username, "default");
        assert_eq!(config.super_batch_size, 10_000);
        assert_eq!(config.sub_batch_size, 10_000);
        assert_eq!(config.cooldown_secs, 15);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay_secs, 3);
        assert_eq!(config.logs_dir, PathBuf::from("import_logs"));
        assert_eq!(config.file_suffix, "明细.csv");
        assert!(config.workers >= 1 && config.workers <= MAX_WORKERS);
        assert!(!config.strict_exit);
    }

    #[test]
    fn test_file_then_overrides() {
        let config = load_file(
            r#"
            input_root = "/data/exports"
            workers = 4
            cooldown_secs = 5

            [store]
            endpoint = "http://ch:8123"
            password = "secret"
            "#,
            Overrides {
                workers: Some(2),
                strict_exit: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.input_root, PathBuf::from("/data/exports"));
        assert_eq!(config.store.endpoint, "http://ch:8123");
        assert_eq!(config.store.password, "secret");
        assert_eq!(config.store.database, "default");
        assert_eq!(config.cooldown_secs, 5);
        assert_eq!(config.workers, 2);
        assert!(config.strict_exit);
    }

    #[test]
    fn test_workers_capped() {
        let config = load_file("workers = 64", Overrides::default()).unwrap();
        assert_eq!(config.workers, MAX_WORKERS);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(load_file("super_batch_size = 0", Overrides::default()).is_err());
        assert!(load_file("sub_batch_size = 0", Overrides::default()).is_err());
        assert!(load_file("max_attempts = 0", Overrides::default()).is_err());
        assert!(load_file(
            "",
            Overrides {
                workers: Some(0),
                ..Default::default()
            }
        )
        .is_err());
    }

    #[test]
    fn test_component_configs() {
        let config = load_file(
            "retry_base_delay_secs = 2\nsub_batch_size = 500\nsuper_batch_size = 7",
            Overrides::default(),
        )
        .unwrap();

        let policy = config.insert_policy();
        assert_eq!(policy.sub_batch_size, 500);
        assert_eq!(policy.backoff(2), Duration::from_secs(4));

        let pool = config.pool_config();
        assert_eq!(pool.super_batch_size, 7);
        assert_eq!(pool.cooldown, Duration::from_secs(15));

        let store = config.store_config();
        assert_eq!(store.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_retry_base_delay_bounded() {
        let config = load_file("retry_base_delay_secs = 3600", Overrides::default()).unwrap();
        assert_eq!(config.insert_policy().backoff(2), Duration::from_secs(7200));

        let err = load_file(
            "",
            Overrides {
                retry_base_delay_secs: Some(u64::MAX),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry_base_delay_secs"));
    }

    #[test]
    fn test_prepare_logs_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let logs_dir = dir.path().join("runs").join("import_logs");
        let config = load_file(
            "",
            Overrides {
                logs_dir: Some(logs_dir.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        config.prepare_logs_dir().unwrap();
        assert!(logs_dir.is_dir());
        // Already present is fine.
        config.prepare_logs_dir().unwrap();

        let blocked = dir.path().join("file");
        std::fs::write(&blocked, "").unwrap();
        let config = LoaderConfig {
            logs_dir: blocked.join("logs"),
            ..config
        };
        assert!(config.prepare_logs_dir().is_err());
    }
}
