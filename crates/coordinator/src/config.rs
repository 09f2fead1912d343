use crate::cli::RunArgs;
use anyhow::{Context, ensure};
use filters::{DEFAULT_JPEG_QUALITY, FilterKind, OutputFormat};
use ipc::{DEFAULT_PREFIX, DEFAULT_QUEUE_CAPACITY, ResourceNames};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use worker::WorkerSettings;

pub use common::Environment;

/// Upper bound on how stale the progress display may get.
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pool_size: usize,
    pub queue_capacity: usize,
    /// Defaults to the pool size when unset.
    pub io_permits: Option<u32>,
    pub filters: String,
    pub format: String,
    pub jpeg_quality: u8,
    pub poll_interval_ms: u64,
    pub ipc_prefix: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let input_dir = env::var("INPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("images"));

        let output_dir = env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("output"));

        let pool_size = env::var("POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        let queue_capacity = env::var("QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let io_permits = env::var("IO_PERMITS").ok().and_then(|s| s.parse().ok());

        let filters =
            env::var("FILTERS").unwrap_or_else(|_| FilterKind::join_names(&FilterKind::ALL));

        let format = env::var("OUTPUT_FORMAT").unwrap_or_else(|_| "jpeg".to_string());

        let jpeg_quality = env::var("JPEG_QUALITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_JPEG_QUALITY);

        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let ipc_prefix = env::var("IPC_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string());

        Self {
            environment,
            input_dir,
            output_dir,
            pool_size,
            queue_capacity,
            io_permits,
            filters,
            format,
            jpeg_quality,
            poll_interval_ms,
            ipc_prefix,
        }
    }

    /// Environment first, then command-line flags, then validation.
    pub fn load(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Self::from_env();
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(dir) = &args.input_dir {
            self.input_dir = dir.clone();
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(workers) = args.workers {
            self.pool_size = workers;
        }
        if let Some(capacity) = args.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(permits) = args.io_permits {
            self.io_permits = Some(permits);
        }
        if let Some(filters) = &args.filters {
            self.filters = filters.clone();
        }
        if let Some(format) = &args.format {
            self.format = format.clone();
        }
        if let Some(quality) = args.jpeg_quality {
            self.jpeg_quality = quality;
        }
        if let Some(interval) = args.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(prefix) = &args.ipc_prefix {
            self.ipc_prefix = prefix.clone();
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.pool_size >= 1, "Pool size must be at least 1");
        ensure!(
            self.queue_capacity >= self.pool_size,
            "Queue capacity {} is below the pool size {}",
            self.queue_capacity,
            self.pool_size
        );
        ensure!(self.io_permits() >= 1, "IO permits must be at least 1");
        ensure!(
            (1..=100).contains(&self.jpeg_quality),
            "JPEG quality must be between 1 and 100"
        );
        ensure!(
            (1..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms),
            "Poll interval must be between 1 and {MAX_POLL_INTERVAL_MS} ms"
        );
        self.filter_kinds()?;
        self.output_format()?;
        self.resource_names()?;
        Ok(())
    }

    pub fn io_permits(&self) -> u32 {
        self.io_permits.unwrap_or(self.pool_size as u32)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn filter_kinds(&self) -> anyhow::Result<Vec<FilterKind>> {
        FilterKind::parse_list(&self.filters).context("Invalid filter list")
    }

    pub fn output_format(&self) -> anyhow::Result<OutputFormat> {
        let format: OutputFormat = self.format.parse().context("Invalid output format")?;
        Ok(format.with_quality(self.jpeg_quality)?)
    }

    pub fn resource_names(&self) -> anyhow::Result<ResourceNames> {
        ResourceNames::with_prefix(&self.ipc_prefix).context("Invalid IPC prefix")
    }

    pub fn worker_settings(&self, slot: usize) -> anyhow::Result<WorkerSettings> {
        Ok(WorkerSettings {
            slot,
            names: self.resource_names()?,
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            filters: self.filter_kinds()?,
            format: self.output_format()?,
        })
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("output"),
            pool_size: 2,
            queue_capacity: 10,
            io_permits: None,
            filters: "grayscale,blur,resize".to_string(),
            format: "jpeg".to_string(),
            jpeg_quality: 90,
            poll_interval_ms: 100,
            ipc_prefix: "/imgpool".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 10] = [
        "INPUT_DIR",
        "OUTPUT_DIR",
        "POOL_SIZE",
        "QUEUE_CAPACITY",
        "IO_PERMITS",
        "FILTERS",
        "OUTPUT_FORMAT",
        "JPEG_QUALITY",
        "POLL_INTERVAL_MS",
        "IPC_PREFIX",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = PipelineConfig::from_env();

        assert_eq!(config.input_dir, PathBuf::from("images"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.io_permits(), 2, "Permits follow the pool size");
        assert_eq!(config.filter_kinds().unwrap(), FilterKind::ALL.to_vec());
        assert_eq!(
            config.output_format().unwrap(),
            OutputFormat::Jpeg { quality: 90 }
        );
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.resource_names().unwrap(), ResourceNames::default());
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_flags_override_environment() {
        clear_env();
        unsafe {
            env::set_var("POOL_SIZE", "3");
            env::set_var("OUTPUT_FORMAT", "png");
            env::set_var("IPC_PREFIX", "/from_env");
        }

        let args = RunArgs {
            workers: Some(4),
            ipc_prefix: Some("/from_flag".to_string()),
            ..RunArgs::default()
        };
        let config = PipelineConfig::load(&args).unwrap();

        assert_eq!(config.pool_size, 4);
        assert_eq!(config.output_format().unwrap(), OutputFormat::Png);
        assert_eq!(config.ipc_prefix, "/from_flag");
        assert_eq!(config.io_permits(), 4);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_malformed_numbers_fall_back_to_defaults() {
        clear_env();
        unsafe { env::set_var("POOL_SIZE", "many") };
        assert_eq!(PipelineConfig::from_env().pool_size, 2);
        clear_env();
    }

    #[test]
    fn test_validation_rules() {
        let valid = PipelineConfig::test_default();
        valid.validate().unwrap();

        type Mutation = fn(&mut PipelineConfig);
        let cases: [(&str, Mutation); 12] = [
            ("zero workers", |c: &mut PipelineConfig| c.pool_size = 0),
            ("capacity below pool", |c: &mut PipelineConfig| c.queue_capacity = 1),
            ("zero permits", |c: &mut PipelineConfig| c.io_permits = Some(0)),
            ("no filters", |c: &mut PipelineConfig| c.filters = " ".to_string()),
            ("unknown filter", |c: &mut PipelineConfig| c.filters = "sharpen".to_string()),
            ("unknown format", |c: &mut PipelineConfig| c.format = "gif".to_string()),
            ("quality zero", |c: &mut PipelineConfig| c.jpeg_quality = 0),
            ("quality too high", |c: &mut PipelineConfig| c.jpeg_quality = 101),
            ("poll too fast", |c: &mut PipelineConfig| c.poll_interval_ms = 0),
            ("poll too slow", |c: &mut PipelineConfig| c.poll_interval_ms = 5000),
            ("bare prefix", |c: &mut PipelineConfig| c.ipc_prefix = "imgpool".to_string()),
            ("nested prefix", |c: &mut PipelineConfig| c.ipc_prefix = "/a/b".to_string()),
        ];

        for (label, mutate) in cases {
            let mut config = PipelineConfig::test_default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{label} should be rejected");
        }
    }

    #[test]
    fn test_quality_checked_for_lossless_formats() {
        let mut config = PipelineConfig::test_default();
        config.format = "bmp".to_string();
        assert_eq!(config.output_format().unwrap(), OutputFormat::Bmp);

        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_settings_per_slot() {
        let config = PipelineConfig::test_default();
        let settings = config.worker_settings(1).unwrap();
        assert_eq!(settings.slot, 1);
        assert_eq!(settings.names.queue, "/imgpool_queue");
        assert_eq!(settings.format, OutputFormat::Jpeg { quality: 90 });
    }
}
