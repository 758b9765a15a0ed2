//! Layered configuration
//!
//! Resolution order:
//! - built-in defaults
//! - the first config file found (optional)
//! - environment variable overrides
//! - validation
//!
//! The resulting value is passed explicitly to the source, classifier and
//! aggregator at construction. There is no process-wide instance, so two
//! invocations with different thresholds can run in the same process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::classifier::DEFAULT_SIMILARITY_THRESHOLD;
use crate::source::SourceFilter;

const CONFIG_FILE_NAME: &str = "cache-failure-report.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub source: SourceConfig,
    pub filter: SourceFilter,
    pub classifier: ClassifierConfig,
    pub report: ReportConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    /// `console`, `file` or `both`
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Scan endpoint. Without one, an input file must be supplied.
    pub endpoint: Option<String>,
    pub table_name: String,
    pub page_size: usize,
    pub timeout_secs: u64,
    pub progress_every_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Fill breakdown reasons and attach diagnostics to every classification.
    pub diagnostics: bool,
    /// Keep step identifiers per category. Memory grows with the data set.
    pub capture_step_ids: bool,
    pub progress_every_records: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub json_pretty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub log_directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            table_name: "TestSteps".to_string(),
            page_size: 500,
            timeout_secs: 30,
            progress_every_pages: 5,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            capture_step_ids: false,
            progress_every_records: 1000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache_reports"),
            json_pretty: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                info!(config_file = %path.display(), "Loading configuration from file");
                Self::load_from_file(&path)?
            }
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from(format!(".{CONFIG_FILE_NAME}")),
        ];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("cache-failure-report").join("config.toml"));
        }
        candidates.into_iter().find(|path| path.exists())
    }

    /// Load configuration from a TOML file. Missing keys keep their defaults.
    #[cfg(feature = "basic")]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    #[cfg(not(feature = "basic"))]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        warn!(config_file = %path.display(), "TOML support disabled, ignoring config file");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        if let Ok(val) = env::var("CACHE_REPORT_ENDPOINT") {
            self.source.endpoint = Some(val).filter(|v| !v.trim().is_empty());
        }
        if let Ok(val) = env::var("CACHE_REPORT_TABLE") {
            self.source.table_name = val;
        }
        if let Some(val) = parse_env("CACHE_REPORT_PAGE_SIZE")? {
            self.source.page_size = val;
        }

        if let Some(val) = parse_env("CACHE_REPORT_SIMILARITY_THRESHOLD")? {
            self.classifier.similarity_threshold = val;
        }
        if let Some(val) = parse_env("CACHE_REPORT_DIAGNOSTICS")? {
            self.report.diagnostics = val;
        }
        if let Some(val) = parse_env("CACHE_REPORT_CAPTURE_STEP_IDS")? {
            self.report.capture_step_ids = val;
        }

        if let Ok(val) = env::var("CACHE_REPORT_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CACHE_REPORT_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let threshold = self.classifier.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow::anyhow!(
                "Similarity threshold must be between 0 and 1, got {threshold}"
            ));
        }

        if self.source.page_size == 0 {
            return Err(anyhow::anyhow!("Page size must be greater than 0"));
        }

        if self.source.progress_every_pages == 0 || self.report.progress_every_records == 0 {
            return Err(anyhow::anyhow!("Progress intervals must be greater than 0"));
        }

        if self.filter.step_classifications.is_empty() {
            return Err(anyhow::anyhow!(
                "At least one step classification must be admitted by the source filter"
            ));
        }

        if self.source.timeout_secs == 0 {
            warn!("Source timeout is 0, requests will fail immediately");
        }

        Ok(())
    }

    /// Save current configuration to file
    #[cfg(feature = "basic")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(None),
    }
}
