//! Engine configuration
//!
//! Defaults, then an optional JSON file, then `LABELFORGE_*` environment
//! variables. The CLI applies its own flags last.
//!
//! | Env Var                          | Default           |
//! |----------------------------------|-------------------|
//! | `LABELFORGE_BASE_TIME_PER_LABEL` | `2.0` seconds     |
//! | `LABELFORGE_BASE_COST_PER_LABEL` | `0.05`            |
//! | `LABELFORGE_LARGE_BATCH`         | `100` labels      |
//! | `LABELFORGE_MAX_LABELS_PER_JOB`  | `100` labels      |
//! | `LABELFORGE_MAX_JOB_MINUTES`     | `30`              |
//! | `LABELFORGE_DEFAULT_PRINTER`     | `default-printer` |
//! | `LABELFORGE_WORKER_THREADS`      | number of cores   |
//! | `LABELFORGE_SHIPPING_LABEL`      | `false`           |
//! | `LABELFORGE_LABELS_PER_PRODUCT`  | `1`               |

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::records::LabelCountOverrides;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub base_time_per_label: f64,
    pub base_cost_per_label: f64,
    /// Label count above which a batch is flagged as large
    pub large_batch_threshold: u32,
    pub max_labels_per_job: u32,
    pub max_job_minutes: f64,
    pub default_printer: String,
    /// Rayon pool size; `None` uses one thread per core
    pub worker_threads: Option<usize>,
    pub include_shipping_label: bool,
    pub labels_per_product: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_time_per_label: 2.0,
            base_cost_per_label: 0.05,
            large_batch_threshold: 100,
            max_labels_per_job: 100,
            max_job_minutes: 30.0,
            default_printer: "default-printer".to_string(),
            worker_threads: None,
            include_shipping_label: false,
            labels_per_product: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults (or `path`) with process environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `LABELFORGE_*` overrides read through `lookup`
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            })
        }

        macro_rules! env_field {
            ($key:literal => $field:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = parse($key, raw)?;
                }
            };
        }

        env_field!("LABELFORGE_BASE_TIME_PER_LABEL" => self.base_time_per_label);
        env_field!("LABELFORGE_BASE_COST_PER_LABEL" => self.base_cost_per_label);
        env_field!("LABELFORGE_LARGE_BATCH" => self.large_batch_threshold);
        env_field!("LABELFORGE_MAX_LABELS_PER_JOB" => self.max_labels_per_job);
        env_field!("LABELFORGE_MAX_JOB_MINUTES" => self.max_job_minutes);
        env_field!("LABELFORGE_SHIPPING_LABEL" => self.include_shipping_label);
        env_field!("LABELFORGE_LABELS_PER_PRODUCT" => self.labels_per_product);

        let printer = lookup("LABELFORGE_DEFAULT_PRINTER").filter(|p| !p.trim().is_empty());
        if let Some(printer) = printer {
            self.default_printer = printer.trim().to_string();
        }
        if let Some(raw) = lookup("LABELFORGE_WORKER_THREADS") {
            self.worker_threads = Some(parse("LABELFORGE_WORKER_THREADS", raw)?);
        }
        Ok(())
    }

    /// Label counting defaults derived from this config
    pub fn label_overrides(&self) -> LabelCountOverrides {
        LabelCountOverrides {
            include_shipping_label: self.include_shipping_label,
            labels_per_product: self.labels_per_product,
            ..Default::default()
        }
    }
}
