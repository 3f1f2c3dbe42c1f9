use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::checkpoint::Checkpoint;

const ENV_CONFIG_PATH: &str = "FACT_VALIDATION_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_SEMANTIC_REVIEW_URL: &str = "SEMANTIC_REVIEW_URL";
const ENV_EXTRACTION_URL: &str = "EXTRACTION_URL";

/// Closed numeric interval used for plausibility bands
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn describe(&self) -> String {
        format!("{:.2}..={:.2}", self.min, self.max)
    }
}

/// Layer 2 completeness deductions
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub missing_mandatory_category: f64,
    pub incomplete_critical: f64,
    pub incomplete_high: f64,
    pub incomplete_medium: f64,
    pub incomplete_low: f64,
    pub numeric_inconsistency: f64,
    pub numeric_warning: f64,
    pub declared_gap: f64,
    pub unverified_evidence: f64,
    pub unverified_evidence_cap: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            missing_mandatory_category: 0.20,
            incomplete_critical: 0.25,
            incomplete_high: 0.15,
            incomplete_medium: 0.10,
            incomplete_low: 0.05,
            numeric_inconsistency: 0.15,
            numeric_warning: 0.05,
            declared_gap: 0.05,
            unverified_evidence: 0.05,
            unverified_evidence_cap: 0.20,
        }
    }
}

/// Tunables for the validation and correction pipeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub evidence_verified_threshold: f64,
    pub evidence_partial_threshold: f64,
    pub completeness_threshold: f64,
    /// Minimum parts/total agreement before a mismatch becomes an inconsistency
    pub agreement_ratio: f64,
    /// Agreement below this (but above `agreement_ratio`) is reported as a warning
    pub agreement_warning_ratio: f64,
    pub max_retry_attempts: u32,
    pub retryable_missing_items: usize,
    pub worker_pool_size: usize,
    pub review_timeout_ms: u64,
    pub extraction_timeout_ms: u64,
    pub excerpt_max_chars: usize,
    pub version_conflict_retries: u32,
    pub adversarial_enabled: bool,
    pub adversarial_weight: f64,
    pub cost_per_head: Band,
    pub applications_per_it_head: Band,
    pub accounts_per_employee: Band,
    pub penalties: PenaltyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            evidence_verified_threshold: 0.85,
            evidence_partial_threshold: 0.5,
            completeness_threshold: 0.7,
            agreement_ratio: 0.8,
            agreement_warning_ratio: 0.95,
            max_retry_attempts: 3,
            retryable_missing_items: 5,
            worker_pool_size: 4,
            review_timeout_ms: 30_000,
            extraction_timeout_ms: 120_000,
            excerpt_max_chars: 15_000,
            version_conflict_retries: 16,
            adversarial_enabled: true,
            adversarial_weight: 0.5,
            cost_per_head: Band::new(20_000.0, 250_000.0),
            applications_per_it_head: Band::new(0.2, 15.0),
            accounts_per_employee: Band::new(0.8, 1.5),
            penalties: PenaltyConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn review_timeout(&self) -> Duration {
        Duration::from_millis(self.review_timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Merged over the built-in checkpoint registry
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub checkpoints: Vec<Checkpoint>,
    pub semantic_review_url: Option<String>,
    pub extraction_url: Option<String>,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            checkpoints: Vec::new(),
            semantic_review_url: None,
            extraction_url: None,
            port: 8080,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = Self::load_config_file(&config_path).unwrap_or_default();

        Self {
            pipeline: file.pipeline,
            checkpoints: file.checkpoints,
            semantic_review_url: non_empty_env(ENV_SEMANTIC_REVIEW_URL),
            extraction_url: non_empty_env(ENV_EXTRACTION_URL),
            port,
            host,
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse_config(&contents).or_else(|| {
                tracing::warn!(path = %path.display(), "Failed to parse config file, using defaults");
                None
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    fn parse_config(contents: &str) -> Option<ConfigFile> {
        let contents = contents.trim();
        if contents.is_empty() {
            return Some(ConfigFile::default());
        }
        match serde_yaml::from_str(contents) {
            Ok(config) => {
                tracing::info!("Loaded configuration from file");
                Some(config)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Invalid YAML configuration");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Domain, ImportanceTier};

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
pipeline:
  completeness_threshold: 0.6
  penalties:
    declared_gap: 0.1
  cost_per_head:
    min: 10000
    max: 90000
checkpoints:
  - domain: infrastructure
    category: backup_dr
    min_items: 2
    importance: critical
"#;
        let file = Config::parse_config(yaml).unwrap();
        assert_eq!(file.pipeline.completeness_threshold, 0.6);
        assert_eq!(file.pipeline.evidence_verified_threshold, 0.85);
        assert_eq!(file.pipeline.penalties.declared_gap, 0.1);
        assert_eq!(file.pipeline.penalties.numeric_inconsistency, 0.15);
        assert!(file.pipeline.cost_per_head.contains(50_000.0));
        assert_eq!(file.checkpoints.len(), 1);
        assert_eq!(file.checkpoints[0].domain, Domain::Infrastructure);
        assert_eq!(file.checkpoints[0].importance, ImportanceTier::Critical);
        assert!(file.checkpoints[0].required_fields.is_empty());
    }

    #[test]
    fn test_empty_and_invalid_yaml() {
        assert!(Config::parse_config("   ").is_some());
        assert!(Config::parse_config("pipeline: [not, a, map]").is_none());
    }

    #[test]
    fn test_band_contains_bounds() {
        let band = Band::new(1.0, 2.0);
        assert!(band.contains(1.0));
        assert!(band.contains(2.0));
        assert!(!band.contains(2.01));
    }
}
