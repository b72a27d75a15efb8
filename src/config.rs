//! TOML configuration for netinsight.
//!
//! Layered: the file named by `NETINSIGHT_CONFIG`, then the system location,
//! then compiled-in defaults. Every section is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::ModelKind;
use crate::telemetry::Feature;

const SYSTEM_CONFIG_PATH: &str = "/etc/netinsight/netinsight.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `NETINSIGHT_CONFIG` environment variable.
    /// 2. `/etc/netinsight/netinsight.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("NETINSIGHT_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETINSIGHT_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the `network_logs` table.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/netinsight.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Anomaly detector selection and hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Model selector: `isolation_forest`, `one_class_svm` or `dbscan`.
    pub model: String,
    /// Smallest batch a model will be fitted on.
    pub min_batch: usize,
    /// Ordered feature list fed to the models.
    pub features: Vec<Feature>,
    /// Where the fitted model bundle is written and read.
    pub bundle_path: PathBuf,
    /// Default number of records fetched per detection run.
    pub fetch_limit: usize,
    pub isolation_forest: IsolationForestConfig,
    pub one_class_svm: OneClassSvmConfig,
    pub dbscan: DbscanConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::IsolationForest.to_string(),
            min_batch: 10,
            features: Feature::MODEL_DEFAULT.to_vec(),
            bundle_path: PathBuf::from("models/anomaly_detector.json"),
            fetch_limit: 1000,
            isolation_forest: IsolationForestConfig::default(),
            one_class_svm: OneClassSvmConfig::default(),
            dbscan: DbscanConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    pub n_estimators: usize,
    /// Sub-sample size per tree (capped at the batch size).
    pub max_samples: usize,
    /// Expected share of anomalies; sets the decision offset.
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OneClassSvmConfig {
    /// Upper bound on the share of training points outside the boundary.
    pub nu: f64,
    /// RBF kernel coefficient. `None` means `1 / n_features`.
    pub gamma: Option<f64>,
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for OneClassSvmConfig {
    fn default() -> Self {
        Self {
            nu: 0.1,
            gamma: None,
            tol: 1e-3,
            max_iter: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanConfig {
    /// Neighbourhood radius in standardized feature space.
    pub eps: f64,
    /// Neighbours (self included) needed for a core point.
    pub min_samples: usize,
}

impl Default for DbscanConfig {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Policy thresholds for the aggregation views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub latency_ms: f64,
    pub cpu_utilization: f64,
    /// Fraction, 0.05 = 5%.
    pub packet_loss: f64,
    pub tcp_retransmissions: u32,
    /// How many problematic devices to rank.
    pub top_devices: usize,
    /// Source anomaly scores above this count as anomalies in the summary.
    pub anomaly_score_cutoff: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            latency_ms: 100.0,
            cpu_utilization: 80.0,
            packet_loss: 0.05,
            tcp_retransmissions: 10,
            top_devices: 10,
            anomaly_score_cutoff: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.storage.db_path, "data/netinsight.db");

        assert_eq!(cfg.detector.model, "isolation_forest");
        assert_eq!(cfg.detector.min_batch, 10);
        assert_eq!(cfg.detector.features.len(), 8);
        assert_eq!(cfg.detector.features[0], Feature::LatencyMs);
        assert_eq!(cfg.detector.isolation_forest.n_estimators, 100);
        assert_eq!(cfg.detector.isolation_forest.contamination, 0.1);
        assert_eq!(cfg.detector.one_class_svm.nu, 0.1);
        assert!(cfg.detector.one_class_svm.gamma.is_none());
        assert_eq!(cfg.detector.dbscan.eps, 0.5);
        assert_eq!(cfg.detector.dbscan.min_samples, 10);

        assert_eq!(cfg.analysis.latency_ms, 100.0);
        assert_eq!(cfg.analysis.cpu_utilization, 80.0);
        assert_eq!(cfg.analysis.packet_loss, 0.05);
        assert_eq!(cfg.analysis.tcp_retransmissions, 10);
        assert_eq!(cfg.analysis.top_devices, 10);

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[storage]
db_path = "/var/lib/netinsight/logs.db"

[detector]
model = "dbscan"
min_batch = 20
features = ["latency_ms", "cpu_utilization"]
bundle_path = "/var/lib/netinsight/model.json"

[detector.dbscan]
eps = 0.8
min_samples = 5

[detector.one_class_svm]
nu = 0.05
gamma = 0.25

[analysis]
latency_ms = 150.0
top_devices = 5

[logging]
level = "debug"
json = true
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.storage.db_path, "/var/lib/netinsight/logs.db");
        assert_eq!(cfg.detector.model, "dbscan");
        assert_eq!(cfg.detector.min_batch, 20);
        assert_eq!(
            cfg.detector.features,
            vec![Feature::LatencyMs, Feature::CpuUtilization]
        );
        assert_eq!(cfg.detector.dbscan.eps, 0.8);
        assert_eq!(cfg.detector.dbscan.min_samples, 5);
        assert_eq!(cfg.detector.one_class_svm.gamma, Some(0.25));
        // Untouched keys inside a present section keep their defaults.
        assert_eq!(cfg.detector.isolation_forest.seed, 42);
        assert_eq!(cfg.analysis.latency_ms, 150.0);
        assert_eq!(cfg.analysis.cpu_utilization, 80.0);
        assert_eq!(cfg.analysis.top_devices, 5);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        let defaults = Config::default();

        assert_eq!(cfg.storage.db_path, defaults.storage.db_path);
        assert_eq!(cfg.detector.bundle_path, defaults.detector.bundle_path);
        assert_eq!(cfg.analysis.packet_loss, defaults.analysis.packet_loss);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("netinsight.toml");
        std::fs::write(
            &path,
            r#"
[detector]
model = "one_class_svm"
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.detector.model, "one_class_svm");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/path/netinsight.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.detector.model, roundtripped.detector.model);
        assert_eq!(cfg.detector.features, roundtripped.detector.features);
        assert_eq!(
            cfg.analysis.anomaly_score_cutoff,
            roundtripped.analysis.anomaly_score_cutoff
        );
    }
}
