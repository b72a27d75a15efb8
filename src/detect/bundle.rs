//! Fitted model bundle: model, scaler, feature list and training metadata,
//! stored as one JSON document.

use crate::detect::features::FittedScaler;
use crate::detect::model::Model;
use crate::detect::score::ScoreRange;
use crate::detect::{DetectError, ModelKind};
use crate::telemetry::Feature;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub model_type: ModelKind,
    pub model: Model,
    pub scaler: FittedScaler,
    pub features: Vec<Feature>,
    /// Decision-value span over the training batch, where the model has one.
    pub score_range: Option<ScoreRange>,
    pub training_records: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelBundle {
    /// Write the bundle to `path`, creating parent directories.
    ///
    /// The document goes to a uniquely named sibling temp file first and is
    /// renamed into place, so concurrent writers leave the last complete bundle.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;

        let json = serde_json::to_string_pretty(self).context("failed to serialize model bundle")?;

        // Each save gets its own temp file, so concurrent writers never
        // rename each other's work.
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.path().display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("failed to sync {}", tmp.path().display()))?;
        tmp.persist(path)
            .with_context(|| format!("failed to move bundle into place at {}", path.display()))?;

        info!(
            path = %path.display(),
            model = %self.model_type,
            features = self.features.len(),
            "Model bundle saved"
        );
        Ok(())
    }

    /// Read and validate a bundle. Any failure is a [`DetectError::ModelLoad`],
    /// including fitted state whose width disagrees with the feature list.
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        let load_err = |reason: String| DetectError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };

        let json = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let bundle: Self = serde_json::from_str(&json).map_err(|e| load_err(e.to_string()))?;

        if bundle.format_version != FORMAT_VERSION {
            return Err(load_err(format!(
                "unsupported format version {} (expected {})",
                bundle.format_version, FORMAT_VERSION
            )));
        }
        if bundle.model.kind() != bundle.model_type {
            return Err(load_err(format!(
                "model_type {} does not match stored {} model",
                bundle.model_type,
                bundle.model.kind()
            )));
        }
        if bundle.scaler.n_features() != bundle.features.len() {
            return Err(load_err(format!(
                "scaler has {} features, feature list has {}",
                bundle.scaler.n_features(),
                bundle.features.len()
            )));
        }
        if !bundle.scaler.is_consistent() {
            return Err(load_err("scaler parameter lengths disagree".to_string()));
        }
        bundle.model.validate(bundle.features.len()).map_err(load_err)?;

        info!(
            path = %path.display(),
            model = %bundle.model_type,
            trained_at = %bundle.trained_at,
            "Model bundle loaded"
        );
        Ok(bundle)
    }
}
