//! Calibrated matchup prediction over an exported model artifact.
//!
//! An artifact bundle is a directory holding:
//! - `model.json` — the exported inference model (logistic regression
//!   weights and intercept, in feature order),
//! - `feature_names.json` — the ordered feature-name contract,
//! - `calibration.json` — optional post-hoc calibration descriptor.
//!
//! The bundle is loaded lazily, at most once per process. Concurrent first
//! callers block on the same load; a failed load is sticky and reported as
//! not-ready until the process is restarted or a fresh predictor is built.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::errors::PredictionError;
use crate::features::FeatureRow;

/// Calibrated output is hard-clipped to this interval, never exactly 0 or 1.
pub const PROB_FLOOR: f64 = 0.01;
pub const PROB_CEIL: f64 = 0.99;

/// Row count at which batch scoring moves onto the rayon pool.
const PARALLEL_BATCH_THRESHOLD: usize = 32;

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Log-odds with the probability clamped away from 0 and 1.
#[inline]
fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-15, 1.0 - 1e-15);
    (p / (1.0 - p)).ln()
}

/// Post-hoc calibration transform. The tagged representation makes invalid
/// field combinations unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Calibration {
    None,
    Platt { coef: f64, intercept: f64 },
    Temperature { temperature: f64 },
}

impl Calibration {
    /// Apply the transform to a raw probability. Output is not yet clipped.
    pub fn apply(&self, p: f64) -> f64 {
        match self {
            Calibration::None => p,
            Calibration::Platt { coef, intercept } => sigmoid(coef * logit(p) + intercept),
            Calibration::Temperature { temperature } => {
                sigmoid(logit(p) / temperature.max(1e-3))
            }
        }
    }
}

/// Exported logistic-regression model, weights aligned with the artifact's
/// feature-name order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

/// One loaded model version: inference model, feature contract, calibration.
/// Immutable after load, safe for concurrent scoring.
pub struct ModelArtifact {
    model: LogisticModel,
    feature_names: Vec<String>,
    calibration: Calibration,
}

impl ModelArtifact {
    /// Load a bundle directory. Missing `calibration.json` means identity.
    pub async fn load(dir: &Path) -> anyhow::Result<Self> {
        let model_raw = tokio::fs::read_to_string(dir.join("model.json")).await?;
        let model: LogisticModel = serde_json::from_str(&model_raw)?;

        let names_raw = tokio::fs::read_to_string(dir.join("feature_names.json")).await?;
        let feature_names: Vec<String> = serde_json::from_str(&names_raw)?;

        if model.weights.len() != feature_names.len() {
            anyhow::bail!(
                "artifact mismatch: {} weights vs {} feature names",
                model.weights.len(),
                feature_names.len()
            );
        }

        let calibration_path = dir.join("calibration.json");
        let calibration = match tokio::fs::read_to_string(&calibration_path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Calibration::None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            model,
            feature_names,
            calibration,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Score one row: features in contract order (absent names read 0.0),
    /// raw sigmoid output, calibration, hard clip.
    pub fn score(&self, row: &FeatureRow) -> f64 {
        let mut z = self.model.intercept;
        for (name, weight) in self.feature_names.iter().zip(&self.model.weights) {
            z += weight * row.get(name);
        }
        let raw = sigmoid(z);
        self.calibration.apply(raw).clamp(PROB_FLOOR, PROB_CEIL)
    }
}

/// Process-wide predictor service with single-flight lazy initialization.
pub struct MatchupPredictor {
    artifact_dir: PathBuf,
    cell: OnceCell<Result<Arc<ModelArtifact>, String>>,
    load_attempts: AtomicU32,
}

impl MatchupPredictor {
    pub fn new(artifact_dir: PathBuf) -> Self {
        Self {
            artifact_dir,
            cell: OnceCell::new(),
            load_attempts: AtomicU32::new(0),
        }
    }

    /// Whether a model is loaded and usable. Never triggers a load.
    pub fn ready(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    /// Times the artifact load actually ran (at most 1 per process).
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts.load(Ordering::Relaxed)
    }

    /// Trigger the load if it has not happened yet; concurrent callers
    /// block on the same load rather than duplicating it.
    pub async fn ensure_loaded(&self) -> Result<(), PredictionError> {
        self.artifact().await.map(|_| ())
    }

    /// Batched, order-preserving prediction: one calibrated probability in
    /// [0.01, 0.99] per input row.
    pub async fn predict(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, PredictionError> {
        let artifact = self.artifact().await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let probs = if rows.len() >= PARALLEL_BATCH_THRESHOLD {
            rows.par_iter().map(|row| artifact.score(row)).collect()
        } else {
            rows.iter().map(|row| artifact.score(row)).collect()
        };
        Ok(probs)
    }

    async fn artifact(&self) -> Result<Arc<ModelArtifact>, PredictionError> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::Relaxed);
                match ModelArtifact::load(&self.artifact_dir).await {
                    Ok(artifact) => {
                        info!(
                            "Loaded model artifact from {} ({} features, calibration {:?})",
                            self.artifact_dir.display(),
                            artifact.feature_names.len(),
                            artifact.calibration
                        );
                        Ok(Arc::new(artifact))
                    }
                    Err(e) => {
                        // Sticky failure: no automatic retry loop. An
                        // operator restart or fresh predictor re-inits.
                        warn!(
                            "Model artifact load failed from {}: {:#}",
                            self.artifact_dir.display(),
                            e
                        );
                        Err(format!("{:#}", e))
                    }
                }
            })
            .await;

        match outcome {
            Ok(artifact) => Ok(artifact.clone()),
            Err(message) => Err(PredictionError::ModelUnavailable(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(pairs: &[(&str, f64)]) -> FeatureRow {
        let mut row = FeatureRow::default();
        for (name, value) in pairs {
            row.set(name, *value);
        }
        row
    }

    fn write_bundle(dir: &Path, weights: &[f64], intercept: f64, calibration: Option<&str>) {
        let names: Vec<String> = (0..weights.len()).map(|i| format!("f{}", i)).collect();
        let model = serde_json::json!({ "weights": weights, "intercept": intercept });
        std::fs::write(dir.join("model.json"), model.to_string()).unwrap();
        std::fs::write(
            dir.join("feature_names.json"),
            serde_json::to_string(&names).unwrap(),
        )
        .unwrap();
        if let Some(calib) = calibration {
            let mut f = std::fs::File::create(dir.join("calibration.json")).unwrap();
            f.write_all(calib.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_platt_identity() {
        let calib = Calibration::Platt {
            coef: 1.0,
            intercept: 0.0,
        };
        for p in [0.05, 0.3, 0.5, 0.8, 0.95] {
            assert!((calib.apply(p) - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_temperature_identity() {
        let calib = Calibration::Temperature { temperature: 1.0 };
        for p in [0.05, 0.3, 0.5, 0.8, 0.95] {
            assert!((calib.apply(p) - p).abs() < 1e-12);
        }
    }

    #[test]
    fn test_temperature_two_contracts_toward_half() {
        let calib = Calibration::Temperature { temperature: 2.0 };
        for p in [0.05, 0.2, 0.4, 0.6, 0.8, 0.95] {
            let out = calib.apply(p);
            assert!(
                (out - 0.5).abs() < (p - 0.5).abs(),
                "{} should move toward 0.5, got {}",
                p,
                out
            );
        }
        assert!((calib.apply(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_calibration_survives_degenerate_inputs() {
        let calib = Calibration::Platt {
            coef: 1.0,
            intercept: 0.0,
        };
        assert!(calib.apply(0.0).is_finite());
        assert!(calib.apply(1.0).is_finite());
    }

    #[test]
    fn test_calibration_tagged_parse() {
        let calib: Calibration =
            serde_json::from_str(r#"{"type": "platt", "coef": 0.9, "intercept": 0.05}"#).unwrap();
        assert_eq!(
            calib,
            Calibration::Platt {
                coef: 0.9,
                intercept: 0.05
            }
        );
        let calib: Calibration = serde_json::from_str(r#"{"type": "none"}"#).unwrap();
        assert_eq!(calib, Calibration::None);
    }

    #[tokio::test]
    async fn test_load_and_predict_in_contract_order() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), &[2.0, -1.0], 0.25, None);

        let predictor = MatchupPredictor::new(dir.path().to_path_buf());
        assert!(!predictor.ready());

        let rows = vec![
            row(&[("f0", 1.0), ("f1", 0.5)]),
            row(&[("f0", 0.0)]), // f1 absent: reads as 0.0
        ];
        let probs = predictor.predict(&rows).await.unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs[0] - sigmoid(0.25 + 2.0 - 0.5)).abs() < 1e-12);
        assert!((probs[1] - sigmoid(0.25)).abs() < 1e-12);
        assert!(predictor.ready());
    }

    #[tokio::test]
    async fn test_output_always_clipped() {
        let dir = tempfile::tempdir().unwrap();
        // Adversarial weights drive the raw sigmoid to exactly 1.0 / 0.0.
        write_bundle(dir.path(), &[1000.0], 0.0, None);

        let predictor = MatchupPredictor::new(dir.path().to_path_buf());
        let probs = predictor
            .predict(&[row(&[("f0", 100.0)]), row(&[("f0", -100.0)])])
            .await
            .unwrap();
        assert_eq!(probs[0], PROB_CEIL);
        assert_eq!(probs[1], PROB_FLOOR);
    }

    #[tokio::test]
    async fn test_calibration_loaded_from_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            &[1.0],
            0.0,
            Some(r#"{"type": "temperature", "temperature": 2.0}"#),
        );

        let predictor = MatchupPredictor::new(dir.path().to_path_buf());
        let probs = predictor.predict(&[row(&[("f0", 3.0)])]).await.unwrap();
        let expected = Calibration::Temperature { temperature: 2.0 }.apply(sigmoid(3.0));
        assert!((probs[0] - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_failed_load_is_sticky() {
        let predictor = MatchupPredictor::new(PathBuf::from("/nonexistent/bundle"));
        let err = predictor.predict(&[row(&[])]).await.unwrap_err();
        assert!(matches!(err, PredictionError::ModelUnavailable(_)));
        assert!(!predictor.ready());

        // No silent retry: the second call fails without reloading.
        let err = predictor.predict(&[row(&[])]).await.unwrap_err();
        assert!(matches!(err, PredictionError::ModelUnavailable(_)));
        assert_eq!(predictor.load_attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), &[0.5], 0.0, None);

        let predictor = Arc::new(MatchupPredictor::new(dir.path().to_path_buf()));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let predictor = predictor.clone();
            handles.push(tokio::spawn(async move { predictor.ensure_loaded().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(predictor.load_attempts(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_bundle_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), &[1.0, 2.0], 0.0, None);
        // Overwrite names with the wrong arity.
        std::fs::write(dir.path().join("feature_names.json"), r#"["f0"]"#).unwrap();

        let predictor = MatchupPredictor::new(dir.path().to_path_buf());
        assert!(predictor.ensure_loaded().await.is_err());
        assert!(!predictor.ready());
    }
}
