//! Clasificador softmax (regresión logística multinomial) entrenado con SGD.
//!
//! Es el colaborador de referencia para los traits `Model` / `ModelFactory`:
//! suficiente para recorrer el ciclo init → train → predict → save → load sin
//! depender de un framework de deep learning.
//!
//! Feed esperado: `images` con `n` ítems de `input_size` valores (cualquier
//! forma por ítem, se aplana) y, para entrenar, `labels` con la clase de cada
//! ítem.

use std::fs;
use std::path::Path;

use flow_core::hashing::to_canonical_json;
use flow_core::{Datum, Feed, Fetches, Model, ModelFactory, PipelineError, PipelineResult};
use ndarray::{Array1, Array2, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::metrics::argmax_rows;

const ARTIFACT_FORMAT: &str = "softmax-classifier/v1";

fn default_learning_rate() -> f32 {
    0.1
}

/// Config aceptada por `SoftmaxClassifierFactory::initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxConfig {
    pub input_size: usize,
    pub num_classes: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    weights: Array2<f32>,
    bias: Array1<f32>,
    learning_rate: f32,
}

#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    params: Params,
}

impl SoftmaxClassifier {
    pub fn new(config: &SoftmaxConfig) -> PipelineResult<Self> {
        if config.input_size == 0 || config.num_classes < 2 {
            return Err(PipelineError::Data(format!("invalid classifier shape {}x{}",
                                                   config.input_size,
                                                   config.num_classes)));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let weights = Array2::from_shape_fn((config.input_size, config.num_classes), |_| rng.gen_range(-0.01..0.01));
        Ok(Self { params: Params { weights,
                                   bias: Array1::zeros(config.num_classes),
                                   learning_rate: config.learning_rate } })
    }

    pub fn input_size(&self) -> usize {
        self.params.weights.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.params.weights.ncols()
    }

    fn inputs(&self, feed: &Feed) -> PipelineResult<Array2<f32>> {
        let images = require_tensor(feed, "images")?;
        let n = images.shape().first().copied().unwrap_or(0);
        if n == 0 {
            return Ok(Array2::zeros((0, self.input_size())));
        }
        let d = images.len() / n;
        if d != self.input_size() {
            return Err(PipelineError::Data(format!("expected {} input values per item, got {d}", self.input_size())));
        }
        let flat = images.as_standard_layout()
                         .to_owned()
                         .into_shape_with_order((n, d))
                         .map_err(|e| PipelineError::Data(e.to_string()))?;
        Ok(flat)
    }

    fn labels(&self, feed: &Feed, n: usize) -> PipelineResult<Vec<usize>> {
        let labels = require_tensor(feed, "labels")?;
        if labels.len() != n {
            return Err(PipelineError::Data(format!("{} labels for {n} items", labels.len())));
        }
        labels.iter()
              .map(|&y| {
                  let class = y as usize;
                  if y < 0.0 || class >= self.num_classes() || y.fract() != 0.0 {
                      Err(PipelineError::Data(format!("label {y} is not a class in 0..{}", self.num_classes())))
                  } else {
                      Ok(class)
                  }
              })
              .collect()
    }

    fn probabilities(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut logits = x.dot(&self.params.weights) + &self.params.bias;
        for mut row in logits.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        logits
    }

    fn to_artifact(&self) -> PipelineResult<Value> {
        let params = serde_json::to_value(&self.params)?;
        Ok(serde_json::json!({
            "format": ARTIFACT_FORMAT,
            "checksum": checksum(&params),
            "params": params,
        }))
    }

    fn from_artifact(doc: &Value) -> PipelineResult<Self> {
        if doc.get("format").and_then(Value::as_str) != Some(ARTIFACT_FORMAT) {
            return Err(PipelineError::Serialization(format!("not a {ARTIFACT_FORMAT} artifact")));
        }
        let params = doc.get("params")
                        .ok_or_else(|| PipelineError::Serialization("artifact has no params".to_string()))?;
        let expected = doc.get("checksum").and_then(Value::as_str).unwrap_or_default();
        if checksum(params) != expected {
            return Err(PipelineError::Serialization("artifact checksum mismatch".to_string()));
        }
        let params: Params = serde_json::from_value(params.clone())?;
        if params.bias.len() != params.weights.ncols() {
            return Err(PipelineError::Serialization("bias does not match weight columns".to_string()));
        }
        Ok(Self { params })
    }
}

fn require_tensor(feed: &Feed, name: &str) -> PipelineResult<ArrayD<f32>> {
    feed.get(name)
        .ok_or_else(|| PipelineError::Data(format!("feed is missing '{name}'")))?
        .to_tensor()
}

fn checksum(params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(params).as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Model for SoftmaxClassifier {
    fn train(&mut self, feed: &Feed) -> PipelineResult<Fetches> {
        let x = self.inputs(feed)?;
        let n = x.nrows();
        let labels = self.labels(feed, n)?;
        let mut fetches = Fetches::new();
        if n == 0 {
            fetches.insert("loss".to_string(), Datum::from(0.0));
            fetches.insert("accuracy".to_string(), Datum::from(0.0));
            return Ok(fetches);
        }

        let probs = self.probabilities(&x);
        let predicted = argmax_rows(&probs);
        let mut loss = 0.0f64;
        let mut hits = 0usize;
        let mut grad = probs;
        for (i, &y) in labels.iter().enumerate() {
            loss -= f64::from(grad[[i, y]].max(1e-7)).ln();
            if predicted[i] as usize == y {
                hits += 1;
            }
            grad[[i, y]] -= 1.0;
        }
        grad.mapv_inplace(|g| g / n as f32);

        let lr = self.params.learning_rate;
        let grad_w = x.t().dot(&grad);
        let grad_b = grad.sum_axis(Axis(0));
        self.params.weights.scaled_add(-lr, &grad_w);
        self.params.bias.scaled_add(-lr, &grad_b);

        fetches.insert("loss".to_string(), Datum::from(loss / n as f64));
        fetches.insert("accuracy".to_string(), Datum::from(hits as f64 / n as f64));
        Ok(fetches)
    }

    fn predict(&self, feed: &Feed) -> PipelineResult<Fetches> {
        let x = self.inputs(feed)?;
        let probs = self.probabilities(&x);
        let predictions = argmax_rows(&probs);
        let mut fetches = Fetches::new();
        fetches.insert("predictions".to_string(), Datum::Tensor(predictions.into_dyn()));
        fetches.insert("probabilities".to_string(), Datum::Tensor(probs.into_dyn()));
        Ok(fetches)
    }

    fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(&self.to_artifact()?)?)?;
        Ok(())
    }
}

/// Factoría registrada en `init_model`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxClassifierFactory;

impl ModelFactory for SoftmaxClassifierFactory {
    fn initialize(&self, config: &Value) -> PipelineResult<Box<dyn Model>> {
        let config: SoftmaxConfig = serde_json::from_value(config.clone())?;
        log::debug!("softmax:init input_size={} classes={} lr={}",
                    config.input_size,
                    config.num_classes,
                    config.learning_rate);
        Ok(Box::new(SoftmaxClassifier::new(&config)?))
    }

    fn load(&self, path: &Path) -> PipelineResult<Box<dyn Model>> {
        let doc: Value = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Box::new(SoftmaxClassifier::from_artifact(&doc)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn config() -> SoftmaxConfig {
        SoftmaxConfig { input_size: 2,
                        num_classes: 2,
                        learning_rate: 0.5,
                        seed: 1 }
    }

    fn feed() -> Feed {
        let mut feed = Feed::new();
        let x = array![[1.0f32, 0.0], [0.0, 1.0], [0.9, 0.1], [0.1, 0.9]];
        feed.insert("images".into(), Datum::Tensor(x.into_dyn()));
        feed.insert("labels".into(), Datum::Tensor(Array::from_vec(vec![0.0f32, 1.0, 0.0, 1.0]).into_dyn()));
        feed
    }

    #[test]
    fn training_reduces_loss_on_separable_data() {
        let mut clf = SoftmaxClassifier::new(&config()).expect("clf");
        let first = clf.train(&feed()).expect("train")["loss"].as_f64().expect("loss");
        let mut last = first;
        for _ in 0..50 {
            last = clf.train(&feed()).expect("train")["loss"].as_f64().expect("loss");
        }
        assert!(last < first);
        let out = clf.predict(&feed()).expect("predict");
        assert_eq!(out["predictions"].as_tensor().map(|p| p.iter().copied().collect::<Vec<_>>()),
                   Some(vec![0.0, 1.0, 0.0, 1.0]));
    }

    #[test]
    fn rejects_bad_labels_and_shapes() {
        let mut clf = SoftmaxClassifier::new(&config()).expect("clf");
        let mut bad = feed();
        bad.insert("labels".into(), Datum::Tensor(Array::from_vec(vec![0.0f32, 5.0, 0.0, 1.0]).into_dyn()));
        assert!(clf.train(&bad).is_err());
        let mut wide = Feed::new();
        wide.insert("images".into(), Datum::Tensor(Array::<f32, _>::zeros((2, 3)).into_dyn()));
        assert!(clf.predict(&wide).is_err());
    }

    #[test]
    fn tampered_artifact_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clf.json");
        SoftmaxClassifier::new(&config()).expect("clf").save(&path).expect("save");
        let mut doc: Value = serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        doc["params"]["learning_rate"] = serde_json::json!(9.0);
        fs::write(&path, serde_json::to_vec(&doc).expect("encode")).expect("write");
        assert!(SoftmaxClassifierFactory.load(&path).is_err());
    }
}
