//! Escenario de referencia: entrenar un clasificador sobre dígitos, evaluarlo
//! en un segundo pipeline que importa el modelo, guardarlo, recargarlo y
//! comprobar que la copia recargada predice igual.
use std::path::PathBuf;
use std::sync::Arc;

use flow_adapters::{accuracy, ImagesTemplateExt, SoftmaxClassifierFactory};
use flow_core::{Arg, DataSource, Datum, InMemoryDataset, ModelHandle, ResetPolicy, SaveTo, Template,
                VariableDecl};
use log::info;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::mnist::{self, NUM_CLASSES, SIDE};

pub const MODEL: &str = "conv_nn";

/// Resumen de una ejecución completa del escenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub train_items: usize,
    pub test_items: usize,
    pub train_batches: usize,
    pub final_loss: Option<f64>,
    pub accuracy: f64,
    pub reloaded_accuracy: f64,
    pub model_path: PathBuf,
}

/// Template de entrenamiento: normaliza, aplana, inicializa el modelo desde
/// `model_config` y entrena. `model_path` queda en la config para quien
/// añada un `save_model`; el escenario guarda una sola vez al terminar.
pub fn train_template(cfg: &AppConfig) -> AppResult<Template> {
    let template = Template::builder().config("model_config",
                                              json!({
                                                  "input_size": SIDE * SIDE,
                                                  "num_classes": NUM_CLASSES,
                                                  "learning_rate": cfg.learning_rate,
                                                  "seed": cfg.seed,
                                              }))
                                      .config("model_path", cfg.model_path.to_string_lossy().to_string())
                                      .init_variable("loss_history", VariableDecl::list(ResetPolicy::Once))
                                      .init_variable("train_accuracy", VariableDecl::list(ResetPolicy::EveryRun))
                                      .normalize("images", 255.0)
                                      .reshape("images", &[SIDE * SIDE])
                                      .init_model(MODEL, Arc::new(SoftmaxClassifierFactory), Arg::config("model_config"))
                                      .train_model(MODEL,
                                                   [("images", Arg::batch("images")), ("labels", Arg::batch("labels"))],
                                                   &["loss", "accuracy"],
                                                   [SaveTo::append("loss_history"), SaveTo::append("train_accuracy")])
                                      .build()?;
    Ok(template)
}

/// Template de evaluación: importa el modelo y acumula predicciones.
pub fn eval_template() -> AppResult<Template> {
    let template = Template::builder().init_variable("predictions", VariableDecl::list(ResetPolicy::EveryRun))
                                      .normalize("images", 255.0)
                                      .reshape("images", &[SIDE * SIDE])
                                      .import_model(MODEL)
                                      .predict_model(MODEL,
                                                     [("images", Arg::batch("images"))],
                                                     &["predictions"],
                                                     [SaveTo::extend("predictions")])
                                      .build()?;
    Ok(template)
}

/// Datos según la config: IDX en `data_dir` o dígitos sintéticos.
pub fn datasets(cfg: &AppConfig) -> AppResult<(InMemoryDataset, InMemoryDataset)> {
    match &cfg.data_dir {
        Some(dir) => mnist::load_mnist(dir, 60_000, 10_000),
        None => Ok(mnist::synthetic_digits(cfg.synthetic_items, cfg.seed)?.split(0.8, Some(cfg.seed))?),
    }
}

fn evaluate(template: &Template, test: &InMemoryDataset, model: &ModelHandle, cfg: &AppConfig) -> AppResult<f64> {
    let mut pipeline = template.bind(test.clone());
    pipeline.import_handle(MODEL, model)?;
    pipeline.run(&cfg.eval_options())?;
    let predictions = pipeline.variable("predictions")
                              .ok_or_else(|| AppError::Dataset("la evaluación no produjo predicciones".into()))?
                              .to_tensor()?;
    let all: Vec<usize> = (0..test.len()).collect();
    let labels = test.fetch(&all)?
                     .labels()
                     .cloned()
                     .ok_or_else(|| AppError::Dataset("el conjunto de test no tiene etiquetas".into()))?;
    Ok(accuracy(&predictions, &labels)?)
}

/// Ejecuta train → eval → save → reload → eval.
pub fn run(cfg: &AppConfig, train: InMemoryDataset, test: InMemoryDataset) -> AppResult<ScenarioReport> {
    let train_items = train.len();
    let test_items = test.len();
    let mut trainer = train_template(cfg)?.bind(train);
    let summary = trainer.run(&cfg.run_options())?;
    let final_loss = trainer.variable("loss_history")
                            .and_then(Datum::as_list)
                            .and_then(<[Datum]>::last)
                            .and_then(Datum::as_f64);
    info!("scenario:trained batches={} items={} loss={final_loss:?}",
          summary.batches,
          summary.items);

    let owner = trainer.model(MODEL)
                       .ok_or_else(|| AppError::Dataset("el entrenamiento no ejecutó ningún batch".into()))?;
    let eval = eval_template()?;
    let owner_accuracy = evaluate(&eval, &test, &owner, cfg)?;
    info!("scenario:eval accuracy={owner_accuracy:.4}");

    owner.save(&cfg.model_path)?;
    let reloaded = ModelHandle::load(MODEL, &SoftmaxClassifierFactory, &cfg.model_path)?;
    let reloaded_accuracy = evaluate(&eval, &test, &reloaded, cfg)?;
    info!("scenario:reloaded path={} accuracy={reloaded_accuracy:.4}",
          cfg.model_path.display());

    Ok(ScenarioReport { train_items,
                        test_items,
                        train_batches: summary.batches,
                        final_loss,
                        accuracy: owner_accuracy,
                        reloaded_accuracy,
                        model_path: cfg.model_path.clone() })
}
