//! Acciones sobre modelos: init, import, train, predict y save.
//!
//! Los modelos se crean de forma perezosa en la primera ejecución de
//! `InitModel`; los importados deben enlazarse en el pipeline antes del run
//! (`BoundPipeline::import_model`).

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ActionDefinition, ActionKind, Arg, ArgMap, ExecutionContext, ResolvedArgs};
use crate::data::Datum;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::{Feed, Fetches, ModelBinding, ModelFactory, ModelHandle};
use crate::vars::UpdateMode;

/// Destino de un fetch: variable y modo de actualización.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTo {
    pub variable: String,
    pub mode: UpdateMode,
}

impl SaveTo {
    pub fn write(variable: impl Into<String>) -> Self {
        Self { variable: variable.into(),
               mode: UpdateMode::Write }
    }

    pub fn append(variable: impl Into<String>) -> Self {
        Self { variable: variable.into(),
               mode: UpdateMode::Append }
    }

    pub fn extend(variable: impl Into<String>) -> Self {
        Self { variable: variable.into(),
               mode: UpdateMode::Extend }
    }
}

/// Crea el modelo `model` desde config la primera vez que se ejecuta.
#[derive(Debug, Clone)]
pub struct InitModel {
    name: String,
    model: String,
    factory: Arc<dyn ModelFactory>,
    args: ArgMap,
}

impl InitModel {
    pub fn new(model: impl Into<String>, factory: Arc<dyn ModelFactory>, config: Arg) -> Self {
        let model = model.into();
        let mut args = ArgMap::new();
        args.insert("config".to_string(), config);
        Self { name: format!("init_model:{model}"),
               model,
               factory,
               args }
    }
}

impl ActionDefinition for InitModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Execute
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "model": self.model, "factory": format!("{:?}", self.factory) })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        let models = ctx.models_mut()?;
        match models.get(&self.model) {
            Some(ModelBinding::Trainable(_)) => return Ok(()),
            Some(ModelBinding::ReadOnly(_)) => {
                return Err(PipelineError::model_state(&self.model, "cannot initialize over an imported model"));
            }
            None => {}
        }
        let config = match args.require("config")? {
            Datum::Json(v) => v.clone(),
            other => return Err(PipelineError::Data(format!("model config must be JSON, got {}", other.kind_name()))),
        };
        let handle = ModelHandle::initialize(&self.model, self.factory.as_ref(), &config)?;
        models.insert_owned(handle)
    }
}

/// Declara que el modelo viene de otro pipeline y sólo se usa para predecir.
#[derive(Debug, Clone)]
pub struct ImportModel {
    name: String,
    model: String,
    args: ArgMap,
}

impl ImportModel {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self { name: format!("import_model:{model}"),
               model,
               args: ArgMap::new() }
    }
}

impl ActionDefinition for ImportModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Execute
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "model": self.model })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, _args: ResolvedArgs) -> PipelineResult<()> {
        match ctx.models()?.get(&self.model) {
            Some(ModelBinding::ReadOnly(_)) => Ok(()),
            Some(ModelBinding::Trainable(_)) => {
                Err(PipelineError::model_state(&self.model, "declared as imported but owned by this pipeline"))
            }
            None => Err(PipelineError::model_state(&self.model,
                                                   "declared as imported but nothing was bound; call import_model on the pipeline")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Train,
    Predict,
}

/// Paso de modelo (train o predict) con feed, fetches y destino de cada fetch.
#[derive(Debug, Clone)]
pub struct ModelStep {
    name: String,
    model: String,
    step: Step,
    fetches: Vec<String>,
    save_to: Vec<SaveTo>,
    args: ArgMap,
}

impl ModelStep {
    /// `train_model`: un paso de optimización. Falla sobre modelos importados.
    pub fn train(model: impl Into<String>, feed: ArgMap, fetches: Vec<String>, save_to: Vec<SaveTo>) -> Self {
        Self::new(Step::Train, model.into(), feed, fetches, save_to)
    }

    /// `predict_model`: forward pass, válido también en modelos importados.
    pub fn predict(model: impl Into<String>, feed: ArgMap, fetches: Vec<String>, save_to: Vec<SaveTo>) -> Self {
        Self::new(Step::Predict, model.into(), feed, fetches, save_to)
    }

    fn new(step: Step, model: String, feed: ArgMap, fetches: Vec<String>, save_to: Vec<SaveTo>) -> Self {
        let prefix = match step {
            Step::Train => "train_model",
            Step::Predict => "predict_model",
        };
        Self { name: format!("{prefix}:{model}"),
               model,
               step,
               fetches,
               save_to,
               args: feed }
    }

    /// Comprueba que cada fetch tenga destino.
    pub fn validate(&self) -> Result<(), String> {
        if self.fetches.len() != self.save_to.len() {
            return Err(format!("{}: {} fetches but {} save_to targets",
                               self.name,
                               self.fetches.len(),
                               self.save_to.len()));
        }
        Ok(())
    }

    fn store(&self, ctx: &mut ExecutionContext<'_>, mut fetched: Fetches) -> PipelineResult<()> {
        let vars = ctx.vars_mut()?;
        for (fetch, target) in self.fetches.iter().zip(self.save_to.iter()) {
            let value = fetched.shift_remove(fetch)
                               .ok_or_else(|| PipelineError::model_state(&self.model, format!("model did not produce fetch '{fetch}'")))?;
            vars.update(&target.variable, value, target.mode)?;
        }
        Ok(())
    }
}

impl ActionDefinition for ModelStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Execute
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "model": self.model, "fetches": self.fetches, "save_to": self.save_to })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        let binding = ctx.models()?.require(&self.model)?.clone();
        let feed: Feed = args.into_inner();
        let fetched = match self.step {
            Step::Train => binding.train(&feed)?,
            Step::Predict => binding.predict(&feed)?,
        };
        self.store(ctx, fetched)
    }
}

/// Guarda los parámetros del modelo en la ruta resuelta del argumento `path`.
#[derive(Debug, Clone)]
pub struct SaveModel {
    name: String,
    model: String,
    args: ArgMap,
}

impl SaveModel {
    pub fn new(model: impl Into<String>, path: Arg) -> Self {
        let model = model.into();
        let mut args = ArgMap::new();
        args.insert("path".to_string(), path);
        Self { name: format!("save_model:{model}"),
               model,
               args }
    }
}

impl ActionDefinition for SaveModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Execute
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "model": self.model })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        let path = PathBuf::from(args.str("path")?);
        ctx.models()?.require(&self.model)?.save(&path)
    }
}
