//! Builder de `Template`.
//!
//! Cada método consume el builder y devuelve uno nuevo, de modo que un
//! template se escribe como una única cadena:
//!
//! ```ignore
//! let template = Template::builder()
//!     .config("model_config", json!({"learning_rate": 0.1}))
//!     .init_variable("loss_history", VariableDecl::list(ResetPolicy::Once))
//!     .init_model("clf", factory, Arg::config("model_config"))
//!     .train_model("clf",
//!                  [("images", Arg::batch("images")), ("labels", Arg::batch("labels"))],
//!                  &["loss"],
//!                  [SaveTo::append("loss_history")])
//!     .build()?;
//! ```
//!
//! Los errores de construcción (nombres vacíos, fetches sin destino, config
//! que no es un objeto) se acumulan y se reportan juntos en `build`.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{merge::merge_into_config, Config, Template};
use crate::action::{ActionDefinition, ActionKind, Arg, ArgMap, ExecutionContext, FnAction, ImportModel, InitModel,
                    ModelStep, ResolvedArgs, SaveModel, SaveTo, UpdateVariable};
use crate::errors::{PipelineError, PipelineResult};
use crate::models::ModelFactory;
use crate::vars::{UpdateMode, VariableDecl};

#[derive(Default)]
pub struct TemplateBuilder {
    actions: Vec<Arc<dyn ActionDefinition>>,
    config: Config,
    variables: IndexMap<String, VariableDecl>,
    errors: Vec<String>,
}

fn arg_map<I, S>(args: I) -> ArgMap
    where I: IntoIterator<Item = (S, Arg)>,
          S: Into<String>
{
    args.into_iter().map(|(k, a)| (k.into(), a)).collect()
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fija un valor de config.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Fija varios valores de config desde un objeto JSON.
    pub fn configs(mut self, values: Value) -> Self {
        if let Err(e) = merge_into_config(&mut self.config, &values) {
            self.errors.push(e.to_string());
        }
        self
    }

    /// Declara una variable. Redeclarar reemplaza la declaración anterior.
    pub fn init_variable(mut self, name: impl Into<String>, decl: VariableDecl) -> Self {
        let name = name.into();
        if name.is_empty() {
            self.errors.push("variable name cannot be empty".to_string());
        }
        self.variables.insert(name, decl);
        self
    }

    /// Añade cualquier acción que implemente `ActionDefinition`.
    pub fn add_action<A>(mut self, action: A) -> Self
        where A: ActionDefinition + 'static
    {
        if action.name().is_empty() {
            self.errors.push("action name cannot be empty".to_string());
        }
        self.actions.push(Arc::new(action));
        self
    }

    pub fn update_variable(self, name: impl Into<String>, value: impl Into<Arg>, mode: UpdateMode) -> Self {
        let name = name.into();
        if name.is_empty() {
            return self.fail("update_variable: variable name cannot be empty");
        }
        self.add_action(UpdateVariable::new(name, value.into(), mode))
    }

    /// Añade un callable de usuario.
    pub fn call<I, S, F>(self, name: impl Into<String>, kind: ActionKind, args: I, func: F) -> Self
        where I: IntoIterator<Item = (S, Arg)>,
              S: Into<String>,
              F: Fn(&mut ExecutionContext<'_>, &ResolvedArgs) -> PipelineResult<()> + Send + Sync + 'static
    {
        self.add_action(FnAction::new(name, kind, arg_map(args), func))
    }

    pub fn init_model(self, model: impl Into<String>, factory: Arc<dyn ModelFactory>, config: impl Into<Arg>) -> Self {
        let model = model.into();
        if model.is_empty() {
            return self.fail("init_model: model name cannot be empty");
        }
        self.add_action(InitModel::new(model, factory, config.into()))
    }

    pub fn import_model(self, model: impl Into<String>) -> Self {
        let model = model.into();
        if model.is_empty() {
            return self.fail("import_model: model name cannot be empty");
        }
        self.add_action(ImportModel::new(model))
    }

    /// Paso de entrenamiento. `fetches[i]` se guarda según `save_to[i]`.
    pub fn train_model<I, S, T>(self, model: impl Into<String>, feed: I, fetches: &[&str], save_to: T) -> Self
        where I: IntoIterator<Item = (S, Arg)>,
              S: Into<String>,
              T: IntoIterator<Item = SaveTo>
    {
        let step = ModelStep::train(model,
                                    arg_map(feed),
                                    fetches.iter().map(|f| f.to_string()).collect(),
                                    save_to.into_iter().collect());
        self.add_model_step(step)
    }

    /// Paso de predicción. Funciona con modelos propios e importados.
    pub fn predict_model<I, S, T>(self, model: impl Into<String>, feed: I, fetches: &[&str], save_to: T) -> Self
        where I: IntoIterator<Item = (S, Arg)>,
              S: Into<String>,
              T: IntoIterator<Item = SaveTo>
    {
        let step = ModelStep::predict(model,
                                      arg_map(feed),
                                      fetches.iter().map(|f| f.to_string()).collect(),
                                      save_to.into_iter().collect());
        self.add_model_step(step)
    }

    pub fn save_model(self, model: impl Into<String>, path: impl Into<Arg>) -> Self {
        self.add_action(SaveModel::new(model, path.into()))
    }

    /// Añade las acciones, config y variables de otro template. Las claves
    /// de config y variables de `other` ganan en caso de colisión.
    pub fn extend(mut self, other: &Template) -> Self {
        self.actions.extend(other.actions().iter().cloned());
        for (k, v) in other.config().iter() {
            self.config.insert(k.clone(), v.clone());
        }
        for (k, d) in other.variables().iter() {
            self.variables.insert(k.clone(), d.clone());
        }
        self
    }

    pub fn build(self) -> PipelineResult<Template> {
        if !self.errors.is_empty() {
            return Err(PipelineError::Build(self.errors.join("; ")));
        }
        let template = Template::from_parts(self.actions, self.config, self.variables);
        log::debug!("template:build actions={} hash={}", template.len(), template.definition_hash());
        Ok(template)
    }

    fn add_model_step(self, step: ModelStep) -> Self {
        match step.validate() {
            Ok(()) => self.add_action(step),
            Err(reason) => self.fail(reason),
        }
    }

    fn fail(mut self, reason: impl Into<String>) -> Self {
        self.errors.push(reason.into());
        self
    }
}
