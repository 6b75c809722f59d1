use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};

use super::{merge::merge_into_config, Config, TemplateBuilder};
use crate::action::{ActionDefinition, ActionKind};
use crate::constants::ENGINE_VERSION;
use crate::data::DataSource;
use crate::engine::BoundPipeline;
use crate::errors::PipelineResult;
use crate::hashing::hash_value;
use crate::vars::VariableDecl;

struct TemplateDef {
    actions: Vec<Arc<dyn ActionDefinition>>,
    config: Config,
    variables: IndexMap<String, VariableDecl>,
    definition_hash: String,
}

/// Cadena de acciones inmutable y reutilizable.
///
/// Clonar un `Template` es barato (comparte la definición). Ligarlo a una
/// fuente de datos con `bind` produce un `BoundPipeline` con su propio estado;
/// el template no cambia.
#[derive(Clone)]
pub struct Template {
    inner: Arc<TemplateDef>,
}

impl Template {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::new()
    }

    pub(crate) fn from_parts(actions: Vec<Arc<dyn ActionDefinition>>,
                             config: Config,
                             variables: IndexMap<String, VariableDecl>)
                             -> Self {
        let definition_hash = compute_hash(&actions, &config, &variables);
        Self { inner: Arc::new(TemplateDef { actions,
                                             config,
                                             variables,
                                             definition_hash }) }
    }

    pub fn actions(&self) -> &[Arc<dyn ActionDefinition>] {
        &self.inner.actions
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn variables(&self) -> &IndexMap<String, VariableDecl> {
        &self.inner.variables
    }

    pub fn len(&self) -> usize {
        self.inner.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.actions.is_empty()
    }

    /// Hash blake3 de la definición canónica (acciones, config, variables).
    pub fn definition_hash(&self) -> &str {
        &self.inner.definition_hash
    }

    /// `true` si ambos comparten la misma definición en memoria.
    pub fn ptr_eq(&self, other: &Template) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Número de acciones `Prepare` al inicio de la cadena. Son las que el
    /// executor puede adelantar en el hilo de prefetch.
    pub fn prepare_prefix_len(&self) -> usize {
        self.inner
            .actions
            .iter()
            .take_while(|a| a.kind() == ActionKind::Prepare)
            .count()
    }

    /// Nuevo template con la config sobrescrita; `self` no cambia.
    pub fn with_config(&self, overrides: Value) -> PipelineResult<Template> {
        let mut config = self.inner.config.clone();
        merge_into_config(&mut config, &overrides)?;
        Ok(Self::from_parts(self.inner.actions.clone(), config, self.inner.variables.clone()))
    }

    /// Builder inicializado con este template, para extenderlo.
    pub fn to_builder(&self) -> TemplateBuilder {
        TemplateBuilder::new().extend(self)
    }

    /// Liga el template a una fuente de datos.
    pub fn bind<D: DataSource>(&self, source: D) -> BoundPipeline<D> {
        BoundPipeline::new(self.clone(), source)
    }

    pub fn describe(&self) -> Value {
        describe_parts(&self.inner.actions, &self.inner.config, &self.inner.variables)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
         .field("actions", &self.inner.actions.iter().map(|a| a.name()).collect::<Vec<_>>())
         .field("config", &self.inner.config)
         .field("variables", &self.inner.variables.keys().collect::<Vec<_>>())
         .field("definition_hash", &self.inner.definition_hash)
         .finish()
    }
}

fn describe_parts(actions: &[Arc<dyn ActionDefinition>], config: &Config, variables: &IndexMap<String, VariableDecl>) -> Value {
    let actions: Vec<Value> = actions.iter().map(|a| a.describe()).collect();
    let config: serde_json::Map<String, Value> = config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let variables: serde_json::Map<String, Value> = variables.iter()
                                                             .map(|(k, d)| (k.clone(), d.describe()))
                                                             .collect();
    json!({ "actions": actions, "config": config, "variables": variables })
}

fn compute_hash(actions: &[Arc<dyn ActionDefinition>], config: &Config, variables: &IndexMap<String, VariableDecl>) -> String {
    hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "definition": describe_parts(actions, config, variables),
    }))
}
