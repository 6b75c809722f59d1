//! `BoundPipeline`: template ligado a una fuente de datos, con estado propio.

use crate::data::{DataSource, Datum};
use crate::errors::{PipelineError, PipelineResult};
use crate::event::{EventStore, InMemoryEventStore};
use crate::models::{ModelBinding, ModelHandle, ModelRegistry};
use crate::template::Template;
use crate::vars::VariableStore;

use super::{CancelToken, RunSummary};

/// Pipeline ejecutable.
///
/// Cada binding tiene sus propias variables y modelos: ligar el mismo
/// template a dos fuentes produce dos pipelines independientes. Los modelos
/// sólo se comparten de forma explícita con `import_model`.
pub struct BoundPipeline<D, E = InMemoryEventStore>
    where D: DataSource,
          E: EventStore
{
    pub(crate) template: Template,
    pub(crate) source: D,
    pub(crate) vars: VariableStore,
    pub(crate) models: ModelRegistry,
    pub(crate) events: E,
    pub(crate) cancel: CancelToken,
    pub(crate) last_run: Option<RunSummary>,
}

impl<D: DataSource> BoundPipeline<D> {
    pub(crate) fn new(template: Template, source: D) -> Self {
        let vars = VariableStore::from_decls(template.variables());
        log::debug!("pipeline:bind hash={} items={}", template.definition_hash(), source.len());
        Self { template,
               source,
               vars,
               models: ModelRegistry::new(),
               events: InMemoryEventStore::default(),
               cancel: CancelToken::new(),
               last_run: None }
    }
}

impl<D, E> BoundPipeline<D, E>
    where D: DataSource,
          E: EventStore
{
    /// Sustituye el store de eventos.
    pub fn with_event_store<E2: EventStore>(self, events: E2) -> BoundPipeline<D, E2> {
        BoundPipeline { template: self.template,
                        source: self.source,
                        vars: self.vars,
                        models: self.models,
                        events,
                        cancel: self.cancel,
                        last_run: self.last_run }
    }

    /// Usa un token de cancelación externo (p. ej. compartido con un callable).
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn variable(&self, name: &str) -> Option<&Datum> {
        self.vars.get(name)
    }

    pub fn variables(&self) -> &VariableStore {
        &self.vars
    }

    /// Handle del modelo `name`, propio o importado.
    pub fn model(&self, name: &str) -> Option<ModelHandle> {
        self.models.get(name).map(|b| b.handle().clone())
    }

    pub fn model_binding(&self, name: &str) -> Option<&ModelBinding> {
        self.models.get(name)
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Importa por referencia el modelo `name` de otro pipeline. El modelo
    /// queda de sólo lectura aquí; el pipeline de origen lo sigue entrenando.
    pub fn import_model<D2, E2>(&mut self, name: &str, other: &BoundPipeline<D2, E2>) -> PipelineResult<()>
        where D2: DataSource,
              E2: EventStore
    {
        let handle = other.model(name)
                          .ok_or_else(|| PipelineError::model_state(name, "source pipeline has no such model; run it first"))?;
        self.import_handle(name, &handle)
    }

    /// Importa un handle suelto (p. ej. cargado con `ModelHandle::load`).
    pub fn import_handle(&mut self, name: &str, handle: &ModelHandle) -> PipelineResult<()> {
        self.models.import(name, handle.clone())?;
        log::debug!("pipeline:import model={name}");
        Ok(())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn last_run(&self) -> Option<&RunSummary> {
        self.last_run.as_ref()
    }
}
