//! Contexto de ejecución de una acción sobre un batch.

use serde_json::Value;

use crate::data::Batch;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::ModelRegistry;
use crate::template::Config;
use crate::vars::VariableStore;

/// Estado del pipeline visible durante la fase de ejecución.
struct RunState<'a> {
    vars: &'a mut VariableStore,
    models: &'a mut ModelRegistry,
}

/// Lo que ve una acción al ejecutarse: el batch, la config y, fuera de la
/// fase de preparación, las variables y modelos del pipeline.
///
/// Las acciones `Prepare` pueden correr en el hilo de prefetch y por eso
/// reciben un contexto sin `RunState`.
pub struct ExecutionContext<'a> {
    pub batch: &'a mut Batch,
    /// Índice global del batch dentro del run (0-based).
    pub batch_index: usize,
    pub epoch: usize,
    config: &'a Config,
    state: Option<RunState<'a>>,
}

impl<'a> ExecutionContext<'a> {
    /// Contexto de preparación: sin variables ni modelos.
    pub fn preparing(batch: &'a mut Batch, config: &'a Config, batch_index: usize, epoch: usize) -> Self {
        Self { batch,
               batch_index,
               epoch,
               config,
               state: None }
    }

    pub fn executing(batch: &'a mut Batch,
                     config: &'a Config,
                     vars: &'a mut VariableStore,
                     models: &'a mut ModelRegistry,
                     batch_index: usize,
                     epoch: usize)
                     -> Self {
        Self { batch,
               batch_index,
               epoch,
               config,
               state: Some(RunState { vars, models }) }
    }

    pub fn is_preparing(&self) -> bool {
        self.state.is_none()
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn config_value(&self, path: &str) -> Option<&Value> {
        super::arg::lookup_config(self.config, path)
    }

    pub fn vars(&self) -> PipelineResult<&VariableStore> {
        self.state
            .as_ref()
            .map(|s| &*s.vars)
            .ok_or_else(not_visible)
    }

    pub fn vars_mut(&mut self) -> PipelineResult<&mut VariableStore> {
        self.state
            .as_mut()
            .map(|s| &mut *s.vars)
            .ok_or_else(not_visible)
    }

    pub fn models(&self) -> PipelineResult<&ModelRegistry> {
        self.state
            .as_ref()
            .map(|s| &*s.models)
            .ok_or_else(not_visible)
    }

    pub fn models_mut(&mut self) -> PipelineResult<&mut ModelRegistry> {
        self.state
            .as_mut()
            .map(|s| &mut *s.models)
            .ok_or_else(not_visible)
    }
}

fn not_visible() -> PipelineError {
    PipelineError::Internal("pipeline state is not visible to prepare actions".to_string())
}
