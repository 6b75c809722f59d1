//! Contrato del colaborador de modelos y handles compartidos.
//!
//! Todo acceso a los parámetros pasa por `ModelHandle::with_exclusive`, que
//! toma el lock del modelo durante un único paso de train/predict/save. El
//! guard se libera al salir del scope, tanto en éxito como en error.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::Value;

use super::ModelState;
use crate::data::Datum;
use crate::errors::{PipelineError, PipelineResult};

/// Entradas con nombre para un paso del modelo (p. ej. `images`, `labels`).
pub type Feed = IndexMap<String, Datum>;

/// Salidas con nombre de un paso del modelo (p. ej. `loss`, `predictions`).
pub type Fetches = IndexMap<String, Datum>;

/// Modelo entrenable. Implementado fuera del core (ver `flow-adapters`).
pub trait Model: Send + fmt::Debug {
    /// Un paso de optimización sobre el batch.
    fn train(&mut self, feed: &Feed) -> PipelineResult<Fetches>;

    /// Forward pass sin modificar parámetros.
    fn predict(&self, feed: &Feed) -> PipelineResult<Fetches>;

    /// Serializa los parámetros en `path`. El formato es cosa del modelo.
    fn save(&self, path: &Path) -> PipelineResult<()>;
}

/// Crea o recarga modelos de un tipo concreto.
pub trait ModelFactory: Send + Sync + fmt::Debug {
    fn initialize(&self, config: &Value) -> PipelineResult<Box<dyn Model>>;

    fn load(&self, path: &Path) -> PipelineResult<Box<dyn Model>>;
}

struct ModelCell {
    model: Box<dyn Model>,
    state: ModelState,
    train_steps: u64,
}

/// Referencia compartida a un modelo con nombre.
///
/// Clonar un handle no copia el modelo: todos los clones apuntan a los
/// mismos parámetros.
#[derive(Clone)]
pub struct ModelHandle {
    name: Arc<str>,
    cell: Arc<Mutex<ModelCell>>,
}

impl ModelHandle {
    fn from_model(name: &str, model: Box<dyn Model>, state: ModelState) -> Self {
        Self { name: Arc::from(name),
               cell: Arc::new(Mutex::new(ModelCell { model,
                                                     state,
                                                     train_steps: 0 })) }
    }

    /// Crea un modelo nuevo desde config (estado `Trainable`).
    pub fn initialize(name: &str, factory: &dyn ModelFactory, config: &Value) -> PipelineResult<Self> {
        let model = factory.initialize(config)?;
        log::debug!("model:init name={name}");
        Ok(Self::from_model(name, model, ModelState::Trainable))
    }

    /// Recarga un modelo guardado (estado `Persisted`).
    pub fn load(name: &str, factory: &dyn ModelFactory, path: &Path) -> PipelineResult<Self> {
        let model = factory.load(path)?;
        log::debug!("model:load name={name} path={}", path.display());
        Ok(Self::from_model(name, model, ModelState::Persisted))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineResult<ModelState> {
        self.with_exclusive(|cell| Ok(cell.state))
    }

    pub fn train_steps(&self) -> PipelineResult<u64> {
        self.with_exclusive(|cell| Ok(cell.train_steps))
    }

    /// `true` si ambos handles apuntan al mismo modelo.
    pub fn ptr_eq(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Binding de sólo lectura para importar en otro pipeline.
    pub fn read_only(&self) -> ModelBinding {
        ModelBinding::ReadOnly(self.clone())
    }

    pub fn predict(&self, feed: &Feed) -> PipelineResult<Fetches> {
        self.with_exclusive(|cell| cell.model.predict(feed))
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        self.save_inner(path, true)
    }

    // Sólo accesible vía `ModelBinding::Trainable`.
    fn train(&self, feed: &Feed) -> PipelineResult<Fetches> {
        self.with_exclusive(|cell| {
                let next = cell.state
                               .after_train()
                               .map_err(|reason| PipelineError::model_state(self.name(), reason))?;
                let fetches = cell.model.train(feed)?;
                cell.state = next;
                cell.train_steps += 1;
                Ok(fetches)
            })
    }

    fn save_inner(&self, path: &Path, track_state: bool) -> PipelineResult<()> {
        self.with_exclusive(|cell| {
                let next = cell.state
                               .after_save()
                               .map_err(|reason| PipelineError::model_state(self.name(), reason))?;
                cell.model.save(path)?;
                if track_state {
                    cell.state = next;
                }
                log::info!("model:save name={} path={}", self.name, path.display());
                Ok(())
            })
    }

    /// Sección crítica sobre los parámetros del modelo.
    fn with_exclusive<R>(&self, f: impl FnOnce(&mut ModelCell) -> PipelineResult<R>) -> PipelineResult<R> {
        let mut guard = self.cell
                            .lock()
                            .map_err(|_| PipelineError::model_state(self.name(), "model lock poisoned by a panicked step"))?;
        f(&mut *guard)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Modelo tal como lo ve un pipeline: propio (entrenable) o importado.
#[derive(Debug, Clone)]
pub enum ModelBinding {
    Trainable(ModelHandle),
    ReadOnly(ModelHandle),
}

impl ModelBinding {
    pub fn handle(&self) -> &ModelHandle {
        match self {
            ModelBinding::Trainable(h) | ModelBinding::ReadOnly(h) => h,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ModelBinding::ReadOnly(_))
    }

    pub fn train(&self, feed: &Feed) -> PipelineResult<Fetches> {
        match self {
            ModelBinding::Trainable(h) => h.train(feed),
            ModelBinding::ReadOnly(h) => {
                Err(PipelineError::model_state(h.name(), "model is imported read-only and cannot be trained"))
            }
        }
    }

    pub fn predict(&self, feed: &Feed) -> PipelineResult<Fetches> {
        self.handle().predict(feed)
    }

    /// Guardar un modelo importado escribe el artifact pero no altera el
    /// estado del modelo en el pipeline dueño.
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        match self {
            ModelBinding::Trainable(h) => h.save_inner(path, true),
            ModelBinding::ReadOnly(h) => h.save_inner(path, false),
        }
    }
}
