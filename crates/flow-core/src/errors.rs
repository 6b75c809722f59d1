//! Errores del motor de pipelines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum PipelineError {
    /// Cadena de acciones u opciones de ejecución mal formadas.
    #[error("build error: {0}")]
    Build(String),
    /// Una referencia diferida no pudo resolverse contra el contexto actual.
    #[error("unresolved reference: {reference}")]
    UnresolvedReference { reference: String },
    /// Operación inválida para el estado actual del modelo.
    #[error("model '{model}': {reason}")]
    ModelState { model: String, reason: String },
    /// Actualización inválida de una variable del pipeline.
    #[error("variable '{name}': {reason}")]
    Variable { name: String, reason: String },
    #[error("data error: {0}")]
    Data(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Error de una acción concreta sobre un batch; aborta el run completo.
    #[error("action '{action}' failed on batch {batch_index}: {source}")]
    ActionFailed {
        action: String,
        batch_index: usize,
        source: Box<PipelineError>,
    },
    #[error("internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn unresolved(reference: impl Into<String>) -> Self {
        Self::UnresolvedReference { reference: reference.into() }
    }

    pub fn model_state(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelState { model: model.into(),
                           reason: reason.into() }
    }

    pub fn variable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Variable { name: name.into(),
                         reason: reason.into() }
    }

    /// Envuelve el error con la acción y el batch donde ocurrió.
    pub fn in_action(self, action: &str, batch_index: usize) -> Self {
        Self::ActionFailed { action: action.to_string(),
                             batch_index,
                             source: Box::new(self) }
    }

    /// Error raíz, atravesando los envoltorios `ActionFailed`.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::ActionFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
