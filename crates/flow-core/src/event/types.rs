//! Tipos de evento de un run y estructura `RunEvent`.
//!
//! Cada `BoundPipeline::run` emite eventos a un `EventStore` append-only bajo
//! un `run_id` propio. `RunStarted` es siempre el primer evento de un run y
//! exactamente uno de `RunCompleted`, `RunCancelled` o `BatchFailed` el último.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEventKind {
    /// Fija la definición ejecutada y el tamaño del dataset.
    RunStarted {
        definition_hash: String,
        items: usize,
        batch_size: usize,
        planned_batches: Option<usize>,
    },
    /// Todas las acciones del template terminaron sobre el batch.
    BatchFinished {
        batch_index: usize,
        epoch: usize,
        items: usize,
    },
    /// Una acción falló; el run se detiene aquí.
    BatchFailed { batch_index: usize, error: PipelineError },
    /// Cancelación observada entre batches.
    RunCancelled { batches: usize },
    /// El plan de batches se agotó.
    RunCompleted { batches: usize, items: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // asignado por el store (orden append)
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>,
}
