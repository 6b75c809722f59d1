use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ArgMap, ExecutionContext, ResolvedArgs};
use crate::errors::PipelineResult;

/// Fase en la que corre una acción.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Sólo transforma el batch; no ve variables ni modelos. Las acciones
    /// `Prepare` al inicio del template pueden adelantarse en el prefetch.
    Prepare,
    /// Ve el estado completo del pipeline. Siempre en orden, en el hilo del
    /// executor.
    Execute,
}

/// Trait que define una acción del template.
///
/// Las implementaciones guardan sus argumentos sin resolver (`args`) y reciben
/// los valores ya resueltos en `run`.
pub trait ActionDefinition: Send + Sync + fmt::Debug {
    /// Nombre estable, usado en errores y eventos.
    fn name(&self) -> &str;

    fn kind(&self) -> ActionKind;

    /// Argumentos diferidos; se resuelven justo antes de cada `run`.
    fn args(&self) -> &ArgMap;

    /// Parámetros fijos no expresados como `Arg` (nombre del modelo, fetches...).
    fn base_params(&self) -> Value {
        Value::Null
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()>;

    /// Descripción determinista, parte del hash de definición del template.
    fn describe(&self) -> Value {
        let args: serde_json::Map<String, Value> = self.args()
                                                      .iter()
                                                      .map(|(k, a)| (k.clone(), a.describe()))
                                                      .collect();
        json!({
            "name": self.name(),
            "kind": self.kind(),
            "args": args,
            "params": self.base_params(),
        })
    }
}
