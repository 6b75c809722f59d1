//! Acciones genéricas: actualización de variables y callables de usuario.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{ActionDefinition, ActionKind, Arg, ArgMap, ExecutionContext, ResolvedArgs};
use crate::data::Datum;
use crate::errors::PipelineResult;
use crate::vars::UpdateMode;

/// Escribe (o acumula) un valor en una variable del pipeline.
#[derive(Debug, Clone)]
pub struct UpdateVariable {
    name: String,
    variable: String,
    mode: UpdateMode,
    args: ArgMap,
}

impl UpdateVariable {
    pub fn new(variable: impl Into<String>, value: Arg, mode: UpdateMode) -> Self {
        let variable = variable.into();
        let mut args = ArgMap::new();
        args.insert("value".to_string(), value);
        Self { name: format!("update_variable:{variable}"),
               variable,
               mode,
               args }
    }
}

impl ActionDefinition for UpdateVariable {
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
        json!({ "variable": self.variable, "mode": self.mode })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, mut args: ResolvedArgs) -> PipelineResult<()> {
        let value = args.take("value").unwrap_or_else(Datum::null);
        ctx.vars_mut()?.update(&self.variable, value, self.mode)
    }
}

/// Firma de un callable de usuario.
pub type ActionFn = dyn Fn(&mut ExecutionContext<'_>, &ResolvedArgs) -> PipelineResult<()> + Send + Sync;

/// Acción definida por un closure.
#[derive(Clone)]
pub struct FnAction {
    name: String,
    kind: ActionKind,
    args: ArgMap,
    func: Arc<ActionFn>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, kind: ActionKind, args: ArgMap, func: F) -> Self
        where F: Fn(&mut ExecutionContext<'_>, &ResolvedArgs) -> PipelineResult<()> + Send + Sync + 'static
    {
        Self { name: name.into(),
               kind,
               args,
               func: Arc::new(func) }
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction")
         .field("name", &self.name)
         .field("kind", &self.kind)
         .field("args", &self.args)
         .finish_non_exhaustive()
    }
}

impl ActionDefinition for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        (self.func)(ctx, &args)
    }
}
