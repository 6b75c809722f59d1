//! Acciones del template: argumentos diferidos, contrato y acciones base.

pub mod arg;
pub mod builtin;
pub mod context;
pub mod definition;
pub mod model_ops;

pub use arg::{lookup_config, resolve, resolve_args, Arg, ArgMap, ResolvedArgs};
pub use builtin::{ActionFn, FnAction, UpdateVariable};
pub use context::ExecutionContext;
pub use definition::{ActionDefinition, ActionKind};
pub use model_ops::{ImportModel, InitModel, ModelStep, SaveModel, SaveTo};
