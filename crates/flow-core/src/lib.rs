//! flow-core: templates declarativos de entrenamiento/evaluación por batches.
//!
//! Un `Template` describe una cadena de acciones con argumentos diferidos.
//! `Template::bind` lo liga a un `DataSource` y produce un `BoundPipeline`
//! con variables y modelos propios; `BoundPipeline::run` recorre los batches.
pub mod action;
pub mod constants;
pub mod data;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod models;
pub mod template;
pub mod vars;

pub use action::{ActionDefinition, ActionKind, Arg, ArgMap, ExecutionContext, ResolvedArgs, SaveTo};
pub use data::{Batch, DataSource, Datum, InMemoryDataset};
pub use engine::{BoundPipeline, CancelToken, RunOptions, RunSummary};
pub use errors::{PipelineError, PipelineResult};
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use models::{Feed, Fetches, Model, ModelBinding, ModelFactory, ModelHandle, ModelState};
pub use template::{Config, Template, TemplateBuilder};
pub use vars::{ResetPolicy, UpdateMode, VariableDecl, VariableStore};
