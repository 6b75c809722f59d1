//! Variables del pipeline: estado mutable con nombre y política de reinicio.
//!
//! Cada `BoundPipeline` posee su propio `VariableStore`; dos pipelines
//! creados a partir del mismo `Template` nunca comparten variables.

mod store;

pub use store::{ResetPolicy, UpdateMode, VariableDecl, VariableStore};
