//! Modelos: contrato del colaborador, handles compartidos y registro por
//! pipeline.

mod handle;
mod registry;
mod state;

pub use handle::{Feed, Fetches, Model, ModelBinding, ModelFactory, ModelHandle};
pub use registry::ModelRegistry;
pub use state::ModelState;
