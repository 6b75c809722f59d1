//! Datos que recorren el pipeline: valores (`Datum`), batches y fuentes.

mod batch;
mod datum;
mod source;

pub use batch::Batch;
pub use datum::Datum;
pub use source::{DataSource, InMemoryDataset};
