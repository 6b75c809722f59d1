//! Binder y executor: `BoundPipeline`, plan de batches y opciones de run.

pub mod cancel;
pub mod executor;
pub mod options;
pub mod pipeline;
pub mod plan;

pub use cancel::CancelToken;
pub use executor::RunSummary;
pub use options::RunOptions;
pub use pipeline::BoundPipeline;
pub use plan::{BatchPlan, PlannedBatch};
