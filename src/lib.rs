//! batchflow
//!
//! Capa de aplicación sobre `flow-core` / `flow-adapters`:
//! - `config`: `.env` + variables `BATCHFLOW_*`.
//! - `errors`: errores de la aplicación.
//! - `mnist`: dígitos desde ficheros IDX o sintéticos.
//! - `scenario`: entrenar, evaluar con el modelo importado, guardar y
//!   recargar.

pub mod config;
pub mod errors;
pub mod mnist;
pub mod scenario;

pub use config::AppConfig;
pub use errors::{AppError, AppResult};
pub use scenario::ScenarioReport;
