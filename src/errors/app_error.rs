use flow_core::PipelineError;
use thiserror::Error;

/// Errores de la aplicación (binario y escenario de entrenamiento).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("Error en dataset: {0}")]
    Dataset(String),
    #[error("Error de pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Error en IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Error de variable de entorno con valor no interpretable.
    pub fn invalid_env(key: &str, value: &str, expected: &str) -> Self {
        Self::Config(format!("{key}={value:?} no es {expected}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_variant_format() {
        let err = AppError::invalid_env("BATCHFLOW_BATCH_SIZE", "x", "un entero");
        assert_eq!(err.to_string(), "Error de configuración: BATCHFLOW_BATCH_SIZE=\"x\" no es un entero");
    }

    #[test]
    fn pipeline_errors_convert() {
        let err: AppError = PipelineError::Build("vacío".into()).into();
        assert_eq!(err.to_string(), "Error de pipeline: build error: vacío");
    }

    #[test]
    fn io_variant_from() {
        let err: AppError = std::io::Error::other("falló IO").into();
        assert_eq!(err.to_string(), "Error en IO: falló IO");
    }
}
