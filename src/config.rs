//! Configuración central de la aplicación.
//! Carga `.env` una sola vez (`DOTENV`) y lee variables `BATCHFLOW_*` con
//! valores por defecto razonables para el escenario de entrenamiento.
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use flow_core::RunOptions;
use once_cell::sync::Lazy;

use crate::errors::{AppError, AppResult};

/// Ruta del `.env` cargado, si había uno. Evaluada una sola vez.
static DOTENV: Lazy<Option<PathBuf>> = Lazy::new(|| dotenvy::dotenv().ok());

/// Configuración del escenario train → eval → save → reload.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directorio con los ficheros IDX de MNIST. Sin él se usan dígitos
    /// sintéticos.
    pub data_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub epochs: usize,
    /// Profundidad de prefetch (0 = serial).
    pub prefetch: usize,
    pub shuffle: bool,
    /// Barra de progreso por run.
    pub bar: bool,
    pub model_path: PathBuf,
    pub learning_rate: f32,
    pub seed: u64,
    /// Ítems generados cuando no hay `data_dir`.
    pub synthetic_items: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { data_dir: None,
               batch_size: 64,
               epochs: 3,
               prefetch: 2,
               shuffle: true,
               bar: false,
               model_path: PathBuf::from("models/conv_nn.json"),
               learning_rate: 0.5,
               seed: 42,
               synthetic_items: 2000 }
    }
}

impl AppConfig {
    /// Lee la configuración del entorno (tras cargar `.env`).
    pub fn load() -> AppResult<Self> {
        if let Some(path) = DOTENV.as_ref() {
            log::debug!("config:dotenv path={}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración desde una función de búsqueda arbitraria.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = Self::default();
        let cfg = Self { data_dir: lookup("BATCHFLOW_DATA_DIR").filter(|v| !v.trim().is_empty())
                                                              .map(PathBuf::from),
                         batch_size: parse_or(&lookup, "BATCHFLOW_BATCH_SIZE", defaults.batch_size, "un entero")?,
                         epochs: parse_or(&lookup, "BATCHFLOW_EPOCHS", defaults.epochs, "un entero")?,
                         prefetch: parse_or(&lookup, "BATCHFLOW_PREFETCH", defaults.prefetch, "un entero")?,
                         shuffle: flag_or(&lookup, "BATCHFLOW_SHUFFLE", defaults.shuffle)?,
                         bar: flag_or(&lookup, "BATCHFLOW_BAR", defaults.bar)?,
                         model_path: lookup("BATCHFLOW_MODEL_PATH").map(PathBuf::from)
                                                                   .unwrap_or(defaults.model_path),
                         learning_rate: parse_or(&lookup,
                                                 "BATCHFLOW_LEARNING_RATE",
                                                 defaults.learning_rate,
                                                 "un número")?,
                         seed: parse_or(&lookup, "BATCHFLOW_SEED", defaults.seed, "un entero")?,
                         synthetic_items: parse_or(&lookup,
                                                   "BATCHFLOW_SYNTHETIC_ITEMS",
                                                   defaults.synthetic_items,
                                                   "un entero")? };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(AppError::Config("BATCHFLOW_BATCH_SIZE debe ser mayor que 0".into()));
        }
        if self.epochs == 0 {
            return Err(AppError::Config("BATCHFLOW_EPOCHS debe ser mayor que 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(AppError::Config("BATCHFLOW_LEARNING_RATE debe ser positivo".into()));
        }
        Ok(())
    }

    /// Opciones del run de entrenamiento.
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new(self.batch_size).shuffle(self.shuffle)
                                        .seed(self.seed)
                                        .n_epochs(self.epochs)
                                        .prefetch(self.prefetch)
                                        .bar(self.bar)
    }

    /// Opciones de evaluación: una época en orden.
    pub fn eval_options(&self) -> RunOptions {
        RunOptions::new(self.batch_size).prefetch(self.prefetch).bar(self.bar)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T, expected: &str) -> AppResult<T>
    where F: Fn(&str) -> Option<String>,
          T: FromStr
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim()
                        .parse()
                        .map_err(|_| AppError::invalid_env(key, &raw, expected)),
    }
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> AppResult<bool>
    where F: Fn(&str) -> Option<String>
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AppError::invalid_env(key, &v, "un booleano")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = AppConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.run_options().batch_size, 64);
    }

    #[test]
    fn env_overrides_and_run_options() {
        let cfg = AppConfig::from_lookup(lookup(&[("BATCHFLOW_BATCH_SIZE", "16"),
                                                  ("BATCHFLOW_EPOCHS", "2"),
                                                  ("BATCHFLOW_PREFETCH", "0"),
                                                  ("BATCHFLOW_SHUFFLE", "off"),
                                                  ("BATCHFLOW_DATA_DIR", "/data/mnist")])).expect("config");
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/data/mnist")));
        let opts = cfg.run_options();
        assert_eq!((opts.batch_size, opts.n_epochs, opts.prefetch, opts.shuffle), (16, Some(2), 0, false));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(AppConfig::from_lookup(lookup(&[("BATCHFLOW_BATCH_SIZE", "many")])),
                         Err(AppError::Config(_))));
        assert!(matches!(AppConfig::from_lookup(lookup(&[("BATCHFLOW_BATCH_SIZE", "0")])),
                         Err(AppError::Config(_))));
        assert!(matches!(AppConfig::from_lookup(lookup(&[("BATCHFLOW_BAR", "maybe")])),
                         Err(AppError::Config(_))));
    }
}
