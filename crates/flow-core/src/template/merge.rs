//! Fusión de configuración JSON.
//!
//! Merge shallow: las claves del override reemplazan a las del base. Los
//! objetos anidados se sustituyen completos, no se mezclan; para cambiar una
//! sola clave anidada hay que reenviar el objeto entero.

use serde_json::Value;

use super::Config;
use crate::errors::{PipelineError, PipelineResult};

/// Aplica un objeto JSON de overrides sobre la config, conservando el orden
/// de las claves existentes.
pub fn merge_into_config(config: &mut Config, overrides: &Value) -> PipelineResult<()> {
    let Value::Object(map) = overrides else {
        return Err(PipelineError::Build(format!("config overrides must be a JSON object, got {overrides}")));
    };
    for (k, v) in map.iter() {
        config.insert(k.clone(), v.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_overrides_require_object() {
        let mut config = Config::new();
        config.insert("a".into(), json!(1));
        merge_into_config(&mut config, &json!({"b": 2, "a": 3})).expect("merge");
        assert_eq!(config.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(config["a"], json!(3));
        assert!(merge_into_config(&mut config, &json!([1])).is_err());
    }
}
