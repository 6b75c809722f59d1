use serde::{Deserialize, Serialize};

/// Estado del modelo detrás de un `ModelHandle`.
///
/// Transiciones válidas:
/// - `Uninitialized` -> `Trainable` (init) o -> `Persisted` (load)
/// - `Trainable` | `Updated` | `Persisted` -> `Updated` (train)
/// - `Trainable` | `Updated` | `Persisted` -> `Persisted` (save)
///
/// Un modelo importado en otro pipeline no cambia de estado: la binding
/// `ReadOnly` sólo admite `predict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    /// No existe modelo con ese nombre en el pipeline.
    Uninitialized,
    /// Recién creado desde config; sin pasos de entrenamiento.
    Trainable,
    /// Al menos un paso de entrenamiento desde la creación o el último save.
    Updated,
    /// Parámetros escritos a disco (o cargados desde disco).
    Persisted,
}

impl ModelState {
    pub fn after_train(self) -> Result<Self, &'static str> {
        match self {
            ModelState::Uninitialized => Err("cannot train an uninitialized model"),
            _ => Ok(ModelState::Updated),
        }
    }

    pub fn after_save(self) -> Result<Self, &'static str> {
        match self {
            ModelState::Uninitialized => Err("cannot save an uninitialized model"),
            _ => Ok(ModelState::Persisted),
        }
    }

    pub fn is_initialized(self) -> bool {
        self != ModelState::Uninitialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert_eq!(ModelState::Trainable.after_train(), Ok(ModelState::Updated));
        assert_eq!(ModelState::Updated.after_save(), Ok(ModelState::Persisted));
        assert_eq!(ModelState::Persisted.after_train(), Ok(ModelState::Updated));
        assert!(ModelState::Uninitialized.after_train().is_err());
        assert!(ModelState::Uninitialized.after_save().is_err());
    }
}
