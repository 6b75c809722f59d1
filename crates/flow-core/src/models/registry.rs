use indexmap::IndexMap;

use super::{ModelBinding, ModelHandle, ModelState};
use crate::errors::{PipelineError, PipelineResult};

/// Modelos visibles para un pipeline, por nombre.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    bindings: IndexMap<String, ModelBinding>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ModelBinding> {
        self.bindings.get(name)
    }

    /// Binding obligatoria; su ausencia es un modelo sin inicializar.
    pub fn require(&self, name: &str) -> PipelineResult<&ModelBinding> {
        self.get(name)
            .ok_or_else(|| PipelineError::model_state(name, "model is not initialized in this pipeline"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn state_of(&self, name: &str) -> PipelineResult<ModelState> {
        match self.get(name) {
            Some(binding) => binding.handle().state(),
            None => Ok(ModelState::Uninitialized),
        }
    }

    /// Registra un modelo propio. Falla si el nombre ya está ocupado por un
    /// modelo importado.
    pub fn insert_owned(&mut self, handle: ModelHandle) -> PipelineResult<()> {
        if let Some(ModelBinding::ReadOnly(_)) = self.get(handle.name()) {
            return Err(PipelineError::model_state(handle.name(), "name is already bound to an imported model"));
        }
        self.bindings
            .insert(handle.name().to_string(), ModelBinding::Trainable(handle));
        Ok(())
    }

    /// Importa un modelo por referencia con binding de sólo lectura. Un
    /// modelo propio con el mismo nombre no puede reemplazarse.
    pub fn import(&mut self, name: &str, handle: ModelHandle) -> PipelineResult<()> {
        if let Some(ModelBinding::Trainable(_)) = self.get(name) {
            return Err(PipelineError::model_state(name, "name is already bound to a model owned by this pipeline"));
        }
        self.bindings.insert(name.to_string(), ModelBinding::ReadOnly(handle));
        Ok(())
    }
}
