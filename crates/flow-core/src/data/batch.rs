//! `Batch`: porción de un `DataSource` sobre la que se ejecutan las acciones.
//!
//! Los componentes son arrays cuyo primer eje recorre los ítems del batch.
//! Un batch de imágenes expone como mínimo `images` y `labels`.

use indexmap::IndexMap;
use ndarray::{ArrayD, Axis};

use crate::constants::{IMAGES, LABELS, MASKS};
use crate::errors::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Posiciones de los ítems dentro del source original.
    pub indices: Vec<usize>,
    components: IndexMap<String, ArrayD<f32>>,
}

impl Batch {
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices,
               components: IndexMap::new() }
    }

    pub fn with_component(mut self, name: impl Into<String>, data: ArrayD<f32>) -> Self {
        self.components.insert(name.into(), data);
        self
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn component(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.components.get(name)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.components.get_mut(name)
    }

    /// Componente obligatorio; su ausencia es una referencia no resuelta.
    pub fn require(&self, name: &str) -> PipelineResult<&ArrayD<f32>> {
        self.component(name)
            .ok_or_else(|| PipelineError::unresolved(format!("batch component '{name}'")))
    }

    /// Reemplaza (o crea) un componente. El primer eje debe coincidir con el
    /// número de ítems del batch.
    pub fn set_component(&mut self, name: impl Into<String>, data: ArrayD<f32>) -> PipelineResult<()> {
        let name = name.into();
        let rows = data.shape().first().copied().unwrap_or(0);
        if rows != self.len() {
            return Err(PipelineError::Data(format!("component '{name}' has {rows} rows, batch has {} items",
                                                   self.len())));
        }
        self.components.insert(name, data);
        Ok(())
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn images(&self) -> Option<&ArrayD<f32>> {
        self.component(IMAGES)
    }

    pub fn labels(&self) -> Option<&ArrayD<f32>> {
        self.component(LABELS)
    }

    pub fn masks(&self) -> Option<&ArrayD<f32>> {
        self.component(MASKS)
    }

    /// Ítem `pos` de un componente (vista sobre el primer eje).
    pub fn item(&self, name: &str, pos: usize) -> PipelineResult<ndarray::ArrayViewD<'_, f32>> {
        let data = self.require(name)?;
        if pos >= self.len() {
            return Err(PipelineError::Data(format!("item {pos} out of range for batch of {}", self.len())));
        }
        Ok(data.index_axis(Axis(0), pos))
    }
}
