//! Contrato de fuentes de datos y dataset en memoria.
//!
//! Un `DataSource` sólo sabe cuántos ítems tiene y cómo materializar un
//! `Batch` a partir de posiciones. El particionado en batches, el shuffle y
//! las épocas son responsabilidad del executor (ver `engine::plan`).

use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::Batch;
use crate::errors::{PipelineError, PipelineResult};

/// Fuente de datos iterable por posiciones `0..len()`.
///
/// `fetch` puede invocarse desde un hilo de prefetch, de ahí `Send + Sync`.
pub trait DataSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializa el batch con los ítems en las posiciones dadas (en orden).
    fn fetch(&self, positions: &[usize]) -> PipelineResult<Batch>;
}

impl<D: DataSource + ?Sized> DataSource for Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn fetch(&self, positions: &[usize]) -> PipelineResult<Batch> {
        (**self).fetch(positions)
    }
}

/// Dataset en memoria: componentes compartidos (`Arc`) más una vista de filas.
///
/// `split` y `subset` crean nuevas vistas sin copiar los arrays, de modo que
/// train/test comparten almacenamiento.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    storage: Arc<IndexMap<String, ArrayD<f32>>>,
    rows: Arc<Vec<usize>>,
}

impl InMemoryDataset {
    /// Crea el dataset validando que todos los componentes tengan el mismo
    /// número de ítems en el primer eje.
    pub fn new(components: IndexMap<String, ArrayD<f32>>) -> PipelineResult<Self> {
        let mut expected: Option<usize> = None;
        for (name, data) in components.iter() {
            let Some(&rows) = data.shape().first() else {
                return Err(PipelineError::Data(format!("component '{name}' is a scalar")));
            };
            match expected {
                None => expected = Some(rows),
                Some(n) if n != rows => {
                    return Err(PipelineError::Data(format!("component '{name}' has {rows} items, expected {n}")));
                }
                Some(_) => {}
            }
        }
        let n = expected.unwrap_or(0);
        Ok(Self { storage: Arc::new(components),
                  rows: Arc::new((0..n).collect()) })
    }

    /// Atajo para el caso típico imágenes + etiquetas.
    pub fn from_images(images: ArrayD<f32>, labels: ArrayD<f32>) -> PipelineResult<Self> {
        let mut components = IndexMap::new();
        components.insert(crate::constants::IMAGES.to_string(), images);
        components.insert(crate::constants::LABELS.to_string(), labels);
        Self::new(components)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.storage.keys().map(String::as_str)
    }

    /// Divide la vista en `(train, test)`. Con `seed` las filas se barajan
    /// antes de cortar; sin él se conserva el orden actual.
    pub fn split(&self, train_fraction: f64, seed: Option<u64>) -> PipelineResult<(Self, Self)> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(PipelineError::Data(format!("train fraction {train_fraction} is outside [0, 1]")));
        }
        let mut rows: Vec<usize> = self.rows.as_ref().clone();
        if let Some(seed) = seed {
            rows.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        let cut = (rows.len() as f64 * train_fraction).round() as usize;
        let test = rows.split_off(cut);
        Ok((self.with_rows(rows), self.with_rows(test)))
    }

    /// Vista con las posiciones indicadas (relativas a esta vista).
    pub fn subset(&self, positions: &[usize]) -> PipelineResult<Self> {
        Ok(self.with_rows(self.resolve_rows(positions)?))
    }

    fn with_rows(&self, rows: Vec<usize>) -> Self {
        Self { storage: Arc::clone(&self.storage),
               rows: Arc::new(rows) }
    }

    fn resolve_rows(&self, positions: &[usize]) -> PipelineResult<Vec<usize>> {
        positions.iter()
                 .map(|&p| {
                     self.rows
                         .get(p)
                         .copied()
                         .ok_or_else(|| PipelineError::Data(format!("position {p} out of range ({} items)", self.len())))
                 })
                 .collect()
    }
}

impl DataSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn fetch(&self, positions: &[usize]) -> PipelineResult<Batch> {
        let rows = self.resolve_rows(positions)?;
        let mut batch = Batch::new(rows.clone());
        for (name, data) in self.storage.iter() {
            batch.set_component(name.clone(), data.select(Axis(0), &rows))?;
        }
        Ok(batch)
    }
}
