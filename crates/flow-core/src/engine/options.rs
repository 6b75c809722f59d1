use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};

/// Opciones de un `run`.
///
/// `n_epochs = None` significa épocas ilimitadas; en ese caso conviene fijar
/// `n_iters` o cancelar el run desde fuera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Semilla del shuffle; sin ella cada run baraja distinto.
    pub seed: Option<u64>,
    pub n_epochs: Option<usize>,
    /// Tope de batches para todo el run, independiente de las épocas.
    pub n_iters: Option<usize>,
    /// Descarta el batch final incompleto de cada época.
    pub drop_last: bool,
    /// Batches preparados por adelantado. `0` desactiva el prefetch.
    pub prefetch: usize,
    /// Barra de progreso en stderr.
    pub bar: bool,
}

impl RunOptions {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size,
               shuffle: false,
               seed: None,
               n_epochs: Some(1),
               n_iters: None,
               drop_last: false,
               prefetch: 0,
               bar: false }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn n_epochs(mut self, n: usize) -> Self {
        self.n_epochs = Some(n);
        self
    }

    pub fn unbounded_epochs(mut self) -> Self {
        self.n_epochs = None;
        self
    }

    pub fn n_iters(mut self, n: usize) -> Self {
        self.n_iters = Some(n);
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn bar(mut self, bar: bool) -> Self {
        self.bar = bar;
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Build("batch_size must be positive".to_string()));
        }
        if self.n_epochs == Some(0) {
            return Err(PipelineError::Build("n_epochs must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_sizes() {
        assert!(RunOptions::new(0).validate().is_err());
        assert!(RunOptions::new(4).n_epochs(0).validate().is_err());
        assert!(RunOptions::new(4).unbounded_epochs().n_iters(3).validate().is_ok());
    }
}
