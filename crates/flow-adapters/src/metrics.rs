use flow_core::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, ArrayD};

/// Índice de la clase con mayor probabilidad por fila, como `f32` para
/// compararlo directamente con `labels`.
pub fn argmax_rows(probs: &Array2<f32>) -> Array1<f32> {
    probs.rows()
         .into_iter()
         .map(|row| {
             row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                .0 as f32
         })
         .collect()
}

/// Fracción de predicciones iguales a la etiqueta.
pub fn accuracy(predictions: &ArrayD<f32>, labels: &ArrayD<f32>) -> PipelineResult<f64> {
    if predictions.len() != labels.len() {
        return Err(PipelineError::Data(format!("{} predictions for {} labels", predictions.len(), labels.len())));
    }
    if labels.is_empty() {
        return Ok(0.0);
    }
    let hits = predictions.iter()
                          .zip(labels.iter())
                          .filter(|(p, y)| (*p - *y).abs() < 0.5)
                          .count();
    Ok(hits as f64 / labels.len() as f64)
}
