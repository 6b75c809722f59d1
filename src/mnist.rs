//! Fuentes de dígitos para el escenario de entrenamiento.
//!
//! - `load_mnist`: lee los cuatro ficheros IDX de un directorio local con el
//!   crate `mnist` (no descarga nada).
//! - `synthetic_digits`: dígitos sintéticos 28x28 para ejecutar sin datos.
//!
//! Ambos devuelven `InMemoryDataset` con `images` `[n, 28, 28]` en píxeles
//! crudos (0..=255) y `labels` `[n]`; normalizar es trabajo del template.
use std::path::Path;

use flow_core::InMemoryDataset;
use mnist::MnistBuilder;
use ndarray::{Array1, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::{AppError, AppResult};

pub const SIDE: usize = 28;
pub const NUM_CLASSES: usize = 10;

const TRAIN_MAX: usize = 60_000;
const TEST_MAX: usize = 10_000;

const FILES: [&str; 4] = ["train-images-idx3-ubyte",
                          "train-labels-idx1-ubyte",
                          "t10k-images-idx3-ubyte",
                          "t10k-labels-idx1-ubyte"];

/// Carga `(train, test)` desde `dir`, recortados a `train_len` / `test_len`.
pub fn load_mnist(dir: &Path, train_len: usize, test_len: usize) -> AppResult<(InMemoryDataset, InMemoryDataset)> {
    if train_len == 0 || train_len > TRAIN_MAX || test_len == 0 || test_len > TEST_MAX {
        return Err(AppError::Dataset(format!("tamaños fuera de rango: train={train_len} test={test_len}")));
    }
    if let Some(missing) = FILES.iter().find(|f| !dir.join(f).is_file()) {
        return Err(AppError::Dataset(format!("falta {missing} en {}", dir.display())));
    }
    let base = dir.to_str()
                  .ok_or_else(|| AppError::Dataset(format!("ruta no UTF-8: {}", dir.display())))?;
    log::info!("mnist:load dir={base} train={train_len} test={test_len}");
    let raw = MnistBuilder::new().base_path(base)
                                 .label_format_digit()
                                 .training_set_length(train_len as u32)
                                 .validation_set_length(0)
                                 .test_set_length(test_len as u32)
                                 .finalize();
    let train = to_dataset(&raw.trn_img, &raw.trn_lbl)?;
    let test = to_dataset(&raw.tst_img, &raw.tst_lbl)?;
    Ok((train, test))
}

fn to_dataset(pixels: &[u8], labels: &[u8]) -> AppResult<InMemoryDataset> {
    let n = labels.len();
    let images = Array3::from_shape_vec((n, SIDE, SIDE), pixels.iter().map(|&p| f32::from(p)).collect())
        .map_err(|e| AppError::Dataset(format!("imágenes IDX inconsistentes: {e}")))?;
    let labels = Array1::from_iter(labels.iter().map(|&l| f32::from(l)));
    Ok(InMemoryDataset::from_images(images.into_dyn(), labels.into_dyn())?)
}

/// `n` dígitos sintéticos: la clase `k` enciende una franja horizontal en
/// las filas `2k+4..2k+6`, sobre ruido de fondo.
pub fn synthetic_digits(n: usize, seed: u64) -> AppResult<InMemoryDataset> {
    if n == 0 {
        return Err(AppError::Dataset("synthetic_digits necesita al menos un ítem".into()));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let labels: Vec<usize> = (0..n).map(|_| rng.gen_range(0..NUM_CLASSES)).collect();
    let mut images = Array3::<f32>::zeros((n, SIDE, SIDE));
    for (mut image, &class) in images.outer_iter_mut().zip(labels.iter()) {
        let stripe = 2 * class + 4..2 * class + 6;
        for ((r, c), px) in image.indexed_iter_mut() {
            *px = if stripe.contains(&r) && (4..SIDE - 4).contains(&c) {
                rng.gen_range(200.0..=255.0)
            } else {
                rng.gen_range(0.0..40.0)
            };
        }
    }
    let labels = Array1::from_iter(labels.into_iter().map(|l| l as f32));
    log::debug!("mnist:synthetic items={n} seed={seed}");
    Ok(InMemoryDataset::from_images(images.into_dyn(), labels.into_dyn())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::DataSource;

    #[test]
    fn synthetic_digits_have_mnist_shape() {
        let ds = synthetic_digits(12, 7).expect("digits");
        assert_eq!(ds.len(), 12);
        let batch = ds.fetch(&[0, 1, 2]).expect("fetch");
        assert_eq!(batch.images().map(|i| i.shape().to_vec()), Some(vec![3, SIDE, SIDE]));
        assert!(batch.labels().expect("labels").iter().all(|&y| (0.0..10.0).contains(&y)));
    }

    #[test]
    fn synthetic_digits_are_reproducible() {
        let a = synthetic_digits(5, 3).expect("a").fetch(&[4]).expect("fetch a");
        let b = synthetic_digits(5, 3).expect("b").fetch(&[4]).expect("fetch b");
        assert_eq!(a.images(), b.images());
    }

    #[test]
    fn missing_idx_files_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_mnist(dir.path(), 100, 10).unwrap_err();
        assert!(err.to_string().contains("train-images-idx3-ubyte"));
    }
}
