//! flow-adapters: colaboradores concretos para `flow-core`.
//!
//! Este crate provee:
//! - Acciones de preparación para batches de imágenes (`normalize`,
//!   `reshape`, `resize`, transformaciones por ítem y `dump`), expuestas como métodos
//!   del builder vía `ImagesTemplateExt`.
//! - `SoftmaxClassifier`, un modelo de referencia que implementa los traits
//!   `Model` / `ModelFactory` del core, con persistencia JSON verificada por
//!   checksum sha256.
//!
//! El core no sabe nada de imágenes ni de clasificadores: sólo ve acciones
//! con argumentos diferidos y handles de modelo opacos.

pub mod images;
pub mod metrics;
pub mod softmax;

pub use images::{ApplyTransform, ApplyTransformAll, Dump, ImagesTemplateExt, Normalize, Reshape, Resize};
pub use metrics::{accuracy, argmax_rows};
pub use softmax::{SoftmaxClassifier, SoftmaxClassifierFactory, SoftmaxConfig};
