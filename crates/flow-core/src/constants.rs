//! Constantes del motor de pipelines.
//!
//! `ENGINE_VERSION` forma parte del input del `definition_hash` de cada
//! `Template`: un cambio de versión del motor produce fingerprints distintos
//! aunque las acciones y la config no cambien.

/// Versión lógica del motor. Mantener estable mientras no haya cambios
/// incompatibles en la semántica de ejecución.
pub const ENGINE_VERSION: &str = "B1.0";

/// Nombre del componente de imágenes dentro de un `Batch`.
pub const IMAGES: &str = "images";

/// Nombre del componente de etiquetas dentro de un `Batch`.
pub const LABELS: &str = "labels";

/// Nombre del componente de máscaras dentro de un `Batch`.
pub const MASKS: &str = "masks";
