//! Templates: definición declarativa e inmutable de un pipeline.

pub mod builder;
pub mod definition;
pub mod merge;

use indexmap::IndexMap;
use serde_json::Value;

pub use builder::TemplateBuilder;
pub use definition::Template;
pub use merge::merge_into_config;

/// Config de un template: claves de primer nivel en orden de declaración.
pub type Config = IndexMap<String, Value>;
