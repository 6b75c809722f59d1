//! Argumentos diferidos y su resolución.
//!
//! Un `Arg` se captura al construir el template y sólo se resuelve al
//! ejecutar la acción, contra el `ExecutionContext` del batch en curso.
//! `resolve` es el único punto donde se interpreta cada variante.

use indexmap::IndexMap;
use serde_json::{json, Value};

use super::ExecutionContext;
use crate::data::Datum;
use crate::errors::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Valor fijo.
    Literal(Datum),
    /// Clave de config; admite rutas `a/b/c` dentro de objetos anidados.
    ConfigRef(String),
    /// Componente del batch actual (`images`, `labels`, ... o `indices`).
    BatchRef(String),
    /// Variable del pipeline.
    VarRef(String),
}

/// Argumentos de una acción, por nombre y en orden de declaración.
pub type ArgMap = IndexMap<String, Arg>;

impl Arg {
    pub fn literal(value: impl Into<Datum>) -> Self {
        Arg::Literal(value.into())
    }

    pub fn config(name: impl Into<String>) -> Self {
        Arg::ConfigRef(name.into())
    }

    pub fn batch(field: impl Into<String>) -> Self {
        Arg::BatchRef(field.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Arg::VarRef(name.into())
    }

    pub fn is_deferred(&self) -> bool {
        !matches!(self, Arg::Literal(_))
    }

    pub fn describe(&self) -> Value {
        match self {
            Arg::Literal(d) => json!({ "literal": d.describe() }),
            Arg::ConfigRef(name) => json!({ "config": name }),
            Arg::BatchRef(field) => json!({ "batch": field }),
            Arg::VarRef(name) => json!({ "var": name }),
        }
    }
}

impl From<Datum> for Arg {
    fn from(value: Datum) -> Self {
        Arg::Literal(value)
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Literal(Datum::Json(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Literal(value.into())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Literal(value.into())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Literal(value.into())
    }
}

/// Busca una clave de config. Primero la clave literal; si no existe y
/// contiene `/`, recorre objetos anidados.
pub fn lookup_config<'a>(config: &'a IndexMap<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = config.get(path) {
        return Some(v);
    }
    let mut parts = path.split('/');
    let head = config.get(parts.next()?)?;
    parts.try_fold(head, |node, key| node.get(key))
}

/// Resuelve un argumento contra el contexto de ejecución.
pub fn resolve(arg: &Arg, ctx: &ExecutionContext<'_>) -> PipelineResult<Datum> {
    match arg {
        Arg::Literal(d) => Ok(d.clone()),
        Arg::ConfigRef(path) => lookup_config(ctx.config(), path).cloned()
                                                                .map(Datum::Json)
                                                                .ok_or_else(|| PipelineError::unresolved(format!("config '{path}'"))),
        Arg::BatchRef(field) => match ctx.batch.component(field) {
            Some(data) => Ok(Datum::Tensor(data.clone())),
            None if field == "indices" => Ok(Datum::Json(json!(ctx.batch.indices))),
            None => Err(PipelineError::unresolved(format!("batch component '{field}'"))),
        },
        Arg::VarRef(name) => {
            if ctx.is_preparing() {
                return Err(PipelineError::unresolved(format!("variable '{name}' (variables are not visible while preparing a batch)")));
            }
            ctx.vars()?.require(name).cloned()
        }
    }
}

/// Resuelve todos los argumentos de una acción, en orden.
pub fn resolve_args(args: &ArgMap, ctx: &ExecutionContext<'_>) -> PipelineResult<ResolvedArgs> {
    let mut values = IndexMap::with_capacity(args.len());
    for (name, arg) in args.iter() {
        values.insert(name.clone(), resolve(arg, ctx)?);
    }
    Ok(ResolvedArgs { values })
}

/// Argumentos ya resueltos que recibe `ActionDefinition::run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedArgs {
    values: IndexMap<String, Datum>,
}

impl ResolvedArgs {
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.values.get(name)
    }

    pub fn require(&self, name: &str) -> PipelineResult<&Datum> {
        self.get(name)
            .ok_or_else(|| PipelineError::Build(format!("missing argument '{name}'")))
    }

    pub fn f64(&self, name: &str) -> PipelineResult<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| PipelineError::Data(format!("argument '{name}' is not a number")))
    }

    pub fn str(&self, name: &str) -> PipelineResult<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| PipelineError::Data(format!("argument '{name}' is not a string")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Datum)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn take(&mut self, name: &str) -> Option<Datum> {
        self.values.shift_remove(name)
    }

    pub fn into_inner(self) -> IndexMap<String, Datum> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::models::ModelRegistry;
    use crate::vars::{VariableDecl, VariableStore};

    fn config() -> IndexMap<String, Value> {
        let mut c = IndexMap::new();
        c.insert("model_config".to_string(), json!({"optimizer": {"lr": 0.1}}));
        c.insert("a/b".to_string(), json!("literal key"));
        c
    }

    #[test]
    fn config_paths_walk_nested_objects() {
        let c = config();
        assert_eq!(lookup_config(&c, "model_config/optimizer/lr"), Some(&json!(0.1)));
        assert_eq!(lookup_config(&c, "a/b"), Some(&json!("literal key")));
        assert_eq!(lookup_config(&c, "model_config/missing"), None);
    }

    #[test]
    fn variables_are_hidden_while_preparing() {
        let c = config();
        let mut batch = Batch::new(vec![3, 4]);
        let ctx = ExecutionContext::preparing(&mut batch, &c, 0, 0);
        assert!(matches!(resolve(&Arg::var("loss"), &ctx), Err(PipelineError::UnresolvedReference { .. })));
        assert_eq!(resolve(&Arg::batch("indices"), &ctx), Ok(Datum::Json(json!([3, 4]))));
    }

    #[test]
    fn resolves_against_variables_when_executing() {
        let c = config();
        let mut batch = Batch::new(vec![0]);
        let mut vars = VariableStore::new();
        vars.declare("loss", VariableDecl::once(0.5));
        let mut models = ModelRegistry::new();
        let ctx = ExecutionContext::executing(&mut batch, &c, &mut vars, &mut models, 0, 0);
        let mut args = ArgMap::new();
        args.insert("lr".into(), Arg::config("model_config/optimizer/lr"));
        args.insert("loss".into(), Arg::var("loss"));
        let resolved = resolve_args(&args, &ctx).expect("resolved");
        assert_eq!(resolved.f64("lr"), Ok(0.1));
        assert_eq!(resolved.f64("loss"), Ok(0.5));
        assert!(resolve(&Arg::config("nope"), &ctx).is_err());
    }
}
