use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::Datum;
use crate::errors::{PipelineError, PipelineResult};

/// Cuándo se reinicia una variable a su valor inicial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetPolicy {
    /// Se inicializa una sola vez; acumula a través de llamadas a `run`.
    Once,
    /// Se reinicializa al comienzo de cada `run`.
    EveryRun,
}

/// Cómo se combina un valor nuevo con el actual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Reemplaza el valor.
    Write,
    /// Añade el valor como un elemento más de la secuencia.
    Append,
    /// Concatena los elementos de una secuencia.
    Extend,
}

/// Declaración de variable en un `Template`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub init: Datum,
    pub reset: ResetPolicy,
}

impl VariableDecl {
    pub fn once(init: impl Into<Datum>) -> Self {
        Self { init: init.into(),
               reset: ResetPolicy::Once }
    }

    pub fn every_run(init: impl Into<Datum>) -> Self {
        Self { init: init.into(),
               reset: ResetPolicy::EveryRun }
    }

    /// Secuencia vacía, el caso habitual para variables en modo append.
    pub fn list(reset: ResetPolicy) -> Self {
        Self { init: Datum::empty_list(),
               reset }
    }

    pub fn describe(&self) -> Value {
        serde_json::json!({ "init": self.init.describe(), "reset": self.reset })
    }
}

#[derive(Debug, Clone)]
struct Slot {
    decl: VariableDecl,
    value: Datum,
}

/// Estado mutable con nombre, propio de cada `BoundPipeline`.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    slots: IndexMap<String, Slot>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea el store con las declaraciones del template, ya inicializadas.
    pub fn from_decls<'a>(decls: impl IntoIterator<Item = (&'a String, &'a VariableDecl)>) -> Self {
        let mut store = Self::new();
        for (name, decl) in decls {
            store.declare(name.clone(), decl.clone());
        }
        store
    }

    /// Declara una variable si no existe; una declaración repetida no pisa
    /// el valor acumulado.
    pub fn declare(&mut self, name: impl Into<String>, decl: VariableDecl) {
        self.slots
            .entry(name.into())
            .or_insert_with(|| Slot { value: decl.init.clone(),
                                      decl });
    }

    /// Aplica la política de reinicio al comenzar un `run`.
    pub fn begin_run(&mut self) {
        for slot in self.slots.values_mut() {
            if slot.decl.reset == ResetPolicy::EveryRun {
                slot.value = slot.decl.init.clone();
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.slots.get(name).map(|s| &s.value)
    }

    pub fn require(&self, name: &str) -> PipelineResult<&Datum> {
        self.get(name)
            .ok_or_else(|| PipelineError::unresolved(format!("variable '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Datum>) -> PipelineResult<()> {
        self.update(name, value.into(), UpdateMode::Write)
    }

    /// Actualiza una variable. Una variable no declarada se crea con
    /// `ResetPolicy::Once` e inicializador nulo.
    pub fn update(&mut self, name: &str, value: Datum, mode: UpdateMode) -> PipelineResult<()> {
        let slot = self.slots
                       .entry(name.to_string())
                       .or_insert_with(|| Slot { decl: VariableDecl::once(Datum::null()),
                                                 value: Datum::null() });
        let current = std::mem::replace(&mut slot.value, Datum::null());
        match combine(current, value, mode) {
            Ok(next) => {
                slot.value = next;
                Ok(())
            }
            Err((restored, reason)) => {
                slot.value = restored;
                Err(PipelineError::variable(name, reason))
            }
        }
    }

    /// Foto JSON de todas las variables.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.slots
                          .iter()
                          .map(|(k, s)| (k.clone(), s.value.to_json()))
                          .collect())
    }
}

/// Combina valor actual y nuevo. En error devuelve el valor actual intacto.
fn combine(current: Datum, value: Datum, mode: UpdateMode) -> Result<Datum, (Datum, String)> {
    match mode {
        UpdateMode::Write => Ok(value),
        UpdateMode::Append => {
            let mut items = match into_items(current) {
                Ok(items) => items,
                Err(current) => {
                    let reason = format!("cannot append to a {} value", current.kind_name());
                    return Err((current, reason));
                }
            };
            items.push(value);
            Ok(Datum::List(items))
        }
        UpdateMode::Extend => {
            // El valor nuevo se valida antes de convertir el actual.
            let extra = match into_items(value) {
                Ok(extra) => extra,
                Err(other) => return Err((current, format!("cannot extend with a {} value", other.kind_name()))),
            };
            let mut items = match into_items(current) {
                Ok(items) => items,
                Err(current) => {
                    let reason = format!("cannot extend a {} value", current.kind_name());
                    return Err((current, reason));
                }
            };
            items.extend(extra);
            Ok(Datum::List(items))
        }
    }
}

/// Vista como secuencia: listas, arrays JSON, tensores (por el primer eje)
/// y nulo (secuencia vacía).
fn into_items(datum: Datum) -> Result<Vec<Datum>, Datum> {
    match datum {
        Datum::List(items) => Ok(items),
        Datum::Json(Value::Array(items)) => Ok(items.into_iter().map(Datum::Json).collect()),
        Datum::Json(Value::Null) => Ok(Vec::new()),
        Datum::Tensor(t) if t.ndim() == 1 => Ok(t.iter().map(|&x| Datum::from(x)).collect()),
        Datum::Tensor(t) if t.ndim() > 1 => Ok(t.outer_iter().map(|item| Datum::Tensor(item.to_owned())).collect()),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_run_resets_and_once_keeps() {
        let mut store = VariableStore::new();
        store.declare("acc", VariableDecl::every_run(0.0));
        store.declare("history", VariableDecl::list(ResetPolicy::Once));
        store.set("acc", 0.9).expect("write");
        store.update("history", Datum::from(1.0), UpdateMode::Append).expect("append");

        store.begin_run();
        assert_eq!(store.get("acc"), Some(&Datum::from(0.0)));
        assert_eq!(store.get("history").map(Datum::len), Some(1));
    }

    #[test]
    fn append_on_scalar_fails_without_losing_value() {
        let mut store = VariableStore::new();
        store.declare("loss", VariableDecl::once(1.5));
        let err = store.update("loss", Datum::from(2.0), UpdateMode::Append).unwrap_err();
        assert!(matches!(err, PipelineError::Variable { .. }));
        assert_eq!(store.get("loss"), Some(&Datum::from(1.5)));
    }

    #[test]
    fn extend_with_scalar_fails_without_losing_tensor() {
        let mut store = VariableStore::new();
        let original = Datum::Tensor(ndarray::Array::from_vec(vec![1.0f32, 2.0, 3.0]).into_dyn());
        store.declare("v", VariableDecl::once(original.clone()));
        let err = store.update("v", Datum::from(5.0), UpdateMode::Extend).unwrap_err();
        assert!(matches!(err, PipelineError::Variable { .. }));
        assert_eq!(store.get("v"), Some(&original));

        store.declare("arr", VariableDecl::once(json!([1, 2])));
        assert!(store.update("arr", Datum::from("x"), UpdateMode::Extend).is_err());
        assert_eq!(store.get("arr"), Some(&Datum::Json(json!([1, 2]))));
    }

    #[test]
    fn extend_concatenates_and_undeclared_is_created() {
        let mut store = VariableStore::new();
        store.update("preds", Datum::Json(json!([1, 2])), UpdateMode::Extend).expect("extend");
        store.update("preds", Datum::Json(json!([3])), UpdateMode::Extend).expect("extend");
        assert_eq!(store.get("preds").map(Datum::len), Some(3));
        assert_eq!(store.snapshot()["preds"], json!([1, 2, 3]));
    }

    #[test]
    fn extend_with_tensor_splits_leading_axis() {
        let mut store = VariableStore::new();
        store.declare("preds", VariableDecl::list(ResetPolicy::EveryRun));
        let batch = ndarray::Array::from_vec(vec![1.0f32, 0.0, 2.0]).into_dyn();
        store.update("preds", Datum::Tensor(batch), UpdateMode::Extend).expect("extend");
        assert_eq!(store.snapshot()["preds"], json!([1.0, 0.0, 2.0]));
        assert_eq!(store.get("preds").map(|d| d.to_tensor().map(|t| t.len())), Some(Ok(3)));
    }

    #[test]
    fn redeclare_keeps_accumulated_value() {
        let mut store = VariableStore::new();
        store.declare("n", VariableDecl::once(0.0));
        store.set("n", 5.0).expect("write");
        store.declare("n", VariableDecl::once(0.0));
        assert_eq!(store.get("n").and_then(Datum::as_f64), Some(5.0));
    }
}
