//! `Datum`: valor neutro que circula entre argumentos, variables y modelos.
//!
//! - `Json` cubre literales y config (números, strings, objetos).
//! - `Tensor` cubre componentes de batch y salidas numéricas de modelos.
//! - `List` es la secuencia que acumulan las variables en modo append.

use ndarray::ArrayD;
use serde_json::{json, Value};

use crate::errors::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Json(Value),
    Tensor(ArrayD<f32>),
    List(Vec<Datum>),
}

impl Datum {
    pub fn null() -> Self {
        Datum::Json(Value::Null)
    }

    pub fn empty_list() -> Self {
        Datum::List(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Json(Value::Null))
    }

    /// Valor escalar. Acepta números JSON y tensores de un único elemento.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Json(v) => v.as_f64(),
            Datum::Tensor(t) if t.len() == 1 => t.iter().next().map(|x| f64::from(*x)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Json(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Datum::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Datum::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Datum]> {
        match self {
            Datum::List(items) => Some(items),
            _ => None,
        }
    }

    /// Número de elementos para secuencias; 1 para escalares y objetos.
    pub fn len(&self) -> usize {
        match self {
            Datum::List(items) => items.len(),
            Datum::Json(Value::Array(items)) => items.len(),
            Datum::Json(Value::Null) => 0,
            Datum::Tensor(t) => t.shape().first().copied().unwrap_or(1),
            Datum::Json(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convierte a tensor, aceptando también números, arrays JSON planos y
    /// listas de ítems con la misma forma (apiladas en un nuevo primer eje).
    pub fn to_tensor(&self) -> PipelineResult<ArrayD<f32>> {
        match self {
            Datum::Tensor(t) => Ok(t.clone()),
            Datum::Json(Value::Number(n)) => {
                let x = n.as_f64().unwrap_or_default() as f32;
                Ok(ndarray::arr0(x).into_dyn())
            }
            Datum::Json(Value::Array(items)) => {
                let flat = items.iter()
                                .map(|v| v.as_f64().map(|x| x as f32))
                                .collect::<Option<Vec<f32>>>()
                                .ok_or_else(|| PipelineError::Data("array contains non numeric values".into()))?;
                Ok(ndarray::Array1::from(flat).into_dyn())
            }
            Datum::List(items) if items.is_empty() => Ok(ndarray::Array1::<f32>::zeros(0).into_dyn()),
            Datum::List(items) => {
                let parts = items.iter().map(Datum::to_tensor).collect::<PipelineResult<Vec<_>>>()?;
                let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
                ndarray::stack(ndarray::Axis(0), &views)
                    .map_err(|e| PipelineError::Data(format!("list items differ in shape: {e}")))
            }
            other => Err(PipelineError::Data(format!("cannot convert {} to tensor", other.kind_name()))),
        }
    }

    /// Representación JSON (tensores como `{shape, data}`).
    pub fn to_json(&self) -> Value {
        match self {
            Datum::Json(v) => v.clone(),
            Datum::Tensor(t) => json!({
                "shape": t.shape(),
                "data": t.iter().copied().collect::<Vec<f32>>(),
            }),
            Datum::List(items) => Value::Array(items.iter().map(Datum::to_json).collect()),
        }
    }

    /// Descripción estable usada en fingerprints (no incluye datos de tensores).
    pub fn describe(&self) -> Value {
        match self {
            Datum::Json(v) => v.clone(),
            Datum::Tensor(t) => json!({ "tensor_shape": t.shape() }),
            Datum::List(items) => Value::Array(items.iter().map(Datum::describe).collect()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Datum::Json(_) => "json",
            Datum::Tensor(_) => "tensor",
            Datum::List(_) => "list",
        }
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::Json(value)
    }
}

impl From<ArrayD<f32>> for Datum {
    fn from(value: ArrayD<f32>) -> Self {
        Datum::Tensor(value)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Json(json!(value))
    }
}

impl From<f32> for Datum {
    fn from(value: f32) -> Self {
        Datum::Json(json!(value))
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Json(json!(value))
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Json(Value::Bool(value))
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Json(Value::String(value.to_string()))
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Json(Value::String(value))
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(value: Vec<Datum>) -> Self {
        Datum::List(value)
    }
}
