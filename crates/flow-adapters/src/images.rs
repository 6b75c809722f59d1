//! Acciones de preparación para batches de imágenes.
//!
//! Todas son `Prepare`: sólo leen y reescriben componentes del batch, nunca
//! variables ni modelos. Colocadas al inicio del template corren en el hilo
//! de prefetch.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use flow_core::action::{ActionDefinition, ActionKind, Arg, ArgMap, ExecutionContext, ResolvedArgs};
use flow_core::{PipelineError, PipelineResult, TemplateBuilder};
use ndarray::{Array3, ArrayD, ArrayViewD, Axis, Ix3, IxDyn};
use rayon::prelude::*;
use serde_json::{json, Value};

fn single_arg(name: &str, arg: Arg) -> ArgMap {
    let mut args = ArgMap::new();
    args.insert(name.to_string(), arg);
    args
}

fn take_component(ctx: &ExecutionContext<'_>, component: &str) -> PipelineResult<ArrayD<f32>> {
    ctx.batch.require(component).cloned()
}

/// Divide un componente por `scale` (p. ej. 255 para pasar píxeles a [0, 1]).
#[derive(Debug, Clone)]
pub struct Normalize {
    name: String,
    component: String,
    args: ArgMap,
}

impl Normalize {
    pub fn new(component: impl Into<String>, scale: Arg) -> Self {
        let component = component.into();
        Self { name: format!("normalize:{component}"),
               component,
               args: single_arg("scale", scale) }
    }
}

impl ActionDefinition for Normalize {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "component": self.component })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        let scale = args.f64("scale")? as f32;
        if scale == 0.0 || !scale.is_finite() {
            return Err(PipelineError::Data(format!("invalid normalization scale {scale}")));
        }
        let data = ctx.batch
                      .component_mut(&self.component)
                      .ok_or_else(|| PipelineError::unresolved(format!("batch component '{}'", self.component)))?;
        data.mapv_inplace(|x| x / scale);
        Ok(())
    }
}

/// Cambia la forma de cada ítem de un componente (el primer eje se conserva).
#[derive(Debug, Clone)]
pub struct Reshape {
    name: String,
    component: String,
    item_shape: Vec<usize>,
    args: ArgMap,
}

impl Reshape {
    pub fn new(component: impl Into<String>, item_shape: &[usize]) -> Self {
        let component = component.into();
        Self { name: format!("reshape:{component}"),
               component,
               item_shape: item_shape.to_vec(),
               args: ArgMap::new() }
    }
}

impl ActionDefinition for Reshape {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "component": self.component, "item_shape": self.item_shape })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, _args: ResolvedArgs) -> PipelineResult<()> {
        let data = take_component(ctx, &self.component)?;
        let mut shape = vec![ctx.batch.len()];
        shape.extend_from_slice(&self.item_shape);
        let from = data.shape().to_vec();
        let reshaped = data.into_shape_with_order(IxDyn(&shape))
                           .map_err(|e| PipelineError::Data(format!("cannot reshape {from:?} into {shape:?}: {e}")))?;
        ctx.batch.set_component(self.component.clone(), reshaped)
    }
}

/// Redimensiona cada ítem a `[alto, ancho]` con interpolación bilineal
/// (las esquinas se conservan). Acepta ítems `[h, w]` y `[h, w, canales]`.
#[derive(Debug, Clone)]
pub struct Resize {
    name: String,
    component: String,
    shape: [usize; 2],
    args: ArgMap,
}

impl Resize {
    pub fn new(component: impl Into<String>, shape: [usize; 2]) -> Self {
        let component = component.into();
        Self { name: format!("resize:{component}"),
               component,
               shape,
               args: ArgMap::new() }
    }
}

/// Posición en el eje origen para `dst`: índices vecinos y peso del superior.
fn source_coord(dst: usize, dst_len: usize, src_len: usize) -> (usize, usize, f32) {
    if dst_len <= 1 || src_len <= 1 {
        return (0, 0, 0.0);
    }
    let pos = dst as f32 * (src_len - 1) as f32 / (dst_len - 1) as f32;
    let lo = (pos.floor() as usize).min(src_len - 1);
    let hi = (lo + 1).min(src_len - 1);
    (lo, hi, pos - lo as f32)
}

fn resize_item(item: ArrayViewD<'_, f32>, [out_h, out_w]: [usize; 2]) -> PipelineResult<ArrayD<f32>> {
    let flat = item.ndim() == 2;
    let item = if flat { item.insert_axis(Axis(2)) } else { item };
    let from = item.shape().to_vec();
    let item = item.into_dimensionality::<Ix3>()
                   .map_err(|_| PipelineError::Data(format!("cannot resize an item of shape {from:?}")))?;
    let (in_h, in_w, channels) = item.dim();
    if in_h == 0 || in_w == 0 {
        return Err(PipelineError::Data(format!("cannot resize an empty item of shape {from:?}")));
    }
    let mut out = Array3::<f32>::zeros((out_h, out_w, channels));
    for y in 0..out_h {
        let (y0, y1, fy) = source_coord(y, out_h, in_h);
        for x in 0..out_w {
            let (x0, x1, fx) = source_coord(x, out_w, in_w);
            for c in 0..channels {
                let top = item[[y0, x0, c]] * (1.0 - fx) + item[[y0, x1, c]] * fx;
                let bottom = item[[y1, x0, c]] * (1.0 - fx) + item[[y1, x1, c]] * fx;
                out[[y, x, c]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    let out = out.into_dyn();
    Ok(if flat { out.remove_axis(Axis(2)) } else { out })
}

impl ActionDefinition for Resize {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "component": self.component, "shape": self.shape })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, _args: ResolvedArgs) -> PipelineResult<()> {
        if self.shape.contains(&0) {
            return Err(PipelineError::Data(format!("invalid resize target {:?}", self.shape)));
        }
        let data = ctx.batch.require(&self.component)?;
        if data.shape().first().copied().unwrap_or(0) == 0 {
            return Ok(());
        }
        let items: Vec<ArrayViewD<'_, f32>> = data.outer_iter().collect();
        let outputs: Vec<ArrayD<f32>> = items.into_par_iter()
                                             .map(|item| resize_item(item, self.shape))
                                             .collect::<PipelineResult<_>>()?;
        let views: Vec<ArrayViewD<'_, f32>> = outputs.iter().map(|a| a.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| PipelineError::Data(format!("resized items of '{}' differ in shape: {e}", self.component)))?;
        ctx.batch.set_component(self.component.clone(), stacked)
    }
}

/// Transformación por ítem.
pub type ItemFn = dyn Fn(ArrayViewD<'_, f32>) -> ArrayD<f32> + Send + Sync;

/// Aplica una función a cada ítem del componente, en paralelo con rayon.
/// Todas las salidas deben tener la misma forma.
#[derive(Clone)]
pub struct ApplyTransform {
    name: String,
    component: String,
    func: Arc<ItemFn>,
    args: ArgMap,
}

impl ApplyTransform {
    pub fn new<F>(component: impl Into<String>, func: F) -> Self
        where F: Fn(ArrayViewD<'_, f32>) -> ArrayD<f32> + Send + Sync + 'static
    {
        let component = component.into();
        Self { name: format!("apply_transform:{component}"),
               component,
               func: Arc::new(func),
               args: ArgMap::new() }
    }
}

impl fmt::Debug for ApplyTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyTransform").field("component", &self.component).finish_non_exhaustive()
    }
}

impl ActionDefinition for ApplyTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "component": self.component })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, _args: ResolvedArgs) -> PipelineResult<()> {
        let data = ctx.batch.require(&self.component)?;
        if data.shape().first().copied().unwrap_or(0) == 0 {
            return Ok(());
        }
        let items: Vec<ArrayViewD<'_, f32>> = data.outer_iter().collect();
        let outputs: Vec<ArrayD<f32>> = items.into_par_iter().map(|item| (self.func)(item)).collect();
        let views: Vec<ArrayViewD<'_, f32>> = outputs.iter().map(|a| a.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| PipelineError::Data(format!("transformed items of '{}' differ in shape: {e}", self.component)))?;
        ctx.batch.set_component(self.component.clone(), stacked)
    }
}

/// Transformación sobre el componente completo.
pub type ComponentFn = dyn Fn(ArrayD<f32>) -> PipelineResult<ArrayD<f32>> + Send + Sync;

/// Aplica una función al componente completo (todos los ítems a la vez).
#[derive(Clone)]
pub struct ApplyTransformAll {
    name: String,
    component: String,
    func: Arc<ComponentFn>,
    args: ArgMap,
}

impl ApplyTransformAll {
    pub fn new<F>(component: impl Into<String>, func: F) -> Self
        where F: Fn(ArrayD<f32>) -> PipelineResult<ArrayD<f32>> + Send + Sync + 'static
    {
        let component = component.into();
        Self { name: format!("apply_transform_all:{component}"),
               component,
               func: Arc::new(func),
               args: ArgMap::new() }
    }
}

impl fmt::Debug for ApplyTransformAll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyTransformAll").field("component", &self.component).finish_non_exhaustive()
    }
}

impl ActionDefinition for ApplyTransformAll {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn base_params(&self) -> Value {
        json!({ "component": self.component })
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, _args: ResolvedArgs) -> PipelineResult<()> {
        let data = take_component(ctx, &self.component)?;
        let out = (self.func)(data)?;
        ctx.batch.set_component(self.component.clone(), out)
    }
}

/// Escribe el batch como JSON. En la ruta, `{batch}` se sustituye por el
/// índice del batch.
#[derive(Debug, Clone)]
pub struct Dump {
    args: ArgMap,
}

impl Dump {
    pub fn new(path: Arg) -> Self {
        Self { args: single_arg("path", path) }
    }
}

impl ActionDefinition for Dump {
    fn name(&self) -> &str {
        "dump"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Prepare
    }

    fn args(&self) -> &ArgMap {
        &self.args
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>, args: ResolvedArgs) -> PipelineResult<()> {
        let path = PathBuf::from(args.str("path")?.replace("{batch}", &ctx.batch_index.to_string()));
        let components: serde_json::Map<String, Value> =
            ctx.batch
               .component_names()
               .filter_map(|name| ctx.batch.component(name).map(|data| (name, data)))
               .map(|(name, data)| {
                   (name.to_string(), json!({ "shape": data.shape(), "data": data.iter().collect::<Vec<_>>() }))
               })
               .collect();
        let doc = json!({
            "batch_index": ctx.batch_index,
            "epoch": ctx.epoch,
            "indices": ctx.batch.indices,
            "components": components,
        });
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&doc)?)?;
        log::debug!("dump:write batch={} path={}", ctx.batch_index, path.display());
        Ok(())
    }
}

/// Métodos de `TemplateBuilder` para batches de imágenes.
pub trait ImagesTemplateExt: Sized {
    fn normalize(self, component: &str, scale: impl Into<Arg>) -> Self;

    fn reshape(self, component: &str, item_shape: &[usize]) -> Self;

    fn resize(self, component: &str, shape: [usize; 2]) -> Self;

    fn apply_transform<F>(self, component: &str, func: F) -> Self
        where F: Fn(ArrayViewD<'_, f32>) -> ArrayD<f32> + Send + Sync + 'static;

    fn apply_transform_all<F>(self, component: &str, func: F) -> Self
        where F: Fn(ArrayD<f32>) -> PipelineResult<ArrayD<f32>> + Send + Sync + 'static;

    fn dump(self, path: impl Into<Arg>) -> Self;
}

impl ImagesTemplateExt for TemplateBuilder {
    fn normalize(self, component: &str, scale: impl Into<Arg>) -> Self {
        self.add_action(Normalize::new(component, scale.into()))
    }

    fn reshape(self, component: &str, item_shape: &[usize]) -> Self {
        self.add_action(Reshape::new(component, item_shape))
    }

    fn resize(self, component: &str, shape: [usize; 2]) -> Self {
        self.add_action(Resize::new(component, shape))
    }

    fn apply_transform<F>(self, component: &str, func: F) -> Self
        where F: Fn(ArrayViewD<'_, f32>) -> ArrayD<f32> + Send + Sync + 'static
    {
        self.add_action(ApplyTransform::new(component, func))
    }

    fn apply_transform_all<F>(self, component: &str, func: F) -> Self
        where F: Fn(ArrayD<f32>) -> PipelineResult<ArrayD<f32>> + Send + Sync + 'static
    {
        self.add_action(ApplyTransformAll::new(component, func))
    }

    fn dump(self, path: impl Into<Arg>) -> Self {
        self.add_action(Dump::new(path.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::{Batch, Config};
    use ndarray::Array;

    fn run_prepare(action: &dyn ActionDefinition, batch: &mut Batch) -> PipelineResult<()> {
        let config = Config::new();
        let mut ctx = ExecutionContext::preparing(batch, &config, 0, 0);
        let args = flow_core::action::resolve_args(action.args(), &ctx)?;
        action.run(&mut ctx, args)
    }

    fn batch() -> Batch {
        Batch::new(vec![0, 1]).with_component("images", Array::from_elem((2, 2, 2), 255.0).into_dyn())
    }

    #[test]
    fn normalize_then_reshape() {
        let mut b = batch();
        run_prepare(&Normalize::new("images", Arg::literal(255.0)), &mut b).expect("normalize");
        run_prepare(&Reshape::new("images", &[4]), &mut b).expect("reshape");
        let images = b.images().expect("images");
        assert_eq!(images.shape(), &[2, 4]);
        assert!(images.iter().all(|&x| (x - 1.0).abs() < 1e-6));
        assert!(run_prepare(&Reshape::new("images", &[3]), &mut b).is_err());
    }

    #[test]
    fn resize_interpolates_each_item() {
        let data = Array::from_shape_vec((2, 2, 2), vec![0.0, 1.0, 2.0, 3.0, 4.0, 4.0, 4.0, 4.0]).expect("shape");
        let mut b = Batch::new(vec![0, 1]).with_component("images", data.into_dyn());
        run_prepare(&Resize::new("images", [3, 3]), &mut b).expect("resize");
        let images = b.images().expect("images");
        assert_eq!(images.shape(), &[2, 3, 3]);
        assert_eq!(images[[0, 0, 0]], 0.0);
        assert_eq!(images[[0, 0, 2]], 1.0);
        assert_eq!(images[[0, 2, 0]], 2.0);
        assert_eq!(images[[0, 2, 2]], 3.0);
        assert!((images[[0, 0, 1]] - 0.5).abs() < 1e-6);
        assert!((images[[0, 1, 1]] - 1.5).abs() < 1e-6);
        assert!(images.index_axis(Axis(0), 1).iter().all(|&x| (x - 4.0).abs() < 1e-6));
    }

    #[test]
    fn resize_keeps_channels_and_rejects_flat_items() {
        let mut b = Batch::new(vec![0]).with_component("images", Array::from_elem((1, 4, 4, 3), 2.0).into_dyn());
        run_prepare(&Resize::new("images", [2, 5]), &mut b).expect("resize");
        assert_eq!(b.images().map(|a| a.shape().to_vec()), Some(vec![1, 2, 5, 3]));
        assert!(b.images().is_some_and(|a| a.iter().all(|&x| (x - 2.0).abs() < 1e-6)));

        let mut flat = Batch::new(vec![0, 1]).with_component("images", Array::from_elem((2, 4), 1.0).into_dyn());
        assert!(run_prepare(&Resize::new("images", [2, 2]), &mut flat).is_err());
        assert!(run_prepare(&Resize::new("images", [0, 2]), &mut b).is_err());
    }

    #[test]
    fn apply_transform_maps_each_item() {
        let mut b = batch();
        let action = ApplyTransform::new("images", |item| item.sum_axis(Axis(0)));
        run_prepare(&action, &mut b).expect("transform");
        assert_eq!(b.images().map(|a| a.shape().to_vec()), Some(vec![2, 2]));
        assert_eq!(b.images().map(|a| a[[1, 0]]), Some(510.0));
    }

    #[test]
    fn apply_transform_all_checks_leading_axis() {
        let mut b = batch();
        let bad = ApplyTransformAll::new("images", |_| Ok(Array::zeros((3, 1)).into_dyn()));
        assert!(run_prepare(&bad, &mut b).is_err());
    }

    #[test]
    fn dump_writes_json_per_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pattern = dir.path().join("out/batch_{batch}.json");
        let mut b = batch();
        run_prepare(&Dump::new(Arg::literal(pattern.to_string_lossy().to_string())), &mut b).expect("dump");
        let text = std::fs::read_to_string(dir.path().join("out/batch_0.json")).expect("dump file");
        let doc: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(doc["components"]["images"]["shape"], json!([2, 2, 2]));
    }
}
