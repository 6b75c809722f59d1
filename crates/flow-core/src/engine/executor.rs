//! Bucle de ejecución de un `BoundPipeline`.
//!
//! Cada batch pasa por dos fases:
//! 1. preparación: `fetch` del `DataSource` más las acciones `Prepare` al
//!    inicio del template. Con `prefetch > 0` corre en un hilo aparte, hasta
//!    `prefetch` batches por delante.
//! 2. ejecución: el resto de acciones, en orden y siempre en el hilo que
//!    llamó a `run`, con acceso a variables y modelos.
//!
//! El orden de los batches que llegan a la fase 2 es el del plan, con o sin
//! prefetch. El primer error aborta el run y se devuelve envuelto en
//! `PipelineError::ActionFailed`.

use std::sync::{mpsc, Arc};
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BatchPlan, BoundPipeline, CancelToken, PlannedBatch, RunOptions};
use crate::action::{resolve_args, ActionDefinition, ExecutionContext};
use crate::data::{Batch, DataSource};
use crate::errors::{PipelineError, PipelineResult};
use crate::event::{EventStore, RunEventKind};
use crate::models::ModelRegistry;
use crate::template::Config;
use crate::vars::VariableStore;

/// Resultado de un `run` que no falló.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub batches: usize,
    pub items: usize,
    /// Épocas tocadas por al menos un batch.
    pub epochs: usize,
    pub cancelled: bool,
}

type Actions = [Arc<dyn ActionDefinition>];

type Prepared = (PlannedBatch, PipelineResult<Batch>);

impl<D, E> BoundPipeline<D, E>
    where D: DataSource,
          E: EventStore
{
    /// Ejecuta el template sobre la fuente según `options`.
    ///
    /// Las variables `EveryRun` se reinician antes del primer batch; las
    /// `Once` y los modelos conservan su valor entre runs.
    pub fn run(&mut self, options: &RunOptions) -> PipelineResult<RunSummary> {
        options.validate()?;
        let template = self.template.clone();
        let (prepare, execute) = template.actions().split_at(template.prepare_prefix_len());
        let config = template.config();
        let plan = BatchPlan::new(self.source.len(), options);
        let run_id = Uuid::new_v4();

        self.cancel.reset();
        self.vars.begin_run();
        self.events.append_kind(run_id,
                                RunEventKind::RunStarted { definition_hash: template.definition_hash().to_string(),
                                                           items: self.source.len(),
                                                           batch_size: options.batch_size,
                                                           planned_batches: plan.total_batches() });
        info!("run:start run_id={run_id} items={} batch_size={} planned={:?} prefetch={}",
              self.source.len(),
              options.batch_size,
              plan.total_batches(),
              options.prefetch);

        let Self { source,
                   vars,
                   models,
                   events,
                   cancel,
                   .. } = &mut *self;
        let mut consumer = Consumer { run_id,
                                      actions: execute,
                                      config,
                                      vars,
                                      models,
                                      events,
                                      bar: progress_bar(options.bar, plan.total_batches()),
                                      batches: 0,
                                      items: 0,
                                      epochs: 0 };

        let cancelled = if options.prefetch == 0 {
            run_serial(plan, source, prepare, config, cancel, &mut consumer)?
        } else {
            run_prefetched(plan, source, prepare, config, cancel, options.prefetch, &mut consumer)?
        };

        let summary = consumer.finish(cancelled);
        self.last_run = Some(summary.clone());
        Ok(summary)
    }
}

/// Receptor de batches preparados: ejecuta la fase 2 y lleva la cuenta.
struct Consumer<'p, E: EventStore> {
    run_id: Uuid,
    actions: &'p Actions,
    config: &'p Config,
    vars: &'p mut VariableStore,
    models: &'p mut ModelRegistry,
    events: &'p mut E,
    bar: ProgressBar,
    batches: usize,
    items: usize,
    epochs: usize,
}

impl<E: EventStore> Consumer<'_, E> {
    fn consume(&mut self, planned: PlannedBatch, prepared: PipelineResult<Batch>) -> PipelineResult<()> {
        let outcome = prepared.and_then(|mut batch| {
                                  self.execute(&mut batch, &planned)?;
                                  Ok(batch.len())
                              });
        match outcome {
            Ok(items) => {
                self.batches += 1;
                self.items += items;
                self.epochs = self.epochs.max(planned.epoch + 1);
                self.events.append_kind(self.run_id,
                                        RunEventKind::BatchFinished { batch_index: planned.index,
                                                                      epoch: planned.epoch,
                                                                      items });
                self.bar.inc(1);
                trace!("run:batch run_id={} index={} items={items}", self.run_id, planned.index);
                Ok(())
            }
            Err(error) => {
                self.bar.abandon();
                warn!("run:failed run_id={} batch={} error={error}", self.run_id, planned.index);
                self.events.append_kind(self.run_id,
                                        RunEventKind::BatchFailed { batch_index: planned.index,
                                                                    error: error.clone() });
                Err(error)
            }
        }
    }

    fn execute(&mut self, batch: &mut Batch, planned: &PlannedBatch) -> PipelineResult<()> {
        for action in self.actions {
            let mut ctx = ExecutionContext::executing(batch,
                                                      self.config,
                                                      self.vars,
                                                      self.models,
                                                      planned.index,
                                                      planned.epoch);
            run_action(action.as_ref(), &mut ctx)?;
        }
        Ok(())
    }

    fn finish(self, cancelled: bool) -> RunSummary {
        if cancelled {
            self.bar.abandon();
            info!("run:cancelled run_id={} batches={}", self.run_id, self.batches);
            self.events
                .append_kind(self.run_id, RunEventKind::RunCancelled { batches: self.batches });
        } else {
            self.bar.finish();
            info!("run:completed run_id={} batches={} items={}", self.run_id, self.batches, self.items);
            self.events.append_kind(self.run_id,
                                    RunEventKind::RunCompleted { batches: self.batches,
                                                                 items: self.items });
        }
        RunSummary { run_id: self.run_id,
                     batches: self.batches,
                     items: self.items,
                     epochs: self.epochs,
                     cancelled }
    }
}

fn run_action(action: &dyn ActionDefinition, ctx: &mut ExecutionContext<'_>) -> PipelineResult<()> {
    let index = ctx.batch_index;
    resolve_args(action.args(), ctx).and_then(|args| action.run(ctx, args))
                                    .map_err(|e| e.in_action(action.name(), index))
}

/// Fase 1: fetch + acciones `Prepare` iniciales. No toca variables ni modelos.
fn prepare_batch<D: DataSource>(source: &D, actions: &Actions, config: &Config, planned: &PlannedBatch) -> PipelineResult<Batch> {
    let mut batch = source.fetch(&planned.positions)
                          .map_err(|e| e.in_action("fetch", planned.index))?;
    for action in actions {
        let mut ctx = ExecutionContext::preparing(&mut batch, config, planned.index, planned.epoch);
        run_action(action.as_ref(), &mut ctx)?;
    }
    Ok(batch)
}

/// Sin prefetch: ambas fases en el hilo actual. Devuelve `true` si se canceló.
fn run_serial<D, E>(plan: BatchPlan,
                    source: &D,
                    prepare: &Actions,
                    config: &Config,
                    cancel: &CancelToken,
                    consumer: &mut Consumer<'_, E>)
                    -> PipelineResult<bool>
    where D: DataSource,
          E: EventStore
{
    for planned in plan {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        let prepared = prepare_batch(source, prepare, config, &planned);
        consumer.consume(planned, prepared)?;
    }
    Ok(false)
}

/// Con prefetch: un hilo con scope prepara batches y los entrega por un canal
/// acotado. Al cortar el run (error o cancelación) se suelta el receptor, el
/// `send` del productor falla y el hilo termina antes de cerrar el scope.
fn run_prefetched<D, E>(plan: BatchPlan,
                        source: &D,
                        prepare: &Actions,
                        config: &Config,
                        cancel: &CancelToken,
                        depth: usize,
                        consumer: &mut Consumer<'_, E>)
                        -> PipelineResult<bool>
    where D: DataSource,
          E: EventStore
{
    thread::scope(|scope| {
        let (tx, rx) = mpsc::sync_channel::<Prepared>(depth.saturating_sub(1));
        let worker = scope.spawn(move || {
                              for planned in plan {
                                  if cancel.is_cancelled() {
                                      return true;
                                  }
                                  let prepared = prepare_batch(source, prepare, config, &planned);
                                  let failed = prepared.is_err();
                                  if tx.send((planned, prepared)).is_err() || failed {
                                      break;
                                  }
                              }
                              false
                          });
        debug!("run:prefetch depth={depth}");

        for (planned, prepared) in rx.iter() {
            if cancel.is_cancelled() {
                return Ok(true);
            }
            consumer.consume(planned, prepared)?;
        }
        worker.join()
              .map_err(|_| PipelineError::Internal("prefetch worker panicked".to_string()))
    })
}

fn progress_bar(enabled: bool, total: Option<usize>) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = match total {
        Some(n) => ProgressBar::new(n as u64),
        None => ProgressBar::new_spinner(),
    };
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} batches") {
        bar.set_style(style);
    }
    bar
}
