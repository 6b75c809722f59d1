use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flow_adapters::ImagesTemplateExt;
use flow_core::{ActionKind, Arg, CancelToken, Datum, EventStore, InMemoryDataset, PipelineError, ResetPolicy,
                RunEventKind, RunOptions, Template, UpdateMode, VariableDecl};
use ndarray::{Array, Axis};

fn dataset(n: usize) -> InMemoryDataset {
    let images = Array::from_shape_fn((n, 2, 2), |(i, r, c)| (i * 4 + r * 2 + c) as f32).into_dyn();
    let labels = Array::from_shape_fn(n, |i| (i % 3) as f32).into_dyn();
    InMemoryDataset::from_images(images, labels).expect("dataset")
}

fn preparing_template() -> Template {
    Template::builder().init_variable("order", VariableDecl::list(ResetPolicy::EveryRun))
                       .init_variable("sums", VariableDecl::list(ResetPolicy::EveryRun))
                       .normalize("images", 4.0)
                       .apply_transform("images", |item| item.mapv(|x| x + 1.0))
                       .reshape("images", &[4])
                       .update_variable("order", Arg::batch("indices"), UpdateMode::Extend)
                       .call("sum_images", ActionKind::Execute, [("images", Arg::batch("images"))], |ctx, args| {
                           let images = args.require("images")?.to_tensor()?;
                           let sums = images.sum_axis(Axis(1));
                           ctx.vars_mut()?.update("sums", Datum::Tensor(sums), UpdateMode::Extend)
                       })
                       .build()
                       .expect("template")
}

#[test]
fn prefetch_does_not_change_results() {
    let template = preparing_template();
    assert_eq!(template.prepare_prefix_len(), 3);
    let options = RunOptions::new(6).shuffle(true).seed(9).n_epochs(3);

    let mut serial = template.bind(dataset(40));
    let mut prefetched = template.bind(dataset(40));
    let a = serial.run(&options).expect("serial");
    let b = prefetched.run(&options.clone().prefetch(4)).expect("prefetched");

    assert_eq!(a.batches, b.batches);
    assert_eq!(a.items, b.items);
    assert_eq!(serial.variable("order"), prefetched.variable("order"));
    assert_eq!(serial.variable("sums"), prefetched.variable("sums"));
    assert_eq!(serial.variable("order").map(Datum::len), Some(120));
}

#[test]
fn prefetch_depth_one_still_sees_every_batch() {
    let mut pipeline = preparing_template().bind(dataset(9));
    let summary = pipeline.run(&RunOptions::new(2).prefetch(1)).expect("run");
    assert_eq!(summary.batches, 5);
    assert_eq!(pipeline.variable("order").map(Datum::len), Some(9));
}

/// Contadores compartidos entre la etapa de preparación y la de ejecución.
#[derive(Clone, Default)]
struct Counters {
    prepared: Arc<AtomicUsize>,
    taken: Arc<AtomicUsize>,
    max_ahead: Arc<AtomicUsize>,
}

fn counting_template(counters: &Counters, execute_delay: Duration) -> Template {
    let prep = counters.clone();
    let exec = counters.clone();
    Template::builder().call("mark_prepared", ActionKind::Prepare, Vec::<(&str, Arg)>::new(), move |_, _| {
                           let prepared = prep.prepared.fetch_add(1, Ordering::SeqCst) + 1;
                           let ahead = prepared.saturating_sub(prep.taken.load(Ordering::SeqCst));
                           prep.max_ahead.fetch_max(ahead, Ordering::SeqCst);
                           Ok(())
                       })
                       .call("mark_taken", ActionKind::Execute, Vec::<(&str, Arg)>::new(), move |_, _| {
                           exec.taken.fetch_add(1, Ordering::SeqCst);
                           thread::sleep(execute_delay);
                           Ok(())
                       })
                       .build()
                       .expect("template")
}

#[test]
fn prefetch_depth_bounds_how_far_preparation_runs_ahead() {
    for depth in [1, 2, 4] {
        let counters = Counters::default();
        let mut pipeline = counting_template(&counters, Duration::from_millis(10)).bind(dataset(24));
        let summary = pipeline.run(&RunOptions::new(2).prefetch(depth)).expect("run");
        assert_eq!(summary.batches, 12);
        assert_eq!(counters.prepared.load(Ordering::SeqCst), 12);

        // Un batch más puede estar en tránsito entre el canal y su primera
        // acción de ejecución.
        let max_ahead = counters.max_ahead.load(Ordering::SeqCst);
        assert!(max_ahead >= depth, "depth {depth}: preparation never ran ahead ({max_ahead})");
        assert!(max_ahead <= depth + 1, "depth {depth}: {max_ahead} batches prepared ahead");
    }
}

#[test]
fn serial_run_prepares_one_batch_at_a_time() {
    let counters = Counters::default();
    let mut pipeline = counting_template(&counters, Duration::ZERO).bind(dataset(10));
    pipeline.run(&RunOptions::new(2)).expect("run");
    assert_eq!(counters.max_ahead.load(Ordering::SeqCst), 1);
}

#[test]
fn cancellation_while_prefetching_stops_the_worker() {
    let token = CancelToken::new();
    let stopper = token.clone();
    let counters = Counters::default();
    let template = counting_template(&counters, Duration::from_millis(2)).to_builder()
                                                                           .call("stop_after_third",
                                                                                 ActionKind::Execute,
                                                                                 Vec::<(&str, Arg)>::new(),
                                                                                 move |ctx, _| {
                                                                                     if ctx.batch_index == 2 {
                                                                                         stopper.cancel();
                                                                                     }
                                                                                     Ok(())
                                                                                 })
                                                                           .build()
                                                                           .expect("template");
    let depth = 3;
    let mut pipeline = template.bind(dataset(20)).with_cancel_token(token);
    let summary = pipeline.run(&RunOptions::new(2).unbounded_epochs().prefetch(depth)).expect("cancelled run");

    assert!(summary.cancelled);
    assert_eq!(summary.batches, 3);
    assert_eq!(counters.taken.load(Ordering::SeqCst), 3);
    assert!(counters.prepared.load(Ordering::SeqCst) <= 3 + depth + 1);
    let events = pipeline.events().list(summary.run_id);
    assert!(matches!(events.last().map(|e| &e.kind), Some(RunEventKind::RunCancelled { batches: 3 })));

    // El token se rearma en cada run: uno acotado termina con normalidad.
    let again = pipeline.run(&RunOptions::new(2).n_iters(2).prefetch(depth)).expect("second run");
    assert!(!again.cancelled);
    assert_eq!(again.batches, 2);
}

#[test]
fn preparation_error_surfaces_with_batch_index() {
    let template = Template::builder().call("fail_on_third", ActionKind::Prepare, Vec::<(&str, Arg)>::new(), |ctx, _| {
                                          if ctx.batch_index == 3 {
                                              return Err(PipelineError::Data("corrupt batch".to_string()));
                                          }
                                          Ok(())
                                      })
                                      .init_variable("count", VariableDecl::list(ResetPolicy::Once))
                                      .update_variable("count", 1.0, UpdateMode::Append)
                                      .build()
                                      .expect("template");
    for prefetch in [0, 2] {
        let mut pipeline = template.bind(dataset(20));
        let err = pipeline.run(&RunOptions::new(2).prefetch(prefetch)).unwrap_err();
        match &err {
            PipelineError::ActionFailed { action, batch_index, .. } => {
                assert_eq!(action, "fail_on_third");
                assert_eq!(*batch_index, 3);
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }
        assert_eq!(pipeline.variable("count").map(Datum::len), Some(3));
    }
}

#[test]
fn leading_prepare_actions_cannot_read_variables() {
    let template = Template::builder().init_variable("threshold", VariableDecl::once(0.5))
                                      .call("uses_var", ActionKind::Prepare, [("t", Arg::var("threshold"))], |_, _| Ok(()))
                                      .build()
                                      .expect("template");
    let err = template.bind(dataset(4)).run(&RunOptions::new(2).prefetch(2)).unwrap_err();
    assert!(matches!(err.root(), PipelineError::UnresolvedReference { .. }));
}

#[test]
fn prepare_after_execute_runs_with_full_context() {
    let template = Template::builder().init_variable("threshold", VariableDecl::once(0.5))
                                      .update_variable("threshold", 0.25, UpdateMode::Write)
                                      .call("uses_var", ActionKind::Prepare, [("t", Arg::var("threshold"))], |ctx, args| {
                                          let t = args.f64("t")?;
                                          ctx.vars_mut()?.set("seen_threshold", t)
                                      })
                                      .build()
                                      .expect("template");
    assert_eq!(template.prepare_prefix_len(), 0);
    let mut pipeline = template.bind(dataset(4));
    pipeline.run(&RunOptions::new(2).prefetch(2)).expect("run");
    assert_eq!(pipeline.variable("seen_threshold").and_then(Datum::as_f64), Some(0.25));
}
