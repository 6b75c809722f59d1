//! Escenario completo: entrenar en un pipeline, importar el modelo en otro
//! para evaluar, guardar y recargar.

use std::sync::Arc;

use flow_adapters::{accuracy, ImagesTemplateExt, SoftmaxClassifierFactory};
use flow_core::{Arg, Datum, InMemoryDataset, ModelFactory, ModelHandle, ModelState, PipelineError, ResetPolicy, RunOptions,
                SaveTo, Template, VariableDecl};
use ndarray::Array;
use serde_json::json;

/// Dos clases separables: la clase 0 enciende el píxel superior izquierdo,
/// la clase 1 el inferior derecho.
fn two_class_images(n: usize) -> InMemoryDataset {
    let images = Array::from_shape_fn((n, 2, 2), |(i, r, c)| {
                     let class = i % 2;
                     let hot = (class == 0 && r == 0 && c == 0) || (class == 1 && r == 1 && c == 1);
                     if hot {
                         255.0
                     } else {
                         (i % 7) as f32
                     }
                 }).into_dyn();
    let labels = Array::from_shape_fn(n, |i| (i % 2) as f32).into_dyn();
    InMemoryDataset::from_images(images, labels).expect("dataset")
}

fn train_template(factory: Arc<dyn ModelFactory>) -> Template {
    Template::builder().config("model_config", json!({"input_size": 4, "num_classes": 2, "learning_rate": 0.5, "seed": 7}))
                       .init_variable("loss_history", VariableDecl::list(ResetPolicy::Once))
                       .normalize("images", 255.0)
                       .reshape("images", &[4])
                       .init_model("conv_nn", factory, Arg::config("model_config"))
                       .train_model("conv_nn",
                                    [("images", Arg::batch("images")), ("labels", Arg::batch("labels"))],
                                    &["loss"],
                                    [SaveTo::append("loss_history")])
                       .build()
                       .expect("train template")
}

fn test_template() -> Template {
    Template::builder().init_variable("predictions", VariableDecl::list(ResetPolicy::EveryRun))
                       .normalize("images", 255.0)
                       .reshape("images", &[4])
                       .import_model("conv_nn")
                       .predict_model("conv_nn",
                                      [("images", Arg::batch("images"))],
                                      &["predictions"],
                                      [SaveTo::extend("predictions")])
                       .build()
                       .expect("test template")
}

#[test]
fn train_then_import_for_evaluation() {
    let (train_set, test_set) = two_class_images(200).split(0.8, Some(3)).expect("split");
    let mut train = train_template(Arc::new(SoftmaxClassifierFactory)).bind(train_set);
    let summary = train.run(&RunOptions::new(16).shuffle(true).seed(1).n_epochs(5)).expect("train run");
    assert_eq!(summary.batches, 5 * 10);
    assert_eq!(train.variable("loss_history").map(Datum::len), Some(50));

    let owner = train.model("conv_nn").expect("trained model");
    assert_eq!(owner.state(), Ok(ModelState::Updated));
    let steps_before = owner.train_steps().expect("steps");

    let mut test = test_template().bind(test_set.clone());
    test.import_model("conv_nn", &train).expect("import");
    test.run(&RunOptions::new(7)).expect("test run");

    let predictions = test.variable("predictions").expect("predictions").to_tensor().expect("tensor");
    assert_eq!(predictions.len(), 40);
    let labels = flow_core::DataSource::fetch(&test_set, &(0..40).collect::<Vec<_>>()).expect("fetch")
                                                                                    .labels()
                                                                                    .cloned()
                                                                                    .expect("labels");
    assert!(accuracy(&predictions, &labels).expect("accuracy") > 0.9);

    // Predecir con el modelo importado no lo altera.
    assert_eq!(owner.train_steps(), Ok(steps_before));
    assert_eq!(owner.state(), Ok(ModelState::Updated));
    assert!(test.model("conv_nn").expect("imported").ptr_eq(&owner));
}

#[test]
fn training_an_imported_model_is_rejected() {
    let mut train = train_template(Arc::new(SoftmaxClassifierFactory)).bind(two_class_images(32));
    train.run(&RunOptions::new(8)).expect("train run");

    let retrain = Template::builder().import_model("conv_nn")
                                     .train_model("conv_nn",
                                                  [("images", Arg::batch("images")), ("labels", Arg::batch("labels"))],
                                                  &["loss"],
                                                  [SaveTo::write("loss")])
                                     .build()
                                     .expect("template");
    let mut other = retrain.bind(two_class_images(8));
    other.import_model("conv_nn", &train).expect("import");
    let err = other.run(&RunOptions::new(4)).unwrap_err();
    let PipelineError::ActionFailed { action, batch_index, .. } = &err else { panic!("expected ActionFailed, got {err:?}") };
    assert_eq!(action, "train_model:conv_nn");
    assert_eq!(*batch_index, 0);
    assert!(matches!(err.root(), PipelineError::ModelState { .. }));
}

#[test]
fn predict_without_model_fails_with_model_state() {
    let template = Template::builder().predict_model("conv_nn",
                                                     [("images", Arg::batch("images"))],
                                                     &["predictions"],
                                                     [SaveTo::write("p")])
                                      .build()
                                      .expect("template");
    let err = template.bind(two_class_images(4)).run(&RunOptions::new(2)).unwrap_err();
    assert!(matches!(err.root(), PipelineError::ModelState { .. }));
}

#[test]
fn save_and_load_reproduce_predictions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("models/conv_nn.json");
    let factory = SoftmaxClassifierFactory;

    let template = train_template(Arc::new(factory)).to_builder()
                                                   .save_model("conv_nn", Arg::config("model_path"))
                                                   .config("model_path", path.to_string_lossy().to_string())
                                                   .build()
                                                   .expect("template");
    let mut train = template.bind(two_class_images(64));
    train.run(&RunOptions::new(64)).expect("train run");
    let owner = train.model("conv_nn").expect("model");
    assert_eq!(owner.state(), Ok(ModelState::Persisted));

    let reloaded = ModelHandle::load("conv_nn", &factory, &path).expect("load");
    let dataset = two_class_images(10);

    let mut a = test_template().bind(dataset.clone());
    a.import_model("conv_nn", &train).expect("import owner");
    a.run(&RunOptions::new(5)).expect("run a");

    let mut b = test_template().bind(dataset);
    b.import_handle("conv_nn", &reloaded).expect("import reloaded");
    b.run(&RunOptions::new(5)).expect("run b");

    assert_eq!(a.variable("predictions"), b.variable("predictions"));
    assert_eq!(a.variable("predictions").map(Datum::len), Some(10));
}
