//! Tests for creating, training, reloading and applying restoration models

#[cfg(test)]
mod tests {
    use carekit::PipelineError;
    use carekit::data::axes::Axes;
    use carekit::io::archive::load_weights;
    use carekit::io::configuration::{
        CONFIG_FILE, HISTORY_FILE, WEIGHTS_BEST_FILE, WEIGHTS_LAST_FILE,
    };
    use carekit::io::progress::ProgressManager;
    use carekit::model::care::RestorationModel;
    use carekit::model::config::{LossKind, ModelConfig};
    use carekit::model::history::History;
    use ndarray::{Array3, Array4, Axis, s};

    fn noisy(samples: usize) -> Array4<f32> {
        Array4::from_shape_fn((samples, 1, 8, 8), |(n, _, y, x)| {
            ((n * 5 + y * 3 + x * 7) % 11) as f32 / 11.0
        })
    }

    fn small_config() -> ModelConfig {
        ModelConfig::new(&Axes::parse("SCYX").unwrap(), 1, 1)
            .with_train_loss(LossKind::Mse)
            .with_train_epochs(4)
            .with_train_steps_per_epoch(5)
            .with_train_batch_size(4)
            .with_train_learning_rate(0.01)
            .with_train_reduce_lr(None)
    }

    // Tests creating a model writes its configuration
    // Verified by creating the directory lazily during training
    #[test]
    fn test_new_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let model = RestorationModel::new(small_config(), "demo", dir.path()).unwrap();

        assert_eq!(model.name(), "demo");
        assert_eq!(model.logdir(), dir.path().join("demo"));
        assert!(model.logdir().join(CONFIG_FILE).is_file());
        assert_eq!(
            ModelConfig::load_json(&model.logdir().join(CONFIG_FILE)).unwrap(),
            *model.config()
        );
    }

    // Tests invalid names and configurations are rejected before touching disk
    // Verified by creating the directory before validating
    #[test]
    fn test_new_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RestorationModel::new(small_config(), "  ", dir.path()).is_err());
        assert!(
            RestorationModel::new(small_config().with_kernel_size(4), "bad", dir.path()).is_err()
        );
        assert!(!dir.path().join("bad").exists());
    }

    // Tests training records every metric per epoch and writes the model files
    // Verified by saving weights only at the end of training
    #[test]
    fn test_train_records_history_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = RestorationModel::new(small_config(), "demo", dir.path()).unwrap();
        let x = noisy(10);
        let y = x.mapv(|v| v * 0.5);
        let mut progress = ProgressManager::hidden();

        let history = model
            .train(
                x.slice(s![..8, .., .., ..]),
                y.slice(s![..8, .., .., ..]),
                (x.slice(s![8.., .., .., ..]), y.slice(s![8.., .., .., ..])),
                &mut progress,
            )
            .unwrap();

        assert_eq!(history.epochs(), 4);
        assert_eq!(
            history.metric_names(),
            vec!["loss", "lr", "mae", "mse", "val_loss", "val_mae", "val_mse"]
        );
        assert!(history.get("lr").unwrap().iter().all(|&lr| (lr - 0.01).abs() < 1e-12));

        let val_loss = history.get("val_loss").unwrap();
        assert!(val_loss.iter().all(|v| v.is_finite()));
        assert!(val_loss.last().unwrap() < val_loss.first().unwrap());

        let logdir = model.logdir();
        for file in [WEIGHTS_LAST_FILE, WEIGHTS_BEST_FILE, HISTORY_FILE] {
            assert!(logdir.join(file).is_file(), "{file} missing");
        }
        assert_eq!(History::load_json(&logdir.join(HISTORY_FILE)).unwrap(), history);
        assert_eq!(progress.completed_units(), 4);
    }

    // Tests a batch size above the sample count still trains
    // Verified by sampling the same index repeatedly to fill the batch
    #[test]
    fn test_train_caps_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config()
            .with_train_batch_size(64)
            .with_train_epochs(1);
        let mut model = RestorationModel::new(config, "demo", dir.path()).unwrap();
        let x = noisy(3);

        let history = model
            .train(x.view(), x.view(), (x.view(), x.view()), &mut ProgressManager::hidden())
            .unwrap();
        assert_eq!(history.epochs(), 1);
    }

    // Tests a reloaded model predicts exactly like the trained one
    // Verified by reloading the initial weights
    #[test]
    fn test_load_restores_weights() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config().with_probabilistic(true);
        let mut model = RestorationModel::new(config, "demo", dir.path()).unwrap();
        let x = noisy(6);
        let y = x.mapv(|v| 1.0 - v);
        model
            .train(x.view(), y.view(), (x.view(), y.view()), &mut ProgressManager::hidden())
            .unwrap();

        let loaded = RestorationModel::load("demo", dir.path()).unwrap();
        assert_eq!(loaded.config(), model.config());
        let best = load_weights(&model.logdir().join(WEIGHTS_BEST_FILE)).unwrap();
        assert_eq!(loaded.network().weights(), &best);
        assert!(loaded.network().scale().is_some());

        let image = x.index_axis(Axis(0), 0);
        assert_eq!(loaded.predict(image).unwrap().dim(), (1, 8, 8));
    }

    // Tests loading fails without saved weights
    // Verified by falling back to freshly initialised weights
    #[test]
    fn test_load_requires_weights() {
        let dir = tempfile::tempdir().unwrap();
        RestorationModel::new(small_config(), "demo", dir.path()).unwrap();
        assert!(RestorationModel::load("demo", dir.path()).is_err());
        assert!(RestorationModel::load("absent", dir.path()).is_err());
    }

    // Tests channel counts are checked against the configuration
    // Verified by training on whatever channels arrive
    #[test]
    fn test_train_rejects_channel_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = RestorationModel::new(small_config(), "demo", dir.path()).unwrap();
        let x = Array4::<f32>::zeros((4, 2, 8, 8));
        let y = noisy(4);

        let result = model.train(x.view(), y.view(), (x.view(), y.view()), &mut ProgressManager::hidden());
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));

        let empty = Array4::<f32>::zeros((0, 1, 8, 8));
        let result = model.train(
            y.view(),
            y.view(),
            (empty.view(), empty.view()),
            &mut ProgressManager::hidden(),
        );
        assert!(result.is_err());
    }

    // Tests prediction keeps the image shape and evaluation reports finite metrics
    // Verified by returning the batch axis from predict
    #[test]
    fn test_predict_and_evaluate() {
        let dir = tempfile::tempdir().unwrap();
        let model = RestorationModel::new(small_config(), "demo", dir.path()).unwrap();

        let image = Array3::from_elem((1, 5, 7), 0.25_f32);
        let restored = model.predict(image.view()).unwrap();
        assert_eq!(restored, image);
        assert!(model.predict(Array3::zeros((2, 5, 7)).view()).is_err());

        let x = noisy(5);
        let values = model.evaluate(x.view(), x.view()).unwrap();
        assert!(values.loss.abs() < 1e-12);
        assert!(values.mae.abs() < 1e-12);
    }
}
