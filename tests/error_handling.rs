use ndarray::Array2;
use strata::{
    ClusterAssignment, DensityError, EmptyReason, ErrorKind, IntrinsicConfig, ManifoldError, Mode,
    PipelineConfig, PipelineError, ReducerConfig, SampleError, SampleOutcome, SamplerConfig,
    TunerError, TuningConfig, demo, estimate_intrinsic_dimension, fit_pipeline, sample,
};

fn small_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_intrinsic(IntrinsicConfig::default().with_range(2, 6))
        .with_stage_one(
            ReducerConfig::stage_one(2)
                .with_n_neighbors(8)
                .with_n_epochs(30),
        )
        .with_stage_two(
            ReducerConfig::stage_two()
                .with_n_neighbors(8)
                .with_n_components(2)
                .with_n_epochs(30),
        )
        .with_tuning(
            TuningConfig::default()
                .with_min_samples(2, 6)
                .with_min_cluster_size(4, 12)
                .with_n_calls(5)
                .with_n_initial_points(3),
        )
        .with_seed(1)
}

#[test]
fn too_few_rows_is_insufficient_data() {
    let matrix = Array2::<f32>::zeros((2, 5));
    let err = estimate_intrinsic_dimension(matrix.view(), &small_config()).unwrap_err();
    assert_eq!(
        err,
        PipelineError::Manifold(ManifoldError::InsufficientData { n: 2, min: 3 })
    );
    assert_eq!(err.kind(), ErrorKind::InsufficientData);

    let err = fit_pipeline(matrix.view(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientData);
}

#[test]
fn inverted_bounds_fail_before_any_work() {
    let matrix = Array2::<f32>::zeros((1, 5));
    let cfg = small_config().with_tuning(TuningConfig::default().with_min_cluster_size(30, 5));
    // The matrix is also unusable, but configuration is checked first.
    let err = fit_pipeline(matrix.view(), &cfg).unwrap_err();
    assert!(matches!(err, PipelineError::Tuner(TunerError::InvalidConfig(_))));
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

    let bad_range = small_config().with_intrinsic(IntrinsicConfig::default().with_range(9, 3));
    let err = fit_pipeline(matrix.view(), &bad_range).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
}

#[test]
fn unknown_mode_string_is_rejected() {
    let err = "kmeans".parse::<Mode>().unwrap_err();
    assert_eq!(err, TunerError::UnknownMode("kmeans".into()));
    assert_eq!(PipelineError::from(err).kind(), ErrorKind::InvalidConfiguration);
    assert_eq!("DBCV".parse::<Mode>().unwrap(), Mode::Dbcv);
}

#[test]
fn non_finite_input_is_rejected() {
    let mut matrix = Array2::<f32>::ones((10, 3));
    for i in 0..10 {
        matrix[[i, 0]] = i as f32;
    }
    matrix[[4, 1]] = f32::NAN;
    let err = fit_pipeline(matrix.view(), &small_config()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn predicting_with_the_wrong_width_is_an_input_shape_error() {
    let (matrix, _) = demo::gaussian_blobs(2, 20, 6, 0.3, 8.0, 2);
    let pipeline = fit_pipeline(matrix.view(), &small_config()).expect("fit");

    let wrong = Array2::<f32>::zeros((3, 5));
    let err = pipeline.predict(wrong.view()).unwrap_err();
    assert_eq!(
        err,
        PipelineError::Manifold(ManifoldError::InputShape {
            expected: 6,
            got: 5
        })
    );
    assert_eq!(err.kind(), ErrorKind::InputShape);

    // An empty batch of the right width is fine.
    let empty = Array2::<f32>::zeros((0, 6));
    assert!(pipeline.predict(empty.view()).unwrap().is_empty());

    let err = pipeline
        .clusterer
        .predict(Array2::<f32>::zeros((1, 7)).view())
        .unwrap_err();
    assert_eq!(err, DensityError::InputShape { expected: 2, got: 7 });
}

#[test]
fn sampling_errors_and_degenerate_outcomes() {
    let all_noise = ClusterAssignment {
        labels: vec![-1; 6],
        probabilities: vec![0.0; 6],
    };
    let outcome = sample(&all_noise, 3, &SamplerConfig::default()).unwrap();
    assert_eq!(outcome, SampleOutcome::Empty(EmptyReason::NoClusters));
    assert!(outcome.indices().is_empty());

    let assignment = ClusterAssignment {
        labels: vec![0, 0, 1],
        probabilities: vec![0.5, 0.7, 1.0],
    };
    let err = sample(&assignment, 0, &SamplerConfig::default()).unwrap_err();
    assert_eq!(err, PipelineError::Sample(SampleError::ZeroBudget));
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

    let mismatched = ClusterAssignment {
        labels: vec![0, 0, 1],
        probabilities: vec![0.5],
    };
    let err = sample(&mismatched, 2, &SamplerConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputShape);
}
