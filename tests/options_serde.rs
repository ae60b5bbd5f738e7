use mesh_adapt::prelude::*;

#[test]
fn refine_options_round_trip_through_json() {
    let options = RefineOptions {
        split_threshold: 1.5,
        max_sweeps: 7,
        num_threads: Some(2),
        degenerate_tolerance: 1e-8,
        check_invariants: true,
    };
    let json = serde_json::to_string(&options).unwrap();
    let back: RefineOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, options);
}

#[test]
fn missing_option_fields_take_defaults() {
    let options: RefineOptions = serde_json::from_str(r#"{ "max_sweeps": 4 }"#).unwrap();
    assert_eq!(options.max_sweeps, 4);
    assert_eq!(options.split_threshold, std::f64::consts::SQRT_2);
    assert_eq!(options.num_threads, None);

    let metric: MetricOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(metric, MetricOptions::default());
}

#[test]
fn metric_tensors_serialize() {
    let m = MetricTensor::new_3d(1.0, 2.0, 3.0, 0.1, 0.2, 0.3);
    let json = serde_json::to_string(&m).unwrap();
    let back: MetricTensor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
}
