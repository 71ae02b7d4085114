mod common;

use common::*;
use train_envelope::{
    Allowance, AllowanceAlgorithm, AllowanceDistribution, AllowanceRange, AllowanceValue,
    EnvelopeProfile, EnvelopeSimContext, SimpleRollingStock, SpeedSection,
};

#[test]
fn mareco_on_a_max_effort_run() {
    let rolling_stock = SimpleRollingStock::standard_train();
    let path = flat_path();
    let context = EnvelopeSimContext::new(&rolling_stock, &path, TIME_STEP).unwrap();
    let base = max_effort(&context, &rolling_stock, &single_limit(30.0), &[PATH_LENGTH]);

    let allowance =
        Allowance::mareco(0.0, PATH_LENGTH, AllowanceValue::Percentage { percentage: 10.0 }).unwrap();
    let target = base.total_time() * 1.1;
    let result = allowance.apply(&base, &context).unwrap();

    assert!((result.total_time() - target).abs() <= TIME_STEP + 1e-6);
    assert!(result.is_continuous());
    assert_eq!(result.begin_speed(), 0.0);
    assert_eq!(result.end_speed(), 0.0);
    assert_below(&result, &base);
    assert!(result
        .parts()
        .iter()
        .any(|part| part.has_profile(EnvelopeProfile::Coasting)));
}

#[test]
fn linear_on_a_max_effort_run() {
    let rolling_stock = SimpleRollingStock::standard_train();
    let path = flat_path();
    let context = EnvelopeSimContext::new(&rolling_stock, &path, TIME_STEP).unwrap();
    let base = max_effort(&context, &rolling_stock, &single_limit(30.0), &[PATH_LENGTH]);

    let allowance = Allowance::linear(0.0, PATH_LENGTH, AllowanceValue::FixedTime { seconds: 40.0 }).unwrap();
    let result = allowance.apply(&base, &context).unwrap();

    assert!((result.total_time() - base.total_time() - 40.0).abs() <= TIME_STEP + 1e-6);
    assert!(result.is_continuous());
    assert_below(&result, &base);
}

#[test]
fn each_range_gets_its_own_share() {
    let rolling_stock = SimpleRollingStock::standard_train();
    let path = flat_path();
    let context = EnvelopeSimContext::new(&rolling_stock, &path, TIME_STEP).unwrap();
    let base = max_effort(&context, &rolling_stock, &single_limit(30.0), &[PATH_LENGTH]);

    let allowance = Allowance::new(
        0.0,
        PATH_LENGTH,
        0.0,
        vec![
            AllowanceRange::new(0.0, 5000.0, AllowanceValue::Percentage { percentage: 5.0 }),
            AllowanceRange::new(5000.0, PATH_LENGTH, AllowanceValue::Percentage { percentage: 15.0 }),
        ],
        AllowanceAlgorithm::Mareco,
        AllowanceDistribution::TimeRatio,
    )
    .unwrap();
    let target = base.total_time() + allowance.added_time(&base).unwrap();
    let result = allowance.apply(&base, &context).unwrap();

    assert!((result.total_time() - target).abs() <= 2.0 * TIME_STEP + 1e-6);
    assert!(result.is_continuous());
    let first_half = base.time_between(0.0, 5000.0).unwrap();
    assert!(result.time_between(0.0, 5000.0).unwrap() > first_half);
}

#[test]
fn intermediate_stops_split_the_allowance() {
    let rolling_stock = SimpleRollingStock::standard_train();
    let path = flat_path();
    let context = EnvelopeSimContext::new(&rolling_stock, &path, TIME_STEP).unwrap();
    let base = max_effort(&context, &rolling_stock, &single_limit(30.0), &[5000.0, PATH_LENGTH]);
    assert!(base.interpolate_speed(5000.0).unwrap().abs() < 1e-9);

    let allowance =
        Allowance::mareco(0.0, PATH_LENGTH, AllowanceValue::Percentage { percentage: 8.0 }).unwrap();
    let target = base.total_time() * 1.08;
    let result = allowance.apply(&base, &context).unwrap();

    assert!((result.total_time() - target).abs() <= TIME_STEP + 1e-6);
    assert!(result.is_continuous());
    assert!(result.interpolate_speed(5000.0).unwrap().abs() < 1e-9);
}

#[test]
fn partial_allowance_keeps_the_rest_of_the_run() {
    let rolling_stock = SimpleRollingStock::standard_train();
    let path = flat_path();
    let context = EnvelopeSimContext::new(&rolling_stock, &path, TIME_STEP).unwrap();
    let sections = vec![
        SpeedSection { begin: 0.0, end: 6000.0, speed: 30.0 },
        SpeedSection { begin: 6000.0, end: PATH_LENGTH, speed: 25.0 },
    ];
    let base = max_effort(&context, &rolling_stock, &sections, &[PATH_LENGTH]);

    let allowance = Allowance::mareco(0.0, 4000.0, AllowanceValue::FixedTime { seconds: 10.0 }).unwrap();
    let result = allowance.apply(&base, &context).unwrap();

    assert!(result.is_continuous());
    assert!((result.total_time() - base.total_time() - 10.0).abs() <= TIME_STEP + 1e-6);
    let tail_time = base.time_between(6000.0, PATH_LENGTH).unwrap();
    assert!((result.time_between(6000.0, PATH_LENGTH).unwrap() - tail_time).abs() < 1e-6);
}
