//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use train_envelope::{
    max_effort_envelope, max_speed_envelope, mrsp, Envelope, EnvelopeSimContext, EnvelopeSimPath,
    SimpleRollingStock, SpeedSection,
};

pub const TIME_STEP: f64 = 2.0;
pub const PATH_LENGTH: f64 = 10_000.0;

pub fn flat_path() -> EnvelopeSimPath {
    EnvelopeSimPath::flat(PATH_LENGTH).unwrap()
}

pub fn single_limit(speed: f64) -> Vec<SpeedSection> {
    vec![SpeedSection {
        begin: 0.0,
        end: PATH_LENGTH,
        speed,
    }]
}

/// Max effort run from a standstill, stopping at every position of `stops`.
pub fn max_effort(
    context: &EnvelopeSimContext,
    rolling_stock: &SimpleRollingStock,
    sections: &[SpeedSection],
    stops: &[f64],
) -> Envelope {
    let limits = mrsp(sections, rolling_stock).unwrap();
    let max_speed = max_speed_envelope(context, &limits, stops).unwrap();
    max_effort_envelope(context, &max_speed, 0.0).unwrap()
}

/// Asserts that `envelope` never goes faster than `ceiling`.
pub fn assert_below(envelope: &Envelope, ceiling: &Envelope) {
    for point in envelope.iterate_points() {
        let limit = ceiling.interpolate_speed(point.position).unwrap();
        assert!(
            point.speed <= limit + 1e-3,
            "{} m/s above {} m/s at {} m",
            point.speed,
            limit,
            point.position
        );
    }
}
