//! Coasting opportunities: places where cutting traction early saves the most
//! energy for the time it costs.
//!
//! Two kinds are detected on a speed capped envelope:
//! - accelerating slopes, where a plateau is held against gravity pulling the train forward
//! - braking phases, where the train would otherwise brake from above the coasting floor
//!
//! Each opportunity is turned into a coasting part ending at its end position
//! with [`coast_from_end`].

use tracing::trace;

use crate::constraints::EnvelopePartConstraint;
use crate::envelope::Envelope;
use crate::envelope_cursor::EnvelopeCursor;
use crate::envelope_part::{EnvelopeAttr, EnvelopePart, EnvelopeProfile};
use crate::error::EnvelopeError;
use crate::overlays;
use crate::part_builder::{ConstrainedEnvelopePartBuilder, EnvelopePartBuilder, EnvelopePartConsumer};
use crate::physics::{Action, EnvelopeSimContext, PhysicsRollingStock, TrainPhysicsIntegrator};

const COASTING: EnvelopeAttr = EnvelopeAttr::Profile(EnvelopeProfile::Coasting);

/// Distance walked backward when looking for the beginning of a slope, in m
const SLOPE_START_SEARCH_STEP: f64 = 10.0;

/// Acceleration the train would have with neither traction nor brakes.
fn natural_acceleration(context: &EnvelopeSimContext, position: f64, speed: f64) -> f64 {
    TrainPhysicsIntegrator::compute_acceleration(context, position, speed, Action::Coast, 1.0).0
}

/// Position at which the acceleration changes sign, assuming it varies linearly
/// between two samples.
fn interpolate_acceleration_sign_change(
    current_accel: f64,
    previous_accel: f64,
    current_pos: f64,
    previous_pos: f64,
) -> f64 {
    if current_pos == previous_pos || current_accel == previous_accel {
        return current_pos;
    }
    let factor = (previous_accel - current_accel) / (previous_pos - current_pos);
    let y0 = previous_accel - factor * previous_pos;
    -y0 / factor
}

/// Average of a value weighted by the distance over which it applies.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DistanceAverage {
    total_distance: f64,
    weighted_sum: f64,
}

impl DistanceAverage {
    pub fn add_segment(&mut self, distance: f64, value: f64) {
        self.total_distance += distance;
        self.weighted_sum += distance * value;
    }

    pub fn average(&self) -> f64 {
        if self.total_distance == 0.0 {
            return 0.0;
        }
        self.weighted_sum / self.total_distance
    }
}

// -----------------------------------------------------------------
// Accelerating slopes

/// A portion of constant speed plateau over which the train accelerates on its own.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcceleratingSlopeCoast {
    pub begin_pos: f64,
    pub end_pos: f64,
    /// Speed of the plateau
    pub speed: f64,
    /// Mean natural acceleration over the slope
    pub slope_average_acceleration: f64,
    /// Natural acceleration right before the slope, never positive
    pub previous_acceleration_estimate: f64,
}

struct SlopeInProgress {
    begin_pos: f64,
    speed: f64,
    acceleration: DistanceAverage,
}

impl SlopeInProgress {
    fn build(self, end_pos: f64, context: &EnvelopeSimContext) -> AcceleratingSlopeCoast {
        let exact_start = find_slope_start(context, self.begin_pos, self.speed);
        // the whole train has to be past the previous slope
        let previous_pos = (exact_start - context.rolling_stock.length()).max(0.0);
        let previous_acceleration_estimate = natural_acceleration(context, previous_pos, self.speed).min(0.0);
        AcceleratingSlopeCoast {
            begin_pos: self.begin_pos,
            end_pos,
            speed: self.speed,
            slope_average_acceleration: self.acceleration.average(),
            previous_acceleration_estimate,
        }
    }
}

/// Walks back from a point with a positive natural acceleration to the point where it becomes positive.
fn find_slope_start(context: &EnvelopeSimContext, position: f64, speed: f64) -> f64 {
    let mut current_pos = position;
    let mut current_accel = natural_acceleration(context, current_pos, speed);
    loop {
        let (previous_pos, previous_accel) = (current_pos, current_accel);
        current_pos -= SLOPE_START_SEARCH_STEP;
        if current_pos <= 0.0 {
            return 0.0;
        }
        current_accel = natural_acceleration(context, current_pos, speed);
        if current_accel <= 0.0 {
            return interpolate_acceleration_sign_change(
                current_accel,
                previous_accel,
                current_pos,
                previous_pos,
            );
        }
    }
}

impl AcceleratingSlopeCoast {
    /// Scans the constant speed plateaus of `envelope` above `vf` for slopes steep enough
    /// to accelerate the train without traction.
    pub fn find_all(
        envelope: &Envelope,
        context: &EnvelopeSimContext,
        vf: f64,
    ) -> Vec<AcceleratingSlopeCoast> {
        let mut res = Vec::new();
        let mut cursor = EnvelopeCursor::forward(envelope);
        while cursor.find_part(|part| part.has_profile(EnvelopeProfile::ConstantSpeed)) {
            let part = match cursor.part() {
                Some(part) => part,
                None => break,
            };
            let speed = cursor.step_begin_speed();
            if speed > vf {
                let position_step = context.time_step * speed;
                let mut slope: Option<SlopeInProgress> = None;
                let mut position = cursor.position();
                let (mut previous_pos, mut previous_accel) = (position, f64::NAN);
                loop {
                    let acceleration = natural_acceleration(context, position, speed);
                    if acceleration > 0.0 {
                        slope
                            .get_or_insert_with(|| SlopeInProgress {
                                begin_pos: position,
                                speed,
                                acceleration: DistanceAverage::default(),
                            })
                            .acceleration
                            .add_segment(position_step, acceleration);
                    } else if let Some(finished) = slope.take() {
                        let end_pos = interpolate_acceleration_sign_change(
                            acceleration,
                            previous_accel,
                            position,
                            previous_pos,
                        );
                        res.push(finished.build(end_pos, context));
                    }
                    previous_pos = position;
                    previous_accel = acceleration;
                    position += position_step;
                    if position > part.end_pos() || !cursor.find_position(position) {
                        break;
                    }
                }
                // the slope lasts until the end of the plateau
                if let Some(finished) = slope.take() {
                    res.push(finished.build(previous_pos, context));
                }
            }
            if !cursor.next_part() {
                break;
            }
        }
        trace!(count = res.len(), "accelerating slopes found");
        res
    }

    /// The speed coasting should end at, from the MARECO energy balance.
    pub fn compute_v(&self, rolling_stock: &dyn PhysicsRollingStock, v1: f64, vf: f64) -> f64 {
        let wle = rolling_stock.rolling_resistance(v1) * v1 * vf / (v1 - vf);
        let acceleration_ratio = self.previous_acceleration_estimate / self.slope_average_acceleration;
        let speed_limit = self.speed;
        1.0 / (1.0 / speed_limit
            + rolling_stock.rolling_resistance(speed_limit) / (wle * (1.0 - acceleration_ratio)))
    }

    pub fn compute(
        &self,
        base: &Envelope,
        context: &EnvelopeSimContext,
        v1: f64,
        vf: f64,
    ) -> Result<Option<EnvelopePart>, EnvelopeError> {
        let v = self.compute_v(context.rolling_stock, v1, vf);
        coast_from_end(base, context, self.end_pos, v.max(vf))
    }
}

// -----------------------------------------------------------------
// Braking phases

/// The end of a braking phase, or the point at which it goes below the coasting floor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrakingPhaseCoast {
    pub end_pos: f64,
}

impl BrakingPhaseCoast {
    pub fn find_all(envelope: &Envelope, vf: f64) -> Vec<BrakingPhaseCoast> {
        let res: Vec<_> = envelope
            .parts()
            .iter()
            .filter(|part| part.has_profile(EnvelopeProfile::Braking))
            .filter_map(|part| {
                if part.end_speed() >= vf {
                    return Some(part.end_pos());
                }
                if part.begin_speed() <= vf {
                    return None;
                }
                part.find_speed_crossing(vf)
            })
            .map(|end_pos| BrakingPhaseCoast { end_pos })
            .collect();
        trace!(count = res.len(), "braking phases found");
        res
    }

    pub fn compute(
        &self,
        base: &Envelope,
        context: &EnvelopeSimContext,
        vf: f64,
    ) -> Result<Option<EnvelopePart>, EnvelopeError> {
        coast_from_end(base, context, self.end_pos, vf)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CoastingOpportunity {
    AcceleratingSlope(AcceleratingSlopeCoast),
    BrakingPhase(BrakingPhaseCoast),
}

impl CoastingOpportunity {
    pub fn end_position(&self) -> f64 {
        match self {
            CoastingOpportunity::AcceleratingSlope(slope) => slope.end_pos,
            CoastingOpportunity::BrakingPhase(phase) => phase.end_pos,
        }
    }

    /// The coasting part this opportunity yields, if any.
    pub fn compute(
        &self,
        base: &Envelope,
        context: &EnvelopeSimContext,
        v1: f64,
        vf: f64,
    ) -> Result<Option<EnvelopePart>, EnvelopeError> {
        match self {
            CoastingOpportunity::AcceleratingSlope(slope) => slope.compute(base, context, v1, vf),
            CoastingOpportunity::BrakingPhase(phase) => phase.compute(base, context, vf),
        }
    }
}

// -----------------------------------------------------------------
// Coasting parts

/// Builds the coasting part which ends on `envelope` at `end_pos`.
///
/// Integrates backward from the end point until meeting the envelope again or
/// reaching its beginning. When the backward curve had to be held at
/// `low_speed_limit`, it isn't a coasting curve anymore: coasting then starts
/// at the point it reached, and the part is integrated forward from there.
///
/// Returns `None` when coasting would stop the train, when the forward coast
/// overshoots the end point by more than a time step, or when nothing is left.
pub fn coast_from_end(
    envelope: &Envelope,
    context: &EnvelopeSimContext,
    end_pos: f64,
    low_speed_limit: f64,
) -> Result<Option<EnvelopePart>, EnvelopeError> {
    if !envelope.contains(end_pos) {
        return Err(EnvelopeError::PositionOutOfRange(end_pos));
    }

    let mut backward = ConstrainedEnvelopePartBuilder::new(
        EnvelopePartBuilder::new().with_attr(COASTING),
        vec![
            EnvelopePartConstraint::speed_floor(0.0),
            EnvelopePartConstraint::envelope_ceiling(envelope),
        ],
    );
    let mut position = end_pos;
    // the part hands over to the envelope right of the end point
    let mut speed = envelope.interpolate_speed_right(end_pos)?;
    if !backward.init_envelope_part(position, speed, -1.0)? {
        return Ok(None);
    }
    let mut reached_low_limit = false;
    loop {
        let step = TrainPhysicsIntegrator::step(context, position, speed, Action::Coast, -1.0);
        position += step.position_delta;
        speed = step.end_speed;
        let mut time_delta = Some(step.time_delta);
        if speed < low_speed_limit {
            speed = low_speed_limit;
            time_delta = None;
            reached_low_limit = true;
        }
        if !backward.add_step(position, speed, time_delta)? {
            break;
        }
    }

    // stopped by the null speed floor
    if backward.last_intersection() == Some(0) {
        return Ok(None);
    }
    let (last_pos, last_speed) = (backward.last_pos(), backward.last_speed());
    let part = backward.into_sink();
    if part.is_empty() {
        return Ok(None);
    }
    if !reached_low_limit {
        trace!(begin = last_pos, end = end_pos, "coasting part built backward");
        return part.build().map(Some);
    }

    // held at the low limit: coast forward from where the backward curve stopped
    let mut forward = ConstrainedEnvelopePartBuilder::new(
        EnvelopePartBuilder::new().with_attr(COASTING),
        vec![
            EnvelopePartConstraint::speed_floor(0.0),
            EnvelopePartConstraint::envelope_ceiling(envelope),
        ],
    );
    if !overlays::coast(context, &mut forward, last_pos, last_speed, 1.0)? {
        return Ok(None);
    }
    if forward.last_intersection() == Some(0) {
        return Ok(None);
    }
    let part = forward.into_sink();
    if part.is_empty() {
        return Ok(None);
    }
    let part = part.build()?;
    if part.end_pos() > end_pos + context.time_step * part.end_speed() {
        trace!(begin = last_pos, end = part.end_pos(), "forward coast overshoots its end point");
        return Ok(None);
    }
    trace!(begin = last_pos, end = part.end_pos(), "coasting part built forward");
    Ok(Some(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolling_stock::SimpleRollingStock;
    use crate::sim_path::EnvelopeSimPath;
    use approx::assert_abs_diff_eq;

    fn sampled_part(
        profile: EnvelopeProfile,
        begin: f64,
        end: f64,
        speed: impl Fn(f64) -> f64,
    ) -> EnvelopePart {
        let count = ((end - begin) / 100.0).round() as usize;
        let positions: Vec<f64> = (0..=count)
            .map(|i| begin + (end - begin) * i as f64 / count as f64)
            .collect();
        let speeds = positions.iter().map(|&x| speed(x)).collect();
        EnvelopePart::generate_times(vec![EnvelopeAttr::Profile(profile)], positions, speeds).unwrap()
    }

    /// Accelerates from 10 m/s to 30 m/s, holds it, then brakes to a stop at 5000 m.
    fn base_envelope() -> Envelope {
        Envelope::new(vec![
            sampled_part(EnvelopeProfile::Accelerating, 0.0, 2000.0, |x| (100.0 + 0.4 * x).sqrt()),
            EnvelopePart::constant(
                vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
                2000.0,
                4100.0,
                30.0,
            )
            .unwrap(),
            sampled_part(EnvelopeProfile::Braking, 4100.0, 5000.0, |x| {
                (900.0 - (x - 4100.0)).max(0.0).sqrt()
            }),
        ])
        .unwrap()
    }

    #[test]
    fn interpolates_sign_changes() {
        assert_abs_diff_eq!(interpolate_acceleration_sign_change(-1.0, 1.0, 10.0, 0.0), 5.0);
        assert_eq!(interpolate_acceleration_sign_change(-1.0, 1.0, 10.0, 10.0), 10.0);
    }

    #[test]
    fn averages_over_distance() {
        let mut average = DistanceAverage::default();
        assert_eq!(average.average(), 0.0);
        average.add_segment(10.0, 1.0);
        average.add_segment(30.0, 3.0);
        assert_abs_diff_eq!(average.average(), 2.5);
    }

    #[test]
    fn finds_braking_phases() {
        let envelope = base_envelope();
        let above = BrakingPhaseCoast::find_all(&envelope, 15.0);
        assert_eq!(above.len(), 1);
        // 900 - (x - 4100) = 225
        assert_abs_diff_eq!(above[0].end_pos, 4775.0, epsilon = 1e-6);
        assert!(BrakingPhaseCoast::find_all(&envelope, 40.0).is_empty());
    }

    #[test]
    fn finds_slopes_pulling_the_train() {
        let rolling_stock = SimpleRollingStock::standard_train();
        // a steep descent in the middle of a plateau
        let path = EnvelopeSimPath::new(6000.0, vec![0.0, 2000.0, 3000.0, 6000.0], vec![0.0, -10.0, 0.0])
            .unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = Envelope::new(vec![EnvelopePart::constant(
            vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
            0.0,
            6000.0,
            30.0,
        )
        .unwrap()])
        .unwrap();

        let slopes = AcceleratingSlopeCoast::find_all(&envelope, &context, 10.0);
        assert_eq!(slopes.len(), 1);
        let slope = slopes[0];
        assert!(slope.begin_pos > 2000.0 && slope.begin_pos <= 2200.0);
        assert!(slope.end_pos > 3000.0 && slope.end_pos < 3400.0);
        assert!(slope.slope_average_acceleration > 0.0);
        assert!(slope.previous_acceleration_estimate <= 0.0);

        let v = slope.compute_v(&rolling_stock, 30.0, 10.0);
        assert!(v > 0.0 && v < 30.0);

        // nothing to find under the coasting floor
        assert!(AcceleratingSlopeCoast::find_all(&envelope, &context, 30.0).is_empty());
    }

    #[test]
    fn coasts_backward_until_meeting_the_envelope() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(5000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = base_envelope();

        let part = coast_from_end(&envelope, &context, 4775.0, 15.0).unwrap().unwrap();
        assert!(part.has_profile(EnvelopeProfile::Coasting));
        assert_abs_diff_eq!(part.end_pos(), 4775.0);
        assert_abs_diff_eq!(part.end_speed(), 15.0, epsilon = 1e-9);
        // the part starts on the acceleration curve
        assert!(part.begin_pos() > 0.0 && part.begin_pos() < 2000.0);
        assert_abs_diff_eq!(
            part.begin_speed(),
            envelope.interpolate_speed(part.begin_pos()).unwrap(),
            epsilon = 1e-6
        );
        for (&position, &speed) in part.positions().iter().zip(part.speeds()) {
            assert!(speed <= envelope.interpolate_speed(position).unwrap() + 1e-6);
        }
    }

    #[test]
    fn coasts_from_the_envelope_begin_when_never_meeting_it() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(5000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = base_envelope().cap_speed(30.0, &[]).unwrap();
        let envelope = Envelope::new(envelope.slice(2000.0, 5000.0).unwrap()).unwrap();

        let part = coast_from_end(&envelope, &context, 4775.0, 15.0).unwrap().unwrap();
        assert_eq!(part.begin_pos(), 2000.0);
        assert!(part.begin_speed() > 15.0 && part.begin_speed() < 30.0);
        assert_eq!(part.end_pos(), 4775.0);
        assert_abs_diff_eq!(part.end_speed(), 15.0, epsilon = 1e-9);
    }

    #[test]
    fn coasting_through_a_descent_ends_on_the_end_point() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::new(6000.0, vec![0.0, 2000.0, 3000.0, 6000.0], vec![0.0, -10.0, 0.0])
            .unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = Envelope::new(vec![EnvelopePart::constant(
            vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
            0.0,
            6000.0,
            30.0,
        )
        .unwrap()])
        .unwrap();

        let part = coast_from_end(&envelope, &context, 3300.0, 0.0).unwrap().unwrap();
        assert_eq!(part.begin_pos(), 0.0);
        assert_eq!(part.end_pos(), 3300.0);
        assert_eq!(part.end_speed(), 30.0);
        assert!(part.begin_speed() < 30.0);
        assert!(part.speeds().iter().all(|&speed| speed <= 30.0 + 1e-9));
    }

    #[test]
    fn coasting_held_at_the_low_limit_restarts_forward() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::new(9000.0, vec![0.0, 5000.0, 6000.0, 9000.0], vec![0.0, -10.0, 0.0])
            .unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = Envelope::new(vec![EnvelopePart::constant(
            vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
            0.0,
            9000.0,
            30.0,
        )
        .unwrap()])
        .unwrap();

        let part = coast_from_end(&envelope, &context, 6300.0, 28.5).unwrap().unwrap();
        assert!(part.has_profile(EnvelopeProfile::Coasting));
        assert!(part.begin_pos() > 0.0 && part.begin_pos() < 5000.0);
        assert_abs_diff_eq!(part.begin_speed(), 30.0, epsilon = 1e-9);
        // catches up with the ceiling on the descent
        assert!(part.end_pos() > 5000.0 && part.end_pos() <= 6300.0 + 2.0 * 30.0);
        assert_abs_diff_eq!(part.end_speed(), 30.0, epsilon = 1e-9);
        // a free coasting curve, never pinned at the limit
        assert!(part.speeds().windows(2).all(|pair| pair[0] != pair[1]));
        assert!(part.min_speed() > 28.0);
    }

    #[test]
    fn coasting_part_ends_on_a_constant_ceiling() {
        let rolling_stock = SimpleRollingStock::standard_train();
        // climb, then descend to the end point
        let path = EnvelopeSimPath::new(5000.0, vec![0.0, 2500.0, 4000.0, 5000.0], vec![10.0, -10.0, 0.0])
            .unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = Envelope::new(vec![EnvelopePart::constant(
            vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
            0.0,
            5000.0,
            30.0,
        )
        .unwrap()])
        .unwrap();

        let part = coast_from_end(&envelope, &context, 4000.0, 0.0).unwrap().unwrap();
        assert_eq!(part.end_pos(), 4000.0);
        assert!(part.end_speed() <= 30.0);
        assert!(part.begin_pos() > 0.0 && part.begin_pos() < 2500.0);
        assert_abs_diff_eq!(part.begin_speed(), 30.0, epsilon = 1e-9);
        assert!(part.speeds().iter().all(|&speed| speed <= 30.0 + 1e-9));
        assert!(part.min_speed() < 30.0);
    }

    #[test]
    fn end_point_must_lie_on_the_envelope() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(5000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let envelope = base_envelope();
        assert_eq!(
            coast_from_end(&envelope, &context, 6000.0, 0.0),
            Err(EnvelopeError::PositionOutOfRange(6000.0))
        );
    }
}
