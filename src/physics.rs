use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// Positions closer than this are treated as identical samples.
pub const POSITION_EPSILON: f64 = 1e-6;
/// Speeds closer than this are treated as identical samples.
pub const SPEED_EPSILON: f64 = 1e-5;
/// Accelerations below this are treated as zero when solving step times.
pub const ACCELERATION_EPSILON: f64 = 1e-5;

pub const GRAVITY: f64 = 9.81;
pub const DEFAULT_TIME_STEP: f64 = 2.0;

pub fn are_speeds_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < SPEED_EPSILON
}

pub fn are_positions_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < POSITION_EPSILON
}

/// Driver action applied over one integration step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Accelerate,
    Brake,
    Coast,
    Maintain,
}

/// How the braking capability of a rolling stock is expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GammaType {
    /// Constant deceleration, whatever the slope and resistance.
    Const,
    /// Maximum braking force, combined with the other forces.
    Max,
}

/// Physical capabilities of a train, as seen by the integrator.
pub trait PhysicsRollingStock {
    /// Mass in kg
    fn mass(&self) -> f64;
    /// Mass times the rotating mass coefficient, in kg
    fn inertia(&self) -> f64;
    /// Length in m
    fn length(&self) -> f64;
    /// Maximum speed in m/s
    fn max_speed(&self) -> f64;
    /// Resistance to movement at a given speed, in N. Always positive.
    fn rolling_resistance(&self, speed: f64) -> f64;
    /// Derivative of the resistance with respect to speed
    fn rolling_resistance_deriv(&self, speed: f64) -> f64;
    /// Maximum traction force at a given speed, in N
    fn max_traction_force(&self, speed: f64) -> f64;
    /// Maximum braking force at a given speed, in N
    fn max_braking_force(&self, speed: f64) -> f64;
    /// Deceleration used for constant braking, in m/s², positive
    fn deceleration(&self) -> f64;
    fn gamma_type(&self) -> GammaType;
}

/// Track geometry as seen by the integrator.
pub trait PhysicsPath {
    fn length(&self) -> f64;
    /// Average grade between two positions, in m/km
    fn average_grade(&self, begin: f64, end: f64) -> f64;
}

/// Everything the integrator needs besides the current state.
#[derive(Clone, Copy)]
pub struct EnvelopeSimContext<'a> {
    pub rolling_stock: &'a dyn PhysicsRollingStock,
    pub path: &'a dyn PhysicsPath,
    pub time_step: f64,
}

impl<'a> EnvelopeSimContext<'a> {
    pub fn new(
        rolling_stock: &'a dyn PhysicsRollingStock,
        path: &'a dyn PhysicsPath,
        time_step: f64,
    ) -> Result<Self, EnvelopeError> {
        if !time_step.is_finite() || time_step <= 0.0 {
            return Err(EnvelopeError::InvalidParameter("time step must be positive"));
        }
        Ok(Self {
            rolling_stock,
            path,
            time_step,
        })
    }

    pub fn with_time_step(&self, time_step: f64) -> Result<Self, EnvelopeError> {
        Self::new(self.rolling_stock, self.path, time_step)
    }
}

/// Result of a single integration step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrationStep {
    pub time_delta: f64,
    /// Signed: negative when integrating backward
    pub position_delta: f64,
    pub end_speed: f64,
    pub acceleration: f64,
    pub traction_force: f64,
}

/// Numerical integration of train movement.
pub struct TrainPhysicsIntegrator;

impl TrainPhysicsIntegrator {
    /// Integrates one time step with the given action using a Runge-Kutta 4 mean acceleration.
    /// `direction_sign` is +1 to move forward in time, -1 to move backward.
    pub fn step(
        context: &EnvelopeSimContext,
        position: f64,
        speed: f64,
        action: Action,
        direction_sign: f64,
    ) -> IntegrationStep {
        let half_step = context.time_step / 2.0;
        let full_step = context.time_step;

        let k1 = Self::rk_step(context, position, speed, speed, action, half_step, direction_sign);
        let k2 = Self::rk_step(
            context,
            position + k1.position_delta,
            speed,
            k1.end_speed,
            action,
            half_step,
            direction_sign,
        );
        let k3 = Self::rk_step(
            context,
            position + k2.position_delta,
            speed,
            k2.end_speed,
            action,
            full_step,
            direction_sign,
        );
        let k4 = Self::rk_step(
            context,
            position + k3.position_delta,
            speed,
            k3.end_speed,
            action,
            full_step,
            direction_sign,
        );

        let mean_acceleration =
            (k1.acceleration + 2.0 * k2.acceleration + 2.0 * k3.acceleration + k4.acceleration) / 6.0;
        let mean_traction =
            (k1.traction_force + 2.0 * k2.traction_force + 2.0 * k3.traction_force + k4.traction_force)
                / 6.0;
        Self::newton_step(full_step, speed, mean_acceleration, mean_traction, direction_sign)
    }

    /// Evaluates the acceleration at an intermediate state, then steps from the initial speed with it.
    fn rk_step(
        context: &EnvelopeSimContext,
        eval_position: f64,
        initial_speed: f64,
        eval_speed: f64,
        action: Action,
        time_step: f64,
        direction_sign: f64,
    ) -> IntegrationStep {
        let eval_position = eval_position.clamp(0.0, context.path.length());
        let (acceleration, traction) =
            Self::compute_acceleration(context, eval_position, eval_speed, action, direction_sign);
        Self::newton_step(time_step, initial_speed, acceleration, traction, direction_sign)
    }

    /// Constant acceleration step. Stops at zero speed rather than going negative.
    fn newton_step(
        time_step: f64,
        speed: f64,
        acceleration: f64,
        traction_force: f64,
        direction_sign: f64,
    ) -> IntegrationStep {
        let mut time_delta = time_step;
        let mut end_speed = speed + direction_sign * acceleration * time_step;

        if end_speed < 0.0 || (speed > 0.0 && end_speed < SPEED_EPSILON) {
            time_delta = if speed == 0.0 || acceleration.abs() < ACCELERATION_EPSILON {
                0.0
            } else {
                -speed / (direction_sign * acceleration)
            };
            end_speed = 0.0;
        }

        // dx = v * dt + a * dt² / 2
        let mut position_delta =
            direction_sign * speed * time_delta + 0.5 * acceleration * time_delta * time_delta;
        if position_delta.abs() < POSITION_EPSILON {
            position_delta = 0.0;
        }

        IntegrationStep {
            time_delta,
            position_delta,
            end_speed,
            acceleration,
            traction_force,
        }
    }

    /// Returns the acceleration and the traction force applied for an action.
    pub fn compute_acceleration(
        context: &EnvelopeSimContext,
        position: f64,
        speed: f64,
        action: Action,
        direction_sign: f64,
    ) -> (f64, f64) {
        let rolling_stock = context.rolling_stock;

        if action == Action::Brake && rolling_stock.gamma_type() == GammaType::Const {
            return (-rolling_stock.deceleration(), 0.0);
        }

        let weight_force = Self::weight_force(context, position);
        let resistance = rolling_stock.rolling_resistance(speed);
        let inertia = rolling_stock.inertia();

        let (traction, braking) = match action {
            Action::Accelerate => (rolling_stock.max_traction_force(speed), 0.0),
            Action::Coast => (0.0, 0.0),
            Action::Brake => (0.0, rolling_stock.max_braking_force(speed)),
            Action::Maintain => {
                // force needed for a zero acceleration
                let required = resistance - weight_force;
                if required >= 0.0 {
                    let max_traction = rolling_stock.max_traction_force(speed);
                    if required <= max_traction {
                        return (0.0, required);
                    }
                    (max_traction, 0.0)
                } else {
                    let max_braking = rolling_stock.max_braking_force(speed);
                    if -required <= max_braking {
                        return (0.0, 0.0);
                    }
                    (0.0, max_braking)
                }
            }
        };

        // forces that always oppose movement
        let opposite_force = resistance + braking;
        // a stopped train only starts moving if the other forces overcome the opposing ones
        if speed == 0.0 && direction_sign > 0.0 && (traction + weight_force).abs() < opposite_force {
            return (0.0, traction);
        }
        ((traction + weight_force - opposite_force) / inertia, traction)
    }

    /// Gravity component along the track, averaged over the train length behind the head.
    pub fn weight_force(context: &EnvelopeSimContext, head_position: f64) -> f64 {
        let path_length = context.path.length();
        let end = head_position.clamp(0.0, path_length);
        let begin = (head_position - context.rolling_stock.length()).clamp(0.0, path_length);
        let grade = context.path.average_grade(begin, end);
        // m/km to m/m
        let angle = (grade / 1000.0).atan();
        -context.rolling_stock.mass() * GRAVITY * angle.sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolling_stock::SimpleRollingStock;
    use crate::sim_path::EnvelopeSimPath;

    #[test]
    fn rejects_non_positive_time_step() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(1000.0).unwrap();
        assert!(EnvelopeSimContext::new(&rolling_stock, &path, 0.0).is_err());
        assert!(EnvelopeSimContext::new(&rolling_stock, &path, -1.0).is_err());
        assert!(EnvelopeSimContext::new(&rolling_stock, &path, f64::NAN).is_err());
    }

    #[test]
    fn step_is_deterministic() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::new(5000.0, vec![0.0, 2000.0, 5000.0], vec![0.0, 8.0]).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        for action in [Action::Accelerate, Action::Brake, Action::Coast, Action::Maintain] {
            let first = TrainPhysicsIntegrator::step(&context, 1900.0, 30.0, action, 1.0);
            let second = TrainPhysicsIntegrator::step(&context, 1900.0, 30.0, action, 1.0);
            assert_eq!(first.end_speed.to_bits(), second.end_speed.to_bits());
            assert_eq!(first.position_delta.to_bits(), second.position_delta.to_bits());
            assert_eq!(first.time_delta.to_bits(), second.time_delta.to_bits());
        }
    }

    #[test]
    fn coasting_on_flat_track_stops_exactly() {
        let mut rolling_stock = SimpleRollingStock::standard_train();
        rolling_stock.a = 0.5 * rolling_stock.mass;
        let path = EnvelopeSimPath::flat(100_000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();

        let mut position = 0.0;
        let mut speed = 20.0;
        let mut stopped = false;
        for _ in 0..60 {
            let step = TrainPhysicsIntegrator::step(&context, position, speed, Action::Coast, 1.0);
            assert!(step.end_speed >= 0.0);
            if speed > 0.0 {
                assert!(step.end_speed < speed);
            } else {
                assert_eq!(step.end_speed, 0.0);
            }
            position += step.position_delta;
            speed = step.end_speed;
            if speed == 0.0 {
                stopped = true;
            }
        }
        assert!(stopped);
        assert_eq!(speed, 0.0);
    }

    #[test]
    fn backward_braking_gains_speed() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(10_000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let step = TrainPhysicsIntegrator::step(&context, 5000.0, 0.0, Action::Brake, -1.0);
        assert!(step.position_delta < 0.0);
        assert!(step.end_speed > 0.0);
        assert_eq!(step.time_delta, 2.0);
    }

    #[test]
    fn maintain_holds_speed_on_flat_track() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(10_000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let step = TrainPhysicsIntegrator::step(&context, 1000.0, 40.0, Action::Maintain, 1.0);
        assert_eq!(step.acceleration, 0.0);
        assert_eq!(step.end_speed, 40.0);
        assert_eq!(step.position_delta, 80.0);
    }

    #[test]
    fn stopped_train_stays_still_without_traction() {
        let rolling_stock = SimpleRollingStock::standard_train();
        let path = EnvelopeSimPath::flat(10_000.0).unwrap();
        let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0).unwrap();
        let step = TrainPhysicsIntegrator::step(&context, 1000.0, 0.0, Action::Coast, 1.0);
        assert_eq!(step.end_speed, 0.0);
        assert_eq!(step.position_delta, 0.0);
    }
}
