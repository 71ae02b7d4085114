//! Drivers feeding integration steps under a fixed action into a part consumer.
//!
//! Each driver stops only when the consumer returns false from `add_step`.
//! The consumer must carry constraints which eventually halt the part: an
//! unconstrained sink with an action that never ends is a caller bug.

use crate::error::EnvelopeError;
use crate::part_builder::EnvelopePartConsumer;
use crate::physics::{Action, EnvelopeSimContext, TrainPhysicsIntegrator};

/// Integrates `action` from the start point until the consumer halts.
/// Returns false if the consumer rejected the start point.
fn drive<C: EnvelopePartConsumer>(
    context: &EnvelopeSimContext,
    consumer: &mut C,
    start_pos: f64,
    start_speed: f64,
    action: Action,
    direction: f64,
) -> Result<bool, EnvelopeError> {
    if !consumer.init_envelope_part(start_pos, start_speed, direction)? {
        return Ok(false);
    }
    let mut position = start_pos;
    let mut speed = start_speed;
    loop {
        let step = TrainPhysicsIntegrator::step(context, position, speed, action, direction);
        position += step.position_delta;
        speed = step.end_speed;
        if !consumer.add_step(position, speed, Some(step.time_delta))? {
            return Ok(true);
        }
    }
}

/// Max effort acceleration.
pub fn accelerate<C: EnvelopePartConsumer>(
    context: &EnvelopeSimContext,
    consumer: &mut C,
    start_pos: f64,
    start_speed: f64,
    direction: f64,
) -> Result<bool, EnvelopeError> {
    drive(context, consumer, start_pos, start_speed, Action::Accelerate, direction)
}

/// Max braking. Run backward from a target point to get a braking curve.
pub fn decelerate<C: EnvelopePartConsumer>(
    context: &EnvelopeSimContext,
    consumer: &mut C,
    start_pos: f64,
    start_speed: f64,
    direction: f64,
) -> Result<bool, EnvelopeError> {
    drive(context, consumer, start_pos, start_speed, Action::Brake, direction)
}

pub fn coast<C: EnvelopePartConsumer>(
    context: &EnvelopeSimContext,
    consumer: &mut C,
    start_pos: f64,
    start_speed: f64,
    direction: f64,
) -> Result<bool, EnvelopeError> {
    drive(context, consumer, start_pos, start_speed, Action::Coast, direction)
}

/// Holds the current speed while traction or brakes allow it.
pub fn maintain<C: EnvelopePartConsumer>(
    context: &EnvelopeSimContext,
    consumer: &mut C,
    start_pos: f64,
    start_speed: f64,
    direction: f64,
) -> Result<bool, EnvelopeError> {
    drive(context, consumer, start_pos, start_speed, Action::Maintain, direction)
}
