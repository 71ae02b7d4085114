//! Base envelope construction, from speed limits to a max effort run.
//!
//! 1. [`mrsp`]: the most restrictive speed profile, one constant part per speed section
//! 2. [`max_speed_envelope`]: the MRSP with braking curves before every slowdown and stop
//! 3. [`max_effort_envelope`]: accelerates, holds and brakes as hard as allowed under it

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constraints::EnvelopePartConstraint;
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::envelope_part::{EnvelopeAttr, EnvelopePart, EnvelopeProfile};
use crate::error::EnvelopeError;
use crate::overlays;
use crate::part_builder::{
    ConstrainedEnvelopePartBuilder, EnvelopePartBuilder, EnvelopePartConsumer,
    MaintainEnvelopePartBuilder,
};
use crate::physics::{are_speeds_equal, EnvelopeSimContext, PhysicsRollingStock, SPEED_EPSILON};

/// A speed limit applying over `[begin, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedSection {
    pub begin: f64,
    pub end: f64,
    /// In m/s
    pub speed: f64,
}

/// Builds the most restrictive speed profile from contiguous speed sections.
pub fn mrsp(
    sections: &[SpeedSection],
    rolling_stock: &dyn PhysicsRollingStock,
) -> Result<Envelope, EnvelopeError> {
    let mut builder = EnvelopeBuilder::new();
    for section in sections {
        if !section.speed.is_finite() || section.speed <= 0.0 {
            return Err(EnvelopeError::InvalidParameter("speed limits must be positive"));
        }
        let speed = section.speed.min(rolling_stock.max_speed());
        builder.add_part(EnvelopePart::constant(
            vec![EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)],
            section.begin,
            section.end,
            speed,
        )?);
    }
    builder.build()
}

/// Adds braking curves to the MRSP, ending at every speed decrease and at every stop.
pub fn max_speed_envelope(
    context: &EnvelopeSimContext,
    mrsp: &Envelope,
    stops: &[f64],
) -> Result<Envelope, EnvelopeError> {
    let mut targets: Vec<(f64, f64)> = mrsp
        .parts()
        .windows(2)
        .filter(|pair| pair[1].begin_speed() < pair[0].end_speed())
        .map(|pair| (pair[1].begin_pos(), pair[1].begin_speed()))
        .collect();
    for &stop in stops {
        if !mrsp.contains(stop) {
            return Err(EnvelopeError::PositionOutOfRange(stop));
        }
        targets.push((stop, 0.0));
    }
    // later targets first, so that earlier curves are built against them
    targets.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut envelope = mrsp.clone();
    for (position, speed) in targets {
        let mut builder = ConstrainedEnvelopePartBuilder::new(
            EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Braking)),
            vec![
                EnvelopePartConstraint::position_range(envelope.begin_pos(), envelope.end_pos()),
                EnvelopePartConstraint::envelope_ceiling(&envelope),
            ],
        );
        // already below a curve built for a later target
        if !overlays::decelerate(context, &mut builder, position, speed, -1.0)? {
            continue;
        }
        let part = builder.into_sink();
        if part.is_empty() {
            continue;
        }
        let part = part.build()?;
        trace!(begin = part.begin_pos(), end = position, "braking curve");
        envelope = envelope.overlay(part)?;
    }
    Ok(envelope)
}

/// Drives the train as fast as `max_speed` allows, starting at `initial_speed`.
pub fn max_effort_envelope(
    context: &EnvelopeSimContext,
    max_speed: &Envelope,
    initial_speed: f64,
) -> Result<Envelope, EnvelopeError> {
    let (begin_pos, end_pos) = (max_speed.begin_pos(), max_speed.end_pos());
    if initial_speed < 0.0 || initial_speed > max_speed.begin_speed() + SPEED_EPSILON {
        return Err(EnvelopeError::InvalidParameter(
            "initial speed must lie under the max speed envelope",
        ));
    }

    let mut builder = EnvelopeBuilder::new();
    let mut position = begin_pos;
    let mut speed = initial_speed;
    // set when a plateau couldn't be held
    let mut must_accelerate = false;
    while position < end_pos {
        let index = max_speed
            .find_right(position)
            .ok_or(EnvelopeError::PositionOutOfRange(position))?;
        let ceiling_part = max_speed.part(index);
        let ceiling_speed = ceiling_part.interpolate_speed(position);
        if are_speeds_equal(speed, ceiling_speed) {
            speed = ceiling_speed;
        }

        let part = if must_accelerate || speed < ceiling_speed {
            must_accelerate = false;
            accelerate_under(context, max_speed, position, speed)?
        } else if ceiling_part.has_profile(EnvelopeProfile::ConstantSpeed) {
            match maintain_plateau(context, position, speed, ceiling_part.end_pos())? {
                Some(part) => part,
                None => {
                    debug!(position, speed, "can't hold the plateau speed");
                    must_accelerate = true;
                    continue;
                }
            }
        } else {
            // follow the ceiling until its next part
            match ceiling_part.slice(position, Some(speed), ceiling_part.end_pos(), None) {
                Some(part) => part,
                None => break,
            }
        };
        position = part.end_pos();
        speed = part.end_speed();
        builder.add_part(part);
    }
    builder.build()
}

/// Max effort acceleration from a point until the ceiling or the end of the envelope.
fn accelerate_under(
    context: &EnvelopeSimContext,
    max_speed: &Envelope,
    position: f64,
    speed: f64,
) -> Result<EnvelopePart, EnvelopeError> {
    let mut builder = ConstrainedEnvelopePartBuilder::new(
        EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Accelerating)),
        vec![
            EnvelopePartConstraint::position_range(max_speed.begin_pos(), max_speed.end_pos()),
            EnvelopePartConstraint::speed_floor(0.0),
            EnvelopePartConstraint::envelope_ceiling(max_speed),
        ],
    );
    if !overlays::accelerate(context, &mut builder, position, speed, 1.0)? {
        return Err(EnvelopeError::InvalidParameter(
            "the train is above the max speed envelope",
        ));
    }
    if builder.last_intersection() == Some(1) {
        return Err(EnvelopeError::TrainStalled { position: builder.last_pos() });
    }
    let part = builder.into_sink();
    if part.is_empty() {
        return Err(EnvelopeError::TrainStalled { position });
    }
    part.build()
}

/// Holds `speed` until `plateau_end`. Returns `None` if the very first step can't be held.
fn maintain_plateau(
    context: &EnvelopeSimContext,
    position: f64,
    speed: f64,
    plateau_end: f64,
) -> Result<Option<EnvelopePart>, EnvelopeError> {
    let mut builder = MaintainEnvelopePartBuilder::new(
        EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed)),
        vec![
            EnvelopePartConstraint::position_range(position, plateau_end),
            EnvelopePartConstraint::speed_floor(speed - SPEED_EPSILON),
            EnvelopePartConstraint::speed_ceiling(speed + SPEED_EPSILON),
        ],
    );
    overlays::maintain(context, &mut builder, position, speed, 1.0)?;
    if builder.last_intersection() == Some(0) {
        // the rejected step overshot the plateau: finish it exactly on the end
        builder.sink_mut().add_step(plateau_end, speed, None)?;
    }
    let part = builder.into_sink();
    if part.is_empty() {
        return Ok(None);
    }
    part.build().map(Some)
}
