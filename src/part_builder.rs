use crate::constraints::{EnvelopePartConstraint, Intersection};
use crate::envelope_part::{EnvelopeAttr, EnvelopePart};
use crate::envelope_physics::compute_step_time;
use crate::error::EnvelopeError;
use crate::physics::POSITION_EPSILON;

/// Receives the samples of a part, one step at a time.
pub trait EnvelopePartConsumer {
    /// Starts a new part. Returns false if the first sample is rejected.
    fn init_envelope_part(
        &mut self,
        position: f64,
        speed: f64,
        direction: f64,
    ) -> Result<bool, EnvelopeError>;

    /// Adds a step ending at `position`. Returns false once no more steps should be added.
    fn add_step(
        &mut self,
        position: f64,
        speed: f64,
        time_delta: Option<f64>,
    ) -> Result<bool, EnvelopeError>;
}

impl<T: EnvelopePartConsumer + ?Sized> EnvelopePartConsumer for &mut T {
    fn init_envelope_part(
        &mut self,
        position: f64,
        speed: f64,
        direction: f64,
    ) -> Result<bool, EnvelopeError> {
        (**self).init_envelope_part(position, speed, direction)
    }

    fn add_step(
        &mut self,
        position: f64,
        speed: f64,
        time_delta: Option<f64>,
    ) -> Result<bool, EnvelopeError> {
        (**self).add_step(position, speed, time_delta)
    }
}

// -----------------------------------------------------------------
// Raw builder

/// Accumulates samples into an envelope part, whatever the construction direction.
#[derive(Clone, Debug, Default)]
pub struct EnvelopePartBuilder {
    attrs: Vec<EnvelopeAttr>,
    direction: f64,
    positions: Vec<f64>,
    speeds: Vec<f64>,
    time_deltas: Vec<f64>,
}

impl EnvelopePartBuilder {
    pub fn new() -> Self {
        Self {
            direction: 1.0,
            ..Self::default()
        }
    }

    pub fn set_attr(&mut self, attr: EnvelopeAttr) {
        self.attrs.push(attr);
    }

    pub fn with_attr(mut self, attr: EnvelopeAttr) -> Self {
        self.set_attr(attr);
        self
    }

    pub fn step_count(&self) -> usize {
        self.time_deltas.len()
    }

    /// True until at least one step was added.
    pub fn is_empty(&self) -> bool {
        self.time_deltas.is_empty()
    }

    pub fn last_pos(&self) -> Option<f64> {
        self.positions.last().copied()
    }

    pub fn last_speed(&self) -> Option<f64> {
        self.speeds.last().copied()
    }

    /// Finalizes the part, in increasing position order.
    pub fn build(mut self) -> Result<EnvelopePart, EnvelopeError> {
        if self.direction < 0.0 {
            self.positions.reverse();
            self.speeds.reverse();
            self.time_deltas.reverse();
        }
        EnvelopePart::new(self.attrs, self.positions, self.speeds, self.time_deltas)
    }
}

impl EnvelopePartConsumer for EnvelopePartBuilder {
    fn init_envelope_part(
        &mut self,
        position: f64,
        speed: f64,
        direction: f64,
    ) -> Result<bool, EnvelopeError> {
        self.direction = direction;
        self.positions.clear();
        self.speeds.clear();
        self.time_deltas.clear();
        self.positions.push(position);
        self.speeds.push(speed);
        Ok(true)
    }

    fn add_step(
        &mut self,
        position: f64,
        speed: f64,
        time_delta: Option<f64>,
    ) -> Result<bool, EnvelopeError> {
        let (last_pos, last_speed) = match (self.last_pos(), self.last_speed()) {
            (Some(pos), Some(speed)) => (pos, speed),
            _ => return Err(EnvelopeError::InvalidPart("step added before init")),
        };
        // zero length steps can't be stored
        if (position - last_pos).abs() < POSITION_EPSILON {
            return Ok(true);
        }
        let time_delta =
            time_delta.unwrap_or_else(|| compute_step_time(last_pos, position, last_speed, speed));
        self.positions.push(position);
        self.speeds.push(speed);
        self.time_deltas.push(time_delta);
        Ok(true)
    }
}

// -----------------------------------------------------------------
// Constrained builders

/// Finds the first crossing of a step among all constraints, in travel direction.
/// On ties, the constraint declared first wins.
fn nearest_intersection(
    constraints: &mut [EnvelopePartConstraint],
    direction: f64,
    start: (f64, f64),
    end: (f64, f64),
) -> Result<Option<(usize, Intersection)>, EnvelopeError> {
    let mut nearest: Option<(usize, Intersection)> = None;
    for (index, constraint) in constraints.iter_mut().enumerate() {
        let intersection = match constraint.step_check(start.0, start.1, end.0, end.1)? {
            Some(intersection) => intersection,
            None => continue,
        };
        let closer = match &nearest {
            Some((_, best)) => direction * (intersection.position - best.position) < 0.0,
            None => true,
        };
        if closer {
            nearest = Some((index, intersection));
        }
    }
    Ok(nearest)
}

fn init_constraints(
    constraints: &mut [EnvelopePartConstraint],
    position: f64,
    speed: f64,
    direction: f64,
) -> bool {
    constraints
        .iter_mut()
        .all(|constraint| constraint.init_check(position, speed, direction))
}

/// Forwards steps to a sink until one crosses a constraint, which truncates
/// the step at the crossing and ends the part.
pub struct ConstrainedEnvelopePartBuilder<'a, S> {
    sink: S,
    constraints: Vec<EnvelopePartConstraint<'a>>,
    direction: f64,
    last_pos: f64,
    last_speed: f64,
    /// Index of the constraint which ended the part
    last_intersection: Option<usize>,
}

impl<'a, S: EnvelopePartConsumer> ConstrainedEnvelopePartBuilder<'a, S> {
    pub fn new(sink: S, constraints: Vec<EnvelopePartConstraint<'a>>) -> Self {
        Self {
            sink,
            constraints,
            direction: 1.0,
            last_pos: f64::NAN,
            last_speed: f64::NAN,
            last_intersection: None,
        }
    }

    pub fn last_intersection(&self) -> Option<usize> {
        self.last_intersection
    }

    pub fn last_pos(&self) -> f64 {
        self.last_pos
    }

    pub fn last_speed(&self) -> f64 {
        self.last_speed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<'a, S: EnvelopePartConsumer> EnvelopePartConsumer for ConstrainedEnvelopePartBuilder<'a, S> {
    fn init_envelope_part(
        &mut self,
        position: f64,
        speed: f64,
        direction: f64,
    ) -> Result<bool, EnvelopeError> {
        self.direction = direction;
        self.last_intersection = None;
        if !init_constraints(&mut self.constraints, position, speed, direction) {
            return Ok(false);
        }
        self.last_pos = position;
        self.last_speed = speed;
        self.sink.init_envelope_part(position, speed, direction)
    }

    fn add_step(
        &mut self,
        position: f64,
        speed: f64,
        time_delta: Option<f64>,
    ) -> Result<bool, EnvelopeError> {
        let nearest = nearest_intersection(
            &mut self.constraints,
            self.direction,
            (self.last_pos, self.last_speed),
            (position, speed),
        )?;
        let (index, intersection) = match nearest {
            Some(found) => found,
            None => {
                self.last_pos = position;
                self.last_speed = speed;
                return self.sink.add_step(position, speed, time_delta);
            }
        };

        self.last_intersection = Some(index);
        let time_delta = if intersection.position == position && intersection.speed == speed {
            time_delta
        } else {
            None
        };
        self.last_pos = intersection.position;
        self.last_speed = intersection.speed;
        self.sink
            .add_step(intersection.position, intersection.speed, time_delta)?;
        Ok(false)
    }
}

/// Forwards steps to a sink, rejecting the whole step as soon as it would cross a constraint.
pub struct MaintainEnvelopePartBuilder<'a, S> {
    sink: S,
    constraints: Vec<EnvelopePartConstraint<'a>>,
    direction: f64,
    last_pos: f64,
    last_speed: f64,
    last_intersection: Option<usize>,
}

impl<'a, S: EnvelopePartConsumer> MaintainEnvelopePartBuilder<'a, S> {
    pub fn new(sink: S, constraints: Vec<EnvelopePartConstraint<'a>>) -> Self {
        Self {
            sink,
            constraints,
            direction: 1.0,
            last_pos: f64::NAN,
            last_speed: f64::NAN,
            last_intersection: None,
        }
    }

    pub fn last_intersection(&self) -> Option<usize> {
        self.last_intersection
    }

    pub fn last_pos(&self) -> f64 {
        self.last_pos
    }

    pub fn last_speed(&self) -> f64 {
        self.last_speed
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl<'a, S: EnvelopePartConsumer> EnvelopePartConsumer for MaintainEnvelopePartBuilder<'a, S> {
    fn init_envelope_part(
        &mut self,
        position: f64,
        speed: f64,
        direction: f64,
    ) -> Result<bool, EnvelopeError> {
        self.direction = direction;
        self.last_intersection = None;
        if !init_constraints(&mut self.constraints, position, speed, direction) {
            return Ok(false);
        }
        self.last_pos = position;
        self.last_speed = speed;
        self.sink.init_envelope_part(position, speed, direction)
    }

    fn add_step(
        &mut self,
        position: f64,
        speed: f64,
        time_delta: Option<f64>,
    ) -> Result<bool, EnvelopeError> {
        let nearest = nearest_intersection(
            &mut self.constraints,
            self.direction,
            (self.last_pos, self.last_speed),
            (position, speed),
        )?;
        if let Some((index, _)) = nearest {
            self.last_intersection = Some(index);
            return Ok(false);
        }
        self.last_pos = position;
        self.last_speed = speed;
        self.sink.add_step(position, speed, time_delta)
    }
}
