//! Constraints checked against every step of a part under construction.
//!
//! A constraint answers two questions: does the first sample respect it, and
//! where exactly does a step cross it. Steps are straight in (position, speed²)
//! space, which is what a constant acceleration step looks like.

use crate::envelope::Envelope;
use crate::envelope_cursor::{EnvelopeCursor, NextStepResult};
use crate::envelope_physics::{
    interpolate_step_speed, intersect_linear_differences, intersect_step_with_speed,
};
use crate::error::EnvelopeError;
use crate::physics::POSITION_EPSILON;

/// Whether a limit bounds speeds from above or from below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Ceiling,
    Floor,
}

impl ConstraintKind {
    /// Whether `speed` respects `limit`, touching it included.
    pub fn check(self, limit: f64, speed: f64) -> bool {
        match self {
            ConstraintKind::Ceiling => speed <= limit,
            ConstraintKind::Floor => speed >= limit,
        }
    }

    /// Whether `speed` touches or goes past `limit`.
    pub fn reaches(self, limit: f64, speed: f64) -> bool {
        match self {
            ConstraintKind::Ceiling => speed >= limit,
            ConstraintKind::Floor => speed <= limit,
        }
    }

    /// Signed distance to the limit, positive past it.
    fn excess(self, limit: f64, speed: f64) -> f64 {
        match self {
            ConstraintKind::Ceiling => speed - limit,
            ConstraintKind::Floor => limit - speed,
        }
    }
}

/// The point at which a step crosses a constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    pub position: f64,
    pub speed: f64,
}

/// Another envelope used as a bound. Holds a cursor which only moves forward
/// during one part construction pass.
#[derive(Clone, Debug)]
pub struct EnvelopeConstraint<'a> {
    envelope: &'a Envelope,
    kind: ConstraintKind,
    cursor: Option<EnvelopeCursor<'a>>,
}

impl<'a> EnvelopeConstraint<'a> {
    pub fn new(envelope: &'a Envelope, kind: ConstraintKind) -> Self {
        Self {
            envelope,
            kind,
            cursor: None,
        }
    }

    pub fn envelope(&self) -> &'a Envelope {
        self.envelope
    }

    fn init_check(&mut self, position: f64, speed: f64, direction: f64) -> bool {
        let mut cursor = EnvelopeCursor::new(self.envelope, direction < 0.0);
        if !cursor.find_position(position) {
            return false;
        }
        // on a step boundary, the reference is the step ahead in travel direction
        if cursor.step_end_pos() == position {
            let mut ahead = cursor.clone();
            if ahead.next_step() != NextStepResult::NextReachedEnd {
                cursor = ahead;
            }
        }
        let reference_speed = match cursor.speed() {
            Some(speed) => speed,
            None => return false,
        };
        self.cursor = Some(cursor);
        self.kind.check(reference_speed, speed)
    }

    fn step_check(
        &mut self,
        start_pos: f64,
        start_speed: f64,
        end_pos: f64,
        end_speed: f64,
    ) -> Result<Option<Intersection>, EnvelopeError> {
        let kind = self.kind;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or(EnvelopeError::ConstraintNotInitialized)?;

        let overlay_speed =
            |position: f64| interpolate_step_speed(start_pos, end_pos, start_speed, end_speed, position);

        if cursor.has_reached_end() {
            let position = cursor.envelope_end_pos();
            return Ok(Some(Intersection {
                position,
                speed: overlay_speed(position),
            }));
        }
        if (cursor.position() - start_pos).abs() > POSITION_EPSILON {
            return Err(EnvelopeError::CursorOutOfSync {
                step_start: start_pos,
                cursor: cursor.position(),
            });
        }

        let mut segment_start = start_pos;
        loop {
            let (part, step) = match (cursor.part(), cursor.step_index()) {
                (Some(part), Some(step)) => (part, step),
                _ => return Err(EnvelopeError::ConstraintNotInitialized),
            };
            let reference_step_end = cursor.step_end_pos();
            let overlay_ends_first = cursor.compare_pos(end_pos, reference_step_end) <= 0.0;
            let next_pos = if overlay_ends_first { end_pos } else { reference_step_end };

            let overlay_start_speed = if segment_start == start_pos {
                start_speed
            } else {
                overlay_speed(segment_start)
            };
            let overlay_next_speed = if next_pos == end_pos {
                end_speed
            } else {
                overlay_speed(next_pos)
            };
            let reference_start_speed = part.interpolate_speed_at_step(step, segment_start);
            let reference_next_speed = if next_pos == reference_step_end {
                cursor.step_end_speed()
            } else {
                part.interpolate_speed_at_step(step, next_pos)
            };

            // both curves are monotonic over the segment, so comparing extremes is enough
            let clearly_inside = match kind {
                ConstraintKind::Ceiling => {
                    overlay_start_speed.max(overlay_next_speed)
                        < reference_start_speed.min(reference_next_speed)
                }
                ConstraintKind::Floor => {
                    overlay_start_speed.min(overlay_next_speed)
                        > reference_start_speed.max(reference_next_speed)
                }
            };

            // nothing to compare over an empty segment, the step start is excluded
            let empty_segment = next_pos == segment_start;
            if !empty_segment && !clearly_inside && kind.reaches(reference_next_speed, overlay_next_speed) {
                // tangency or landing exactly on the reference
                if overlay_next_speed == reference_next_speed {
                    return Ok(Some(Intersection {
                        position: next_pos,
                        speed: reference_next_speed,
                    }));
                }
                let start_excess = kind.excess(
                    reference_start_speed * reference_start_speed,
                    overlay_start_speed * overlay_start_speed,
                );
                let next_excess = kind.excess(
                    reference_next_speed * reference_next_speed,
                    overlay_next_speed * overlay_next_speed,
                );
                if start_excess >= 0.0 {
                    return Ok(Some(Intersection {
                        position: segment_start,
                        speed: reference_start_speed,
                    }));
                }
                let position =
                    intersect_linear_differences(segment_start, next_pos, start_excess, next_excess);
                return Ok(Some(Intersection {
                    position,
                    speed: part.interpolate_speed_at_step(step, position),
                }));
            }

            if overlay_ends_first {
                if !cursor.find_position(end_pos) {
                    return Err(EnvelopeError::CursorOutOfSync {
                        step_start: start_pos,
                        cursor: cursor.position(),
                    });
                }
                return Ok(None);
            }

            match cursor.next_step() {
                NextStepResult::NextStep => {}
                NextStepResult::NextPart => {
                    let boundary = cursor.position();
                    let boundary_speed = overlay_speed(boundary);
                    if kind.reaches(cursor.step_begin_speed(), boundary_speed)
                        && boundary_speed != cursor.step_begin_speed()
                    {
                        return Ok(Some(Intersection {
                            position: boundary,
                            speed: boundary_speed,
                        }));
                    }
                }
                NextStepResult::NextReachedEnd => {
                    let position = cursor.envelope_end_pos();
                    return Ok(Some(Intersection {
                        position,
                        speed: overlay_speed(position),
                    }));
                }
            }
            segment_start = cursor.position();
        }
    }
}

/// A bound applied to every step of a part under construction.
#[derive(Clone, Debug)]
pub enum EnvelopePartConstraint<'a> {
    /// A constant speed bound
    Speed { limit: f64, kind: ConstraintKind },
    /// Another envelope as a bound
    Envelope(EnvelopeConstraint<'a>),
    /// The part must stay within `[begin, end]`
    PositionRange { begin: f64, end: f64 },
}

impl<'a> EnvelopePartConstraint<'a> {
    pub fn speed_ceiling(limit: f64) -> Self {
        Self::Speed {
            limit,
            kind: ConstraintKind::Ceiling,
        }
    }

    pub fn speed_floor(limit: f64) -> Self {
        Self::Speed {
            limit,
            kind: ConstraintKind::Floor,
        }
    }

    pub fn envelope_ceiling(envelope: &'a Envelope) -> Self {
        Self::Envelope(EnvelopeConstraint::new(envelope, ConstraintKind::Ceiling))
    }

    pub fn envelope_floor(envelope: &'a Envelope) -> Self {
        Self::Envelope(EnvelopeConstraint::new(envelope, ConstraintKind::Floor))
    }

    pub fn position_range(begin: f64, end: f64) -> Self {
        Self::PositionRange { begin, end }
    }

    /// Whether the first sample of a part respects the constraint.
    /// Envelope constraints also position their cursor.
    pub fn init_check(&mut self, position: f64, speed: f64, direction: f64) -> bool {
        match self {
            Self::Speed { limit, kind } => kind.check(*limit, speed),
            Self::Envelope(constraint) => constraint.init_check(position, speed, direction),
            Self::PositionRange { begin, end } => position >= *begin && position <= *end,
        }
    }

    /// Where the step from start (excluded) to end (included) first crosses the constraint.
    pub fn step_check(
        &mut self,
        start_pos: f64,
        start_speed: f64,
        end_pos: f64,
        end_speed: f64,
    ) -> Result<Option<Intersection>, EnvelopeError> {
        match self {
            Self::Speed { limit, kind } => Ok(speed_step_check(
                *limit, *kind, start_pos, start_speed, end_pos, end_speed,
            )),
            Self::Envelope(constraint) => {
                constraint.step_check(start_pos, start_speed, end_pos, end_speed)
            }
            Self::PositionRange { begin, end } => Ok(range_step_check(
                *begin, *end, start_pos, start_speed, end_pos, end_speed,
            )),
        }
    }
}

fn speed_step_check(
    limit: f64,
    kind: ConstraintKind,
    start_pos: f64,
    start_speed: f64,
    end_pos: f64,
    end_speed: f64,
) -> Option<Intersection> {
    if !kind.reaches(limit, end_speed) {
        return None;
    }
    if end_speed == limit {
        return Some(Intersection {
            position: end_pos,
            speed: end_speed,
        });
    }
    if kind.reaches(limit, start_speed) {
        return Some(Intersection {
            position: start_pos,
            speed: limit,
        });
    }
    let position = intersect_step_with_speed(start_pos, end_pos, start_speed, end_speed, limit);
    Some(Intersection {
        position,
        speed: limit,
    })
}

fn range_step_check(
    begin: f64,
    end: f64,
    start_pos: f64,
    start_speed: f64,
    end_pos: f64,
    end_speed: f64,
) -> Option<Intersection> {
    if end_pos > begin && end_pos < end {
        return None;
    }
    if end_pos == begin || end_pos == end {
        return Some(Intersection {
            position: end_pos,
            speed: end_speed,
        });
    }
    let bound = if end_pos > end { end } else { begin };
    Some(Intersection {
        position: bound,
        speed: interpolate_step_speed(start_pos, end_pos, start_speed, end_speed, bound),
    })
}
