use crate::envelope::Envelope;
use crate::envelope_part::EnvelopePart;

/// What happened when moving a cursor to the next step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStepResult {
    NextStep,
    /// The cursor moved to the first step of another part
    NextPart,
    /// There is no step left in the envelope
    NextReachedEnd,
}

/// A read only traversal handle over an envelope, moving forward or backward.
///
/// Step indices always refer to the storage order of the part, so in reverse mode
/// a step begins at its higher position.
#[derive(Clone, Debug)]
pub struct EnvelopeCursor<'a> {
    envelope: &'a Envelope,
    reverse: bool,
    /// `None` once the end was reached
    location: Option<(usize, usize)>,
    position: f64,
    /// Number of times the cursor was moved
    revision: u64,
}

impl<'a> EnvelopeCursor<'a> {
    pub fn new(envelope: &'a Envelope, reverse: bool) -> Self {
        let mut cursor = Self {
            envelope,
            reverse,
            location: None,
            position: f64::NAN,
            revision: 0,
        };
        let part_index = cursor.first_index(envelope.part_count());
        let step_index = cursor.first_index(envelope.part(part_index).step_count());
        cursor.location = Some((part_index, step_index));
        cursor.position = cursor.step_begin_pos();
        cursor
    }

    pub fn forward(envelope: &'a Envelope) -> Self {
        Self::new(envelope, false)
    }

    pub fn backward(envelope: &'a Envelope) -> Self {
        Self::new(envelope, true)
    }

    fn first_index(&self, size: usize) -> usize {
        if self.reverse {
            size - 1
        } else {
            0
        }
    }

    fn next_index(&self, current: usize, size: usize) -> Option<usize> {
        if self.reverse {
            current.checked_sub(1)
        } else {
            Some(current + 1).filter(|&next| next < size)
        }
    }

    // -----------------------------------------------------------------
    // State

    pub fn envelope(&self) -> &'a Envelope {
        self.envelope
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn has_reached_end(&self) -> bool {
        self.location.is_none()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Position of the cursor, NaN once the end was reached.
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn part_index(&self) -> Option<usize> {
        self.location.map(|(part, _)| part)
    }

    pub fn step_index(&self) -> Option<usize> {
        self.location.map(|(_, step)| step)
    }

    pub fn part(&self) -> Option<&'a EnvelopePart> {
        self.location.map(|(part, _)| self.envelope.part(part))
    }

    /// Speed at the position of the cursor.
    pub fn speed(&self) -> Option<f64> {
        let (part, step) = self.location?;
        Some(self.envelope.part(part).interpolate_speed_at_step(step, self.position))
    }

    // -----------------------------------------------------------------
    // Current step, in traversal direction. NaN once the end was reached.

    fn step_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let (part, step) = self.location?;
        let part = self.envelope.part(part);
        let (low_pos, high_pos) = (part.step_begin_pos(step), part.step_end_pos(step));
        let (low_speed, high_speed) = (part.step_begin_speed(step), part.step_end_speed(step));
        Some(if self.reverse {
            (high_pos, low_pos, high_speed, low_speed)
        } else {
            (low_pos, high_pos, low_speed, high_speed)
        })
    }

    pub fn step_begin_pos(&self) -> f64 {
        self.step_bounds().map_or(f64::NAN, |bounds| bounds.0)
    }

    pub fn step_end_pos(&self) -> f64 {
        self.step_bounds().map_or(f64::NAN, |bounds| bounds.1)
    }

    pub fn step_begin_speed(&self) -> f64 {
        self.step_bounds().map_or(f64::NAN, |bounds| bounds.2)
    }

    pub fn step_end_speed(&self) -> f64 {
        self.step_bounds().map_or(f64::NAN, |bounds| bounds.3)
    }

    fn part_end_pos(&self, part_index: usize) -> f64 {
        let part = self.envelope.part(part_index);
        if self.reverse {
            part.begin_pos()
        } else {
            part.end_pos()
        }
    }

    /// Last position of the envelope in traversal direction.
    pub fn envelope_end_pos(&self) -> f64 {
        if self.reverse {
            self.envelope.begin_pos()
        } else {
            self.envelope.end_pos()
        }
    }

    pub fn envelope_end_speed(&self) -> f64 {
        if self.reverse {
            self.envelope.begin_speed()
        } else {
            self.envelope.end_speed()
        }
    }

    /// Positive when `a` lies further than `b` in traversal direction.
    pub fn compare_pos(&self, a: f64, b: f64) -> f64 {
        if self.reverse {
            b - a
        } else {
            a - b
        }
    }

    // -----------------------------------------------------------------
    // Movement

    fn set_position(&mut self, position: f64) {
        self.position = position;
        self.revision += 1;
    }

    fn move_to_end(&mut self) {
        self.location = None;
        self.set_position(f64::NAN);
    }

    /// Moves to the first step of the next part.
    pub fn next_part(&mut self) -> bool {
        let (part_index, _) = match self.location {
            Some(location) => location,
            None => return false,
        };
        match self.next_index(part_index, self.envelope.part_count()) {
            Some(next) => {
                let step = self.first_index(self.envelope.part(next).step_count());
                self.location = Some((next, step));
                let position = self.step_begin_pos();
                self.set_position(position);
                true
            }
            None => {
                self.move_to_end();
                false
            }
        }
    }

    /// Moves to the beginning of the next step.
    pub fn next_step(&mut self) -> NextStepResult {
        let (part_index, step_index) = match self.location {
            Some(location) => location,
            None => return NextStepResult::NextReachedEnd,
        };
        let step_count = self.envelope.part(part_index).step_count();
        match self.next_index(step_index, step_count) {
            Some(next) => {
                self.location = Some((part_index, next));
                let position = self.step_begin_pos();
                self.set_position(position);
                NextStepResult::NextStep
            }
            None if self.next_part() => NextStepResult::NextPart,
            None => NextStepResult::NextReachedEnd,
        }
    }

    /// Moves forward to the first part matching the predicate, including the current one.
    pub fn find_part<P>(&mut self, predicate: P) -> bool
    where
        P: Fn(&EnvelopePart) -> bool,
    {
        while let Some(part) = self.part() {
            if predicate(part) {
                return true;
            }
            if !self.next_part() {
                return false;
            }
        }
        false
    }

    /// Moves forward to the step containing `position`. Positions behind the cursor
    /// or past the end of the envelope are not found.
    pub fn find_position(&mut self, position: f64) -> bool {
        if self.has_reached_end() || self.compare_pos(position, self.position) < 0.0 {
            return false;
        }
        if self.compare_pos(position, self.envelope_end_pos()) > 0.0 {
            return false;
        }
        while let Some(part_index) = self.part_index() {
            if self.compare_pos(self.part_end_pos(part_index), position) >= 0.0 {
                break;
            }
            if !self.next_part() {
                return false;
            }
        }
        while self.compare_pos(self.step_end_pos(), position) < 0.0 {
            if self.next_step() == NextStepResult::NextReachedEnd {
                return false;
            }
        }
        self.set_position(position);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope_part::{EnvelopeAttr, EnvelopeProfile};

    fn sample_envelope() -> Envelope {
        Envelope::new(vec![
            EnvelopePart::generate_times(
                vec![EnvelopeAttr::Profile(EnvelopeProfile::Accelerating)],
                vec![0.0, 100.0, 200.0],
                vec![0.0, 20.0, 30.0],
            )
            .unwrap(),
            EnvelopePart::generate_times(
                vec![EnvelopeAttr::Profile(EnvelopeProfile::Braking)],
                vec![200.0, 300.0, 400.0],
                vec![30.0, 20.0, 0.0],
            )
            .unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn walks_forward_through_steps() {
        let envelope = sample_envelope();
        let mut cursor = EnvelopeCursor::forward(&envelope);
        assert_eq!(cursor.position(), 0.0);
        assert_eq!(cursor.step_end_pos(), 100.0);
        assert_eq!(cursor.next_step(), NextStepResult::NextStep);
        assert_eq!(cursor.next_step(), NextStepResult::NextPart);
        assert_eq!(cursor.position(), 200.0);
        assert_eq!(cursor.part_index(), Some(1));
        assert_eq!(cursor.next_step(), NextStepResult::NextStep);
        assert_eq!(cursor.next_step(), NextStepResult::NextReachedEnd);
        assert!(cursor.has_reached_end());
        assert!(cursor.position().is_nan());
    }

    #[test]
    fn walks_backward_through_steps() {
        let envelope = sample_envelope();
        let mut cursor = EnvelopeCursor::backward(&envelope);
        assert_eq!(cursor.position(), 400.0);
        assert_eq!(cursor.step_begin_pos(), 400.0);
        assert_eq!(cursor.step_end_pos(), 300.0);
        assert_eq!(cursor.step_begin_speed(), 0.0);
        assert_eq!(cursor.step_end_speed(), 20.0);
        assert!(cursor.compare_pos(100.0, 300.0) > 0.0);
        assert!(cursor.find_position(150.0));
        assert_eq!(cursor.part_index(), Some(0));
        assert_eq!(cursor.step_begin_pos(), 200.0);
        assert!(!cursor.find_position(250.0));
    }

    #[test]
    fn finds_positions_and_parts() {
        let envelope = sample_envelope();
        let mut cursor = EnvelopeCursor::forward(&envelope);
        assert!(cursor.find_position(100.0));
        assert_eq!(cursor.step_index(), Some(0));
        assert_eq!(cursor.speed(), Some(20.0));
        let revision = cursor.revision();
        assert!(cursor.find_part(|part| part.has_profile(EnvelopeProfile::Braking)));
        assert!(cursor.revision() > revision);
        assert_eq!(cursor.position(), 200.0);
        assert!(!cursor.find_position(450.0));
        assert!(!cursor.find_part(|part| part.has_profile(EnvelopeProfile::Coasting)));
        assert!(cursor.has_reached_end());
    }
}
