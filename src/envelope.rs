use serde::{Deserialize, Serialize};

use crate::envelope_part::{EnvelopeAttr, EnvelopePart, EnvelopeProfile};
use crate::envelope_physics::intersect_step_with_speed;
use crate::error::EnvelopeError;
use crate::physics::{are_speeds_equal, POSITION_EPSILON};

/// A sample of a simulated run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub time: f64,
    pub speed: f64,
    pub position: f64,
}

/// A speed curve made of contiguous parts, covering `[begin_pos, end_pos]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    parts: Vec<EnvelopePart>,
    /// Whether speeds match at every part transition
    continuous: bool,
    /// Time elapsed at the end of each part
    part_end_times: Vec<f64>,
}

impl Envelope {
    pub fn new(parts: Vec<EnvelopePart>) -> Result<Self, EnvelopeError> {
        if parts.is_empty() {
            return Err(EnvelopeError::EmptyEnvelope);
        }
        let mut continuous = true;
        for pair in parts.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if (prev.end_pos() - next.begin_pos()).abs() > POSITION_EPSILON {
                return Err(EnvelopeError::PartsNotContiguous {
                    end: prev.end_pos(),
                    begin: next.begin_pos(),
                });
            }
            if !are_speeds_equal(prev.end_speed(), next.begin_speed()) {
                continuous = false;
            }
        }
        let mut part_end_times = Vec::with_capacity(parts.len());
        let mut total = 0.0;
        for part in &parts {
            total += part.total_time();
            part_end_times.push(total);
        }
        Ok(Self {
            parts,
            continuous,
            part_end_times,
        })
    }

    // -----------------------------------------------------------------
    // Accessors

    pub fn parts(&self) -> &[EnvelopePart] {
        &self.parts
    }

    pub fn part(&self, index: usize) -> &EnvelopePart {
        &self.parts[index]
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn into_parts(self) -> Vec<EnvelopePart> {
        self.parts
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Position of the first speed jump between two parts.
    pub fn find_discontinuity(&self) -> Option<f64> {
        if self.continuous {
            return None;
        }
        self.parts
            .windows(2)
            .find(|pair| !are_speeds_equal(pair[0].end_speed(), pair[1].begin_speed()))
            .map(|pair| pair[1].begin_pos())
    }

    pub fn begin_pos(&self) -> f64 {
        self.parts[0].begin_pos()
    }

    pub fn end_pos(&self) -> f64 {
        self.parts[self.parts.len() - 1].end_pos()
    }

    pub fn begin_speed(&self) -> f64 {
        self.parts[0].begin_speed()
    }

    pub fn end_speed(&self) -> f64 {
        self.parts[self.parts.len() - 1].end_speed()
    }

    pub fn total_distance(&self) -> f64 {
        self.end_pos() - self.begin_pos()
    }

    pub fn max_speed(&self) -> f64 {
        self.parts.iter().map(EnvelopePart::max_speed).fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_speed(&self) -> f64 {
        self.parts.iter().map(EnvelopePart::min_speed).fold(f64::INFINITY, f64::min)
    }

    pub fn total_time(&self) -> f64 {
        self.part_end_times[self.part_end_times.len() - 1]
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.begin_pos() && position <= self.end_pos()
    }

    // -----------------------------------------------------------------
    // Lookup

    /// Index of the part containing `position`, preferring the left part on transitions.
    pub fn find_left(&self, position: f64) -> Option<usize> {
        if !self.contains(position) {
            return None;
        }
        let before = self.parts.partition_point(|part| part.end_pos() < position);
        Some(before.min(self.parts.len() - 1))
    }

    /// Index of the part containing `position`, preferring the right part on transitions.
    pub fn find_right(&self, position: f64) -> Option<usize> {
        if !self.contains(position) {
            return None;
        }
        let before = self.parts.partition_point(|part| part.begin_pos() <= position);
        Some(before.saturating_sub(1))
    }

    /// Speed at `position`, taken from the left part on transitions.
    pub fn interpolate_speed(&self, position: f64) -> Result<f64, EnvelopeError> {
        let index = self
            .find_left(position)
            .ok_or(EnvelopeError::PositionOutOfRange(position))?;
        Ok(self.parts[index].interpolate_speed(position))
    }

    /// Speed at `position`, taken from the right part on transitions.
    pub fn interpolate_speed_right(&self, position: f64) -> Result<f64, EnvelopeError> {
        let index = self
            .find_right(position)
            .ok_or(EnvelopeError::PositionOutOfRange(position))?;
        Ok(self.parts[index].interpolate_speed(position))
    }

    /// Time elapsed between the beginning of the envelope and `position`.
    pub fn interpolate_total_time(&self, position: f64) -> Result<f64, EnvelopeError> {
        let index = self
            .find_left(position)
            .ok_or(EnvelopeError::PositionOutOfRange(position))?;
        let part = &self.parts[index];
        Ok(self.part_end_times[index] - part.total_time() + part.interpolate_total_time(position))
    }

    /// Time needed to go from `begin` to `end`.
    pub fn time_between(&self, begin: f64, end: f64) -> Result<f64, EnvelopeError> {
        Ok(self.interpolate_total_time(end)? - self.interpolate_total_time(begin)?)
    }

    /// Highest speed reached between two positions.
    pub fn max_speed_in_range(&self, begin: f64, end: f64) -> Result<f64, EnvelopeError> {
        let mut max_speed = self.interpolate_speed_right(begin)?.max(self.interpolate_speed(end)?);
        for part in &self.parts {
            if part.end_pos() <= begin || part.begin_pos() >= end {
                continue;
            }
            for (&position, &speed) in part.positions().iter().zip(part.speeds()) {
                if position > begin && position < end {
                    max_speed = max_speed.max(speed);
                }
            }
        }
        Ok(max_speed)
    }

    /// All samples with their absolute time, in position order. Transitions appear once.
    pub fn iterate_points(&self) -> Vec<EnvelopePoint> {
        let mut points = Vec::new();
        let mut time_offset = 0.0;
        for (part_index, part) in self.parts.iter().enumerate() {
            let first = if part_index == 0 { 0 } else { 1 };
            for point in first..part.point_count() {
                points.push(EnvelopePoint {
                    time: time_offset + part.total_time_at(point),
                    speed: part.point_speed(point),
                    position: part.point_pos(point),
                });
            }
            time_offset += part.total_time();
        }
        points
    }

    // -----------------------------------------------------------------
    // Derived envelopes

    /// Parts covering `[begin, end]`. Edge speeds may be forced.
    pub fn slice_with_speeds(
        &self,
        begin: f64,
        begin_speed: Option<f64>,
        end: f64,
        end_speed: Option<f64>,
    ) -> Result<Vec<EnvelopePart>, EnvelopeError> {
        if begin >= end {
            return Ok(Vec::new());
        }
        let first = self
            .find_right(begin)
            .ok_or(EnvelopeError::PositionOutOfRange(begin))?;
        let last = self
            .find_left(end)
            .ok_or(EnvelopeError::PositionOutOfRange(end))?;

        let mut parts = Vec::with_capacity(last + 1 - first);
        for index in first..=last {
            let part = &self.parts[index];
            let forced_begin = if index == first { begin_speed } else { None };
            let forced_end = if index == last { end_speed } else { None };
            if let Some(slice) = part.slice(begin, forced_begin, end, forced_end) {
                parts.push(slice);
            }
        }
        Ok(parts)
    }

    pub fn slice(&self, begin: f64, end: f64) -> Result<Vec<EnvelopePart>, EnvelopeError> {
        self.slice_with_speeds(begin, None, end, None)
    }

    /// Replaces the portion of the envelope covered by `part` with it.
    /// Neighbours are snapped to the part's edge speeds when they already match.
    pub fn overlay(&self, part: EnvelopePart) -> Result<Envelope, EnvelopeError> {
        let (begin, end) = (part.begin_pos(), part.end_pos());
        let mut builder = EnvelopeBuilder::new();

        if begin > self.begin_pos() {
            let base_speed = self.interpolate_speed(begin)?;
            let forced = are_speeds_equal(base_speed, part.begin_speed()).then_some(part.begin_speed());
            builder.add_parts(self.slice_with_speeds(self.begin_pos(), None, begin, forced)?);
        }
        let (end_speed, end_pos) = (part.end_speed(), part.end_pos());
        builder.add_part(part);
        if end < self.end_pos() {
            let base_speed = self.interpolate_speed_right(end_pos)?;
            let forced = are_speeds_equal(base_speed, end_speed).then_some(end_speed);
            builder.add_parts(self.slice_with_speeds(end_pos, forced, self.end_pos(), None)?);
        }
        builder.build()
    }

    /// Caps every speed above `limit`, replacing the portions above it with
    /// constant speed parts carrying `attrs`.
    pub fn cap_speed(&self, limit: f64, attrs: &[EnvelopeAttr]) -> Result<Envelope, EnvelopeError> {
        let mut builder = EnvelopeBuilder::new();
        for part in &self.parts {
            if part.max_speed() <= limit {
                builder.add_part(part.clone());
                continue;
            }
            let mut attrs = attrs.to_vec();
            attrs.push(EnvelopeAttr::Profile(EnvelopeProfile::ConstantSpeed));
            if part.min_speed() >= limit {
                builder.add_part(EnvelopePart::constant(attrs, part.begin_pos(), part.end_pos(), limit)?);
                continue;
            }

            // split the part where it crosses the limit
            let mut boundaries = vec![part.begin_pos()];
            for step in 0..part.step_count() {
                let (v1, v2) = (part.step_begin_speed(step), part.step_end_speed(step));
                if (v1 > limit) != (v2 > limit) {
                    let position = intersect_step_with_speed(
                        part.step_begin_pos(step),
                        part.step_end_pos(step),
                        v1,
                        v2,
                        limit,
                    );
                    boundaries.push(position);
                }
            }
            boundaries.push(part.end_pos());

            let mut above = part.begin_speed() > limit;
            for range in boundaries.windows(2) {
                let (begin, end) = (range[0], range[1]);
                if begin < end {
                    if above {
                        builder.add_part(EnvelopePart::constant(attrs.clone(), begin, end, limit)?);
                    } else {
                        let begin_speed = (begin != part.begin_pos()).then_some(limit);
                        let end_speed = (end != part.end_pos()).then_some(limit);
                        if let Some(slice) = part.slice(begin, begin_speed, end, end_speed) {
                            builder.add_part(slice);
                        }
                    }
                }
                above = !above;
            }
        }
        builder.build()
    }
}

/// Accumulates parts into an envelope.
#[derive(Clone, Debug, Default)]
pub struct EnvelopeBuilder {
    parts: Vec<EnvelopePart>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&mut self, part: EnvelopePart) {
        self.parts.push(part);
    }

    pub fn add_parts(&mut self, parts: impl IntoIterator<Item = EnvelopePart>) {
        self.parts.extend(parts);
    }

    pub fn add_envelope(&mut self, envelope: &Envelope) {
        self.parts.extend(envelope.parts().iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        Envelope::new(self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn part(positions: Vec<f64>, speeds: Vec<f64>) -> EnvelopePart {
        EnvelopePart::generate_times(vec![], positions, speeds).unwrap()
    }

    fn sample_envelope() -> Envelope {
        Envelope::new(vec![
            part(vec![0.0, 100.0, 200.0], vec![0.0, 20.0, 30.0]),
            part(vec![200.0, 400.0], vec![30.0, 30.0]),
            part(vec![400.0, 500.0, 600.0], vec![30.0, 20.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_gaps_and_empty_envelopes() {
        assert_eq!(Envelope::new(vec![]), Err(EnvelopeError::EmptyEnvelope));
        let result = Envelope::new(vec![
            part(vec![0.0, 100.0], vec![10.0, 10.0]),
            part(vec![110.0, 200.0], vec![10.0, 10.0]),
        ]);
        assert!(matches!(result, Err(EnvelopeError::PartsNotContiguous { .. })));
    }

    #[test]
    fn flags_speed_discontinuities() {
        let envelope = Envelope::new(vec![
            part(vec![0.0, 100.0], vec![10.0, 10.0]),
            part(vec![100.0, 200.0], vec![15.0, 15.0]),
        ])
        .unwrap();
        assert!(!envelope.is_continuous());
        assert_eq!(envelope.find_discontinuity(), Some(100.0));
        assert!(sample_envelope().is_continuous());
        assert_eq!(sample_envelope().find_discontinuity(), None);
    }

    #[test]
    fn interpolates_across_parts() {
        let envelope = sample_envelope();
        assert_eq!(envelope.find_left(200.0), Some(0));
        assert_eq!(envelope.find_right(200.0), Some(1));
        assert_eq!(envelope.interpolate_speed(300.0).unwrap(), 30.0);
        assert!(envelope.interpolate_speed(601.0).is_err());
        assert_relative_eq!(envelope.time_between(200.0, 400.0).unwrap(), 200.0 / 30.0);
        assert_relative_eq!(
            envelope.interpolate_total_time(600.0).unwrap(),
            envelope.total_time()
        );
        let max_speed = envelope.max_speed_in_range(0.0, 150.0).unwrap();
        assert_eq!(max_speed, envelope.interpolate_speed(150.0).unwrap());
        assert_eq!(envelope.max_speed_in_range(0.0, 600.0).unwrap(), 30.0);
    }

    #[test]
    fn iterates_points_once() {
        let points = sample_envelope().iterate_points();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].time, 0.0);
        assert!(points.windows(2).all(|w| w[0].time < w[1].time && w[0].position < w[1].position));
    }

    #[test]
    fn overlay_splices_a_part() {
        let envelope = sample_envelope();
        let overlay = part(vec![250.0, 300.0, 350.0], vec![30.0, 25.0, 30.0]);
        let result = envelope.overlay(overlay).unwrap();
        assert!(result.is_continuous());
        assert_eq!(result.begin_pos(), 0.0);
        assert_eq!(result.end_pos(), 600.0);
        assert_eq!(result.interpolate_speed(300.0).unwrap(), 25.0);
        for pair in result.parts().windows(2) {
            assert_eq!(pair[0].end_pos(), pair[1].begin_pos());
            assert_eq!(pair[0].end_speed(), pair[1].begin_speed());
        }
    }

    #[test]
    fn caps_speed() {
        let envelope = sample_envelope();
        let capped = envelope.cap_speed(25.0, &[EnvelopeAttr::CapacitySpeedLimit]).unwrap();
        assert_eq!(capped.max_speed(), 25.0);
        assert!(capped.is_continuous());
        assert_eq!(capped.begin_pos(), 0.0);
        assert_eq!(capped.end_pos(), 600.0);
        assert!(capped.total_time() > envelope.total_time());
        let limited = capped.parts().iter().filter(|p| p.has_attr(EnvelopeAttr::CapacitySpeedLimit));
        assert_eq!(limited.count(), 3);
    }
}
