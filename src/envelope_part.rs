use std::mem::discriminant;

use serde::{Deserialize, Serialize};

use crate::envelope_physics::{
    compute_step_time, interpolate_step_speed, interpolate_step_time, intersect_step_with_speed,
};
use crate::error::EnvelopeError;

/// What the train is doing over an envelope part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeProfile {
    Accelerating,
    ConstantSpeed,
    Coasting,
    Braking,
    CatchingUp,
}

/// Attributes attached to envelope parts. A part holds at most one attribute of each kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeAttr {
    Profile(EnvelopeProfile),
    /// The part was clamped by the capacity speed limit of an allowance
    CapacitySpeedLimit,
}

/// An immutable, attribute tagged piece of speed curve, stored in increasing position order.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopePart {
    attrs: Vec<EnvelopeAttr>,
    positions: Vec<f64>,
    speeds: Vec<f64>,
    /// One per step
    time_deltas: Vec<f64>,
    /// Time elapsed since the beginning of the part, one per point
    cumulative_times: Vec<f64>,
    min_speed: f64,
    max_speed: f64,
}

impl EnvelopePart {
    pub fn new(
        attrs: Vec<EnvelopeAttr>,
        positions: Vec<f64>,
        speeds: Vec<f64>,
        time_deltas: Vec<f64>,
    ) -> Result<Self, EnvelopeError> {
        if positions.len() < 2 {
            return Err(EnvelopeError::InvalidPart("a part needs at least two points"));
        }
        if speeds.len() != positions.len() || time_deltas.len() != positions.len() - 1 {
            return Err(EnvelopeError::InvalidPart("mismatched sample counts"));
        }
        if positions.iter().any(|p| !p.is_finite()) {
            return Err(EnvelopeError::InvalidPart("positions must be finite"));
        }
        if positions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EnvelopeError::InvalidPart("positions must be strictly increasing"));
        }
        if speeds.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EnvelopeError::InvalidPart("speeds must be finite and positive"));
        }
        if time_deltas.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(EnvelopeError::InvalidPart("time deltas must be finite and positive"));
        }
        Ok(Self::new_unchecked(attrs, positions, speeds, time_deltas))
    }

    /// Builds a part computing the time of each step from its speeds.
    pub fn generate_times(
        attrs: Vec<EnvelopeAttr>,
        positions: Vec<f64>,
        speeds: Vec<f64>,
    ) -> Result<Self, EnvelopeError> {
        if speeds.len() != positions.len() {
            return Err(EnvelopeError::InvalidPart("mismatched sample counts"));
        }
        let time_deltas = positions
            .windows(2)
            .zip(speeds.windows(2))
            .map(|(x, v)| compute_step_time(x[0], x[1], v[0], v[1]))
            .collect();
        Self::new(attrs, positions, speeds, time_deltas)
    }

    /// A constant speed part over `[begin, end]`.
    pub fn constant(
        attrs: Vec<EnvelopeAttr>,
        begin: f64,
        end: f64,
        speed: f64,
    ) -> Result<Self, EnvelopeError> {
        Self::generate_times(attrs, vec![begin, end], vec![speed, speed])
    }

    fn new_unchecked(
        attrs: Vec<EnvelopeAttr>,
        positions: Vec<f64>,
        speeds: Vec<f64>,
        time_deltas: Vec<f64>,
    ) -> Self {
        let mut attrs_dedup: Vec<EnvelopeAttr> = Vec::with_capacity(attrs.len());
        for attr in attrs {
            Self::put_attr(&mut attrs_dedup, attr);
        }

        let mut cumulative_times = Vec::with_capacity(positions.len());
        let mut total = 0.0;
        cumulative_times.push(total);
        for delta in &time_deltas {
            total += delta;
            cumulative_times.push(total);
        }

        let min_speed = speeds.iter().copied().fold(f64::INFINITY, f64::min);
        let max_speed = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            attrs: attrs_dedup,
            positions,
            speeds,
            time_deltas,
            cumulative_times,
            min_speed,
            max_speed,
        }
    }

    fn put_attr(attrs: &mut Vec<EnvelopeAttr>, attr: EnvelopeAttr) {
        match attrs.iter_mut().find(|a| discriminant(*a) == discriminant(&attr)) {
            Some(existing) => *existing = attr,
            None => attrs.push(attr),
        }
    }

    // -----------------------------------------------------------------
    // Attributes

    pub fn attrs(&self) -> &[EnvelopeAttr] {
        &self.attrs
    }

    pub fn has_attr(&self, attr: EnvelopeAttr) -> bool {
        self.attrs.contains(&attr)
    }

    pub fn profile(&self) -> Option<EnvelopeProfile> {
        self.attrs.iter().find_map(|attr| match attr {
            EnvelopeAttr::Profile(profile) => Some(*profile),
            _ => None,
        })
    }

    pub fn has_profile(&self, profile: EnvelopeProfile) -> bool {
        self.profile() == Some(profile)
    }

    /// A copy of this part with an attribute added or replaced.
    pub fn with_attr(&self, attr: EnvelopeAttr) -> Self {
        let mut part = self.clone();
        Self::put_attr(&mut part.attrs, attr);
        part
    }

    // -----------------------------------------------------------------
    // Samples

    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    pub fn step_count(&self) -> usize {
        self.time_deltas.len()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn speeds(&self) -> &[f64] {
        &self.speeds
    }

    pub fn time_deltas(&self) -> &[f64] {
        &self.time_deltas
    }

    pub fn point_pos(&self, index: usize) -> f64 {
        self.positions[index]
    }

    pub fn point_speed(&self, index: usize) -> f64 {
        self.speeds[index]
    }

    pub fn step_begin_pos(&self, step: usize) -> f64 {
        self.positions[step]
    }

    pub fn step_end_pos(&self, step: usize) -> f64 {
        self.positions[step + 1]
    }

    pub fn step_begin_speed(&self, step: usize) -> f64 {
        self.speeds[step]
    }

    pub fn step_end_speed(&self, step: usize) -> f64 {
        self.speeds[step + 1]
    }

    pub fn step_time(&self, step: usize) -> f64 {
        self.time_deltas[step]
    }

    pub fn begin_pos(&self) -> f64 {
        self.positions[0]
    }

    pub fn end_pos(&self) -> f64 {
        self.positions[self.positions.len() - 1]
    }

    pub fn begin_speed(&self) -> f64 {
        self.speeds[0]
    }

    pub fn end_speed(&self) -> f64 {
        self.speeds[self.speeds.len() - 1]
    }

    pub fn min_speed(&self) -> f64 {
        self.min_speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn length(&self) -> f64 {
        self.end_pos() - self.begin_pos()
    }

    pub fn total_time(&self) -> f64 {
        self.cumulative_times[self.cumulative_times.len() - 1]
    }

    /// Time elapsed between the beginning of the part and a point
    pub fn total_time_at(&self, point: usize) -> f64 {
        self.cumulative_times[point]
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.begin_pos() && position <= self.end_pos()
    }

    // -----------------------------------------------------------------
    // Lookup and interpolation

    /// Index of the step containing `position`, preferring the step on the left
    /// when the position falls on a point.
    pub fn find_left(&self, position: f64) -> Option<usize> {
        if !self.contains(position) {
            return None;
        }
        // number of points strictly before the position
        let before = self.positions.partition_point(|&p| p < position);
        Some(before.saturating_sub(1).min(self.step_count() - 1))
    }

    /// Index of the step containing `position`, preferring the step on the right
    /// when the position falls on a point.
    pub fn find_right(&self, position: f64) -> Option<usize> {
        if !self.contains(position) {
            return None;
        }
        // number of points before or at the position
        let before = self.positions.partition_point(|&p| p <= position);
        Some(before.saturating_sub(1).min(self.step_count() - 1))
    }

    /// Speed at `position` on a given step.
    pub fn interpolate_speed_at_step(&self, step: usize, position: f64) -> f64 {
        interpolate_step_speed(
            self.positions[step],
            self.positions[step + 1],
            self.speeds[step],
            self.speeds[step + 1],
            position,
        )
    }

    /// Speed at `position`, clamped to the part bounds.
    pub fn interpolate_speed(&self, position: f64) -> f64 {
        let position = position.clamp(self.begin_pos(), self.end_pos());
        match self.find_left(position) {
            Some(step) => self.interpolate_speed_at_step(step, position),
            None => self.begin_speed(),
        }
    }

    /// Time elapsed between the beginning of the part and `position`, clamped to the part bounds.
    pub fn interpolate_total_time(&self, position: f64) -> f64 {
        let position = position.clamp(self.begin_pos(), self.end_pos());
        let step = match self.find_left(position) {
            Some(step) => step,
            None => return 0.0,
        };
        if position == self.positions[step + 1] {
            return self.cumulative_times[step + 1];
        }
        self.cumulative_times[step]
            + interpolate_step_time(
                self.positions[step],
                self.positions[step + 1],
                self.speeds[step],
                self.speeds[step + 1],
                position,
            )
    }

    /// First position at which the part reaches `speed`, if it ever does.
    pub fn find_speed_crossing(&self, speed: f64) -> Option<f64> {
        (0..self.step_count()).find_map(|step| {
            let (v1, v2) = (self.speeds[step], self.speeds[step + 1]);
            if v1 == speed {
                return Some(self.positions[step]);
            }
            let (low, high) = if v1 < v2 { (v1, v2) } else { (v2, v1) };
            if speed < low || speed > high {
                return None;
            }
            Some(intersect_step_with_speed(
                self.positions[step],
                self.positions[step + 1],
                v1,
                v2,
                speed,
            ))
        })
    }

    // -----------------------------------------------------------------
    // Derived parts

    /// Cuts the part to `[begin, end]`. Edge speeds may be forced to a given value,
    /// otherwise they are interpolated. Returns `None` if nothing is left.
    pub fn slice(
        &self,
        begin: f64,
        begin_speed: Option<f64>,
        end: f64,
        end_speed: Option<f64>,
    ) -> Option<Self> {
        let begin = begin.max(self.begin_pos());
        let end = end.min(self.end_pos());
        if begin >= end {
            return None;
        }
        if begin == self.begin_pos()
            && end == self.end_pos()
            && begin_speed.map_or(true, |v| v == self.begin_speed())
            && end_speed.map_or(true, |v| v == self.end_speed())
        {
            return Some(self.clone());
        }

        let first_step = self.find_right(begin)?;
        let last_step = self.find_left(end)?;

        // (position, speed, index of the original sample if unchanged)
        let mut points: Vec<(f64, f64, Option<usize>)> = Vec::with_capacity(last_step - first_step + 3);
        let begin_origin = if begin == self.positions[first_step] && begin_speed.is_none() {
            Some(first_step)
        } else {
            None
        };
        let begin_speed =
            begin_speed.unwrap_or_else(|| self.interpolate_speed_at_step(first_step, begin));
        points.push((begin, begin_speed, begin_origin));
        for index in (first_step + 1)..=last_step {
            let position = self.positions[index];
            if position > begin && position < end {
                points.push((position, self.speeds[index], Some(index)));
            }
        }
        let end_origin = if end == self.positions[last_step + 1] && end_speed.is_none() {
            Some(last_step + 1)
        } else {
            None
        };
        let end_speed = end_speed.unwrap_or_else(|| self.interpolate_speed_at_step(last_step, end));
        points.push((end, end_speed, end_origin));

        let mut positions = Vec::with_capacity(points.len());
        let mut speeds = Vec::with_capacity(points.len());
        let mut time_deltas = Vec::with_capacity(points.len() - 1);
        for (i, &(position, speed, _)) in points.iter().enumerate() {
            positions.push(position);
            speeds.push(speed);
            if i == 0 {
                continue;
            }
            let (prev_pos, prev_speed, prev_origin) = points[i - 1];
            let delta = match (prev_origin, points[i].2) {
                (Some(a), Some(b)) if b == a + 1 => self.time_deltas[a],
                _ => compute_step_time(prev_pos, position, prev_speed, speed),
            };
            time_deltas.push(delta);
        }
        Some(Self::new_unchecked(self.attrs.clone(), positions, speeds, time_deltas))
    }

    /// Multiplies all speeds by `ratio`, dividing step times accordingly.
    pub fn scale_speeds(&self, ratio: f64) -> Self {
        let speeds = self.speeds.iter().map(|v| v * ratio).collect();
        let time_deltas = self.time_deltas.iter().map(|t| t / ratio).collect();
        Self::new_unchecked(self.attrs.clone(), self.positions.clone(), speeds, time_deltas)
    }
}
