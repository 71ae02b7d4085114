use crate::error::EnvelopeError;
use crate::physics::{PhysicsPath, POSITION_EPSILON};

/// A path described by piecewise constant grades.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeSimPath {
    length: f64,
    /// Points at which the grade changes, from 0 to `length`
    grade_positions: Vec<f64>,
    /// Grade in m/km between consecutive grade positions
    grade_values: Vec<f64>,
    /// Cumulative sum of grade × distance at each grade position
    grade_cum_sums: Vec<f64>,
}

impl EnvelopeSimPath {
    pub fn new(
        length: f64,
        grade_positions: Vec<f64>,
        grade_values: Vec<f64>,
    ) -> Result<Self, EnvelopeError> {
        if !length.is_finite() || length <= 0.0 {
            return Err(EnvelopeError::InvalidParameter("path length must be positive"));
        }
        if grade_positions.len() != grade_values.len() + 1 {
            return Err(EnvelopeError::InvalidParameter(
                "expected one more grade position than grade values",
            ));
        }
        if grade_positions.first() != Some(&0.0) || grade_positions.last() != Some(&length) {
            return Err(EnvelopeError::InvalidParameter("grade positions must span the path"));
        }
        if grade_positions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EnvelopeError::InvalidParameter(
                "grade positions must be strictly increasing",
            ));
        }

        let mut grade_cum_sums = Vec::with_capacity(grade_positions.len());
        let mut cum_sum = 0.0;
        grade_cum_sums.push(cum_sum);
        for (range, grade) in grade_positions.windows(2).zip(&grade_values) {
            cum_sum += grade * (range[1] - range[0]);
            grade_cum_sums.push(cum_sum);
        }

        Ok(Self {
            length,
            grade_positions,
            grade_values,
            grade_cum_sums,
        })
    }

    pub fn flat(length: f64) -> Result<Self, EnvelopeError> {
        Self::new(length, vec![0.0, length], vec![0.0])
    }

    /// Index of the grade range containing a position.
    fn range_index(&self, position: f64) -> usize {
        let index = self.grade_positions.partition_point(|&p| p <= position);
        index.saturating_sub(1).min(self.grade_values.len() - 1)
    }

    fn cum_grade(&self, position: f64) -> f64 {
        let index = self.range_index(position);
        self.grade_cum_sums[index] + self.grade_values[index] * (position - self.grade_positions[index])
    }

    pub fn grade_at(&self, position: f64) -> f64 {
        self.grade_values[self.range_index(position.clamp(0.0, self.length))]
    }
}

impl PhysicsPath for EnvelopeSimPath {
    fn length(&self) -> f64 {
        self.length
    }

    fn average_grade(&self, begin: f64, end: f64) -> f64 {
        let begin = begin.clamp(0.0, self.length);
        let end = end.clamp(0.0, self.length);
        if (end - begin).abs() < POSITION_EPSILON {
            return self.grade_at(begin);
        }
        (self.cum_grade(end) - self.cum_grade(begin)) / (end - begin)
    }
}
