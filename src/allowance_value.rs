use serde::{Deserialize, Serialize};

use crate::error::AllowanceError;

/// How much time an allowance adds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", rename_all = "snake_case")]
pub enum AllowanceValue {
    /// A fixed amount of seconds
    FixedTime { seconds: f64 },
    /// A percentage of the base running time
    Percentage { percentage: f64 },
    /// Minutes per 100 kilometers
    TimePerDistance { minutes: f64 },
}

impl AllowanceValue {
    pub fn validate(&self) -> Result<(), AllowanceError> {
        let value = match *self {
            AllowanceValue::FixedTime { seconds } => seconds,
            AllowanceValue::Percentage { percentage } => percentage,
            AllowanceValue::TimePerDistance { minutes } => minutes,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(AllowanceError::InvalidValue("allowance values must be positive"));
        }
        Ok(())
    }

    /// Seconds added over a range, given its base running time and length in meters.
    pub fn allowance_time(&self, base_time: f64, distance: f64) -> f64 {
        match *self {
            AllowanceValue::FixedTime { seconds } => seconds,
            AllowanceValue::Percentage { percentage } => base_time * percentage / 100.0,
            AllowanceValue::TimePerDistance { minutes } => minutes * 60.0 * distance / 100_000.0,
        }
    }

    /// The distribution matching the unit of the value.
    pub fn default_distribution(&self) -> AllowanceDistribution {
        match self {
            AllowanceValue::TimePerDistance { .. } => AllowanceDistribution::DistanceRatio,
            _ => AllowanceDistribution::TimeRatio,
        }
    }
}

/// How the time added to a range is split among its sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowanceDistribution {
    TimeRatio,
    DistanceRatio,
}

impl AllowanceDistribution {
    /// Share of the range allowance given to a section.
    pub fn section_ratio(
        &self,
        section_time: f64,
        range_time: f64,
        section_distance: f64,
        range_distance: f64,
    ) -> f64 {
        match self {
            AllowanceDistribution::TimeRatio => section_time / range_time,
            AllowanceDistribution::DistanceRatio => section_distance / range_distance,
        }
    }
}

/// A value applying over `[begin_pos, end_pos]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllowanceRange {
    pub begin_pos: f64,
    pub end_pos: f64,
    pub value: AllowanceValue,
}

impl AllowanceRange {
    pub fn new(begin_pos: f64, end_pos: f64, value: AllowanceValue) -> Self {
        Self {
            begin_pos,
            end_pos,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn converts_values_to_time() {
        let fixed = AllowanceValue::FixedTime { seconds: 30.0 };
        assert_eq!(fixed.allowance_time(600.0, 10_000.0), 30.0);
        let percentage = AllowanceValue::Percentage { percentage: 5.0 };
        assert_relative_eq!(percentage.allowance_time(600.0, 10_000.0), 30.0);
        let per_distance = AllowanceValue::TimePerDistance { minutes: 4.5 };
        assert_relative_eq!(per_distance.allowance_time(600.0, 100_000.0), 270.0);
        assert_relative_eq!(per_distance.allowance_time(600.0, 50_000.0), 135.0);
    }

    #[test]
    fn distributes_by_ratio() {
        let time = AllowanceDistribution::TimeRatio;
        assert_relative_eq!(time.section_ratio(100.0, 400.0, 10.0, 20.0), 0.25);
        let distance = AllowanceDistribution::DistanceRatio;
        assert_relative_eq!(distance.section_ratio(100.0, 400.0, 10.0, 20.0), 0.5);
        assert_eq!(
            AllowanceValue::TimePerDistance { minutes: 1.0 }.default_distribution(),
            AllowanceDistribution::DistanceRatio
        );
    }

    #[test]
    fn rejects_negative_values() {
        assert!(AllowanceValue::Percentage { percentage: -1.0 }.validate().is_err());
        assert!(AllowanceValue::FixedTime { seconds: f64::NAN }.validate().is_err());
        assert!(AllowanceValue::FixedTime { seconds: 0.0 }.validate().is_ok());
    }

    #[test]
    fn loads_ranges_from_json() {
        let json = r#"[
            {"begin_pos": 0.0, "end_pos": 5000.0, "value": {"value_type": "percentage", "percentage": 5.0}},
            {"begin_pos": 5000.0, "end_pos": 8000.0, "value": {"value_type": "time_per_distance", "minutes": 3.0}}
        ]"#;
        let ranges: Vec<AllowanceRange> = serde_json::from_str(json).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].value, AllowanceValue::TimePerDistance { minutes: 3.0 });
        let distribution: AllowanceDistribution = serde_json::from_str("\"DISTANCE_RATIO\"").unwrap();
        assert_eq!(distribution, AllowanceDistribution::DistanceRatio);
    }
}
