//! Allowance distribution: slows a base envelope down over a region so that it
//! takes a requested amount of extra time.
//!
//! The region is split into ranges, each with its own [`AllowanceValue`], and
//! each range is split into sections at stops. Every section is recomputed with
//! a [`DoubleBinarySearch`] over the parameter of the chosen algorithm:
//! - MARECO: the speed `v1` the envelope is capped at, coasting before slowdowns
//! - LINEAR: the max speed of the envelope, all speeds being scaled accordingly
//!
//! Ranges are computed from the shortest to the longest. Once computed, a range
//! imposes its edge speeds on its neighbours, which join them with braking or
//! accelerating junctions.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allowance_value::{AllowanceDistribution, AllowanceRange, AllowanceValue};
use crate::binary_search::DoubleBinarySearch;
use crate::coasting::{AcceleratingSlopeCoast, BrakingPhaseCoast, CoastingOpportunity};
use crate::constraints::EnvelopePartConstraint;
use crate::envelope::{Envelope, EnvelopeBuilder};
use crate::envelope_part::{EnvelopeAttr, EnvelopePart, EnvelopeProfile};
use crate::error::{AllowanceError, EnvelopeError};
use crate::overlays;
use crate::part_builder::{ConstrainedEnvelopePartBuilder, EnvelopePartBuilder};
use crate::physics::{are_positions_equal, EnvelopeSimContext, PhysicsRollingStock};

type JunctionBuilder<'a> = ConstrainedEnvelopePartBuilder<'a, EnvelopePartBuilder>;

/// How sections are slowed down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowanceAlgorithm {
    /// Energy efficient: lower the max speed and coast before slowdowns
    Mareco,
    /// Scale all speeds by the same ratio
    Linear,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allowance {
    pub begin_pos: f64,
    pub end_pos: f64,
    /// Speed under which the train is never slowed down, 0 to disable
    #[serde(default)]
    pub capacity_speed_limit: f64,
    /// Sorted, contiguous and covering `[begin_pos, end_pos]`
    pub ranges: Vec<AllowanceRange>,
    pub algorithm: AllowanceAlgorithm,
    pub distribution: AllowanceDistribution,
}

impl Allowance {
    /// Maximum number of attempts per section.
    const BINARY_SEARCH_DEPTH: usize = 20;
    /// Maximum number of times the MARECO high bound is doubled.
    const HIGH_BOUND_DOUBLINGS: usize = 30;

    pub fn new(
        begin_pos: f64,
        end_pos: f64,
        capacity_speed_limit: f64,
        ranges: Vec<AllowanceRange>,
        algorithm: AllowanceAlgorithm,
        distribution: AllowanceDistribution,
    ) -> Result<Self, AllowanceError> {
        let allowance = Self {
            begin_pos,
            end_pos,
            capacity_speed_limit,
            ranges,
            algorithm,
            distribution,
        };
        allowance.validate()?;
        Ok(allowance)
    }

    /// A MARECO allowance using the same value over `[begin_pos, end_pos]`.
    pub fn mareco(begin_pos: f64, end_pos: f64, value: AllowanceValue) -> Result<Self, AllowanceError> {
        Self::new(
            begin_pos,
            end_pos,
            0.0,
            vec![AllowanceRange::new(begin_pos, end_pos, value)],
            AllowanceAlgorithm::Mareco,
            value.default_distribution(),
        )
    }

    /// A linear allowance using the same value over `[begin_pos, end_pos]`.
    pub fn linear(begin_pos: f64, end_pos: f64, value: AllowanceValue) -> Result<Self, AllowanceError> {
        Self::new(
            begin_pos,
            end_pos,
            0.0,
            vec![AllowanceRange::new(begin_pos, end_pos, value)],
            AllowanceAlgorithm::Linear,
            value.default_distribution(),
        )
    }

    pub fn with_capacity_speed_limit(mut self, capacity_speed_limit: f64) -> Self {
        self.capacity_speed_limit = capacity_speed_limit;
        self
    }

    pub fn validate(&self) -> Result<(), AllowanceError> {
        if self.begin_pos.is_nan() || self.end_pos.is_nan() || self.begin_pos >= self.end_pos {
            return Err(AllowanceError::RangeOutOfBounds {
                begin: self.begin_pos,
                end: self.end_pos,
            });
        }
        if !self.capacity_speed_limit.is_finite() || self.capacity_speed_limit < 0.0 {
            return Err(AllowanceError::InvalidValue("capacity speed limit must be positive"));
        }
        if self.ranges.is_empty() {
            return Err(AllowanceError::InvalidValue("an allowance needs at least one range"));
        }
        let mut expected_begin = self.begin_pos;
        for range in &self.ranges {
            if !are_positions_equal(range.begin_pos, expected_begin)
                || range.end_pos <= range.begin_pos
                || range.end_pos > self.end_pos
            {
                return Err(AllowanceError::RangeOutOfBounds {
                    begin: range.begin_pos,
                    end: range.end_pos,
                });
            }
            range.value.validate()?;
            expected_begin = range.end_pos;
        }
        if !are_positions_equal(expected_begin, self.end_pos) {
            return Err(AllowanceError::RangeOutOfBounds {
                begin: expected_begin,
                end: self.end_pos,
            });
        }
        Ok(())
    }

    /// Total time the allowance adds to `base`.
    pub fn added_time(&self, base: &Envelope) -> Result<f64, AllowanceError> {
        let mut added_time = 0.0;
        for range in &self.ranges {
            let base_time = base.time_between(range.begin_pos, range.end_pos)?;
            added_time += range.value.allowance_time(base_time, range.end_pos - range.begin_pos);
        }
        Ok(added_time)
    }

    /// Returns `base` slowed down over `[begin_pos, end_pos]`, untouched elsewhere.
    pub fn apply(&self, base: &Envelope, context: &EnvelopeSimContext) -> Result<Envelope, AllowanceError> {
        self.validate()?;
        if self.begin_pos < base.begin_pos() || self.end_pos > base.end_pos() {
            return Err(AllowanceError::OutOfBounds {
                begin: self.begin_pos,
                end: self.end_pos,
            });
        }
        if let Some(position) = base.find_discontinuity() {
            return Err(EnvelopeError::Discontinuity { position }.into());
        }

        let region = Envelope::new(base.slice(self.begin_pos, self.end_pos)?)?;
        let ranges = self.compute_allowance_region(&region, context)?;

        let mut builder = EnvelopeBuilder::new();
        builder.add_parts(base.slice(base.begin_pos(), self.begin_pos)?);
        for range in &ranges {
            builder.add_envelope(range);
        }
        builder.add_parts(base.slice(self.end_pos, base.end_pos())?);
        let result = builder.build()?;
        if let Some(position) = result.find_discontinuity() {
            return Err(EnvelopeError::Discontinuity { position }.into());
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // Region, ranges and sections

    fn compute_allowance_region(
        &self,
        region: &Envelope,
        context: &EnvelopeSimContext,
    ) -> Result<Vec<Envelope>, AllowanceError> {
        let range_count = self.ranges.len();
        let region_time = region.total_time();

        let base_ranges = self
            .ranges
            .iter()
            .map(|range| Envelope::new(region.slice(range.begin_pos, range.end_pos)?))
            .collect::<Result<Vec<_>, _>>()?;

        // speeds at range transitions, known at the region edges and imposed by computed ranges elsewhere
        let mut transition_speeds = vec![None; range_count + 1];
        transition_speeds[0] = Some(region.begin_speed());
        transition_speeds[range_count] = Some(region.end_speed());

        let mut order: Vec<usize> = (0..range_count).collect();
        order.sort_by(|&a, &b| base_ranges[a].total_time().total_cmp(&base_ranges[b].total_time()));

        let mut results: Vec<Option<Envelope>> = vec![None; range_count];
        for index in order {
            debug!(range = index + 1, "computing range");
            let base_range = &base_ranges[index];
            let tolerance = context.time_step * base_range.total_time() / region_time;
            let result = self.compute_allowance_range(
                base_range,
                context,
                &self.ranges[index],
                transition_speeds[index],
                transition_speeds[index + 1],
                tolerance,
            )?;
            transition_speeds[index] = Some(result.begin_speed());
            transition_speeds[index + 1] = Some(result.end_speed());
            results[index] = Some(result);
        }
        Ok(results.into_iter().flatten().collect())
    }

    fn compute_allowance_range(
        &self,
        base_range: &Envelope,
        context: &EnvelopeSimContext,
        range: &AllowanceRange,
        begin_speed: Option<f64>,
        end_speed: Option<f64>,
        tolerance: f64,
    ) -> Result<Envelope, AllowanceError> {
        let base_time = base_range.total_time();
        let base_distance = base_range.total_distance();
        let added_time = range.value.allowance_time(base_time, base_distance);
        if added_time == 0.0 {
            return Ok(base_range.clone());
        }
        let target_time = base_time + added_time;

        if self.capacity_speed_limit > 0.0 {
            let slowest = base_range.cap_speed(self.capacity_speed_limit, &[EnvelopeAttr::CapacitySpeedLimit])?;
            if target_time > slowest.total_time() {
                warn!(
                    target_time,
                    slowest_time = slowest.total_time(),
                    "allowance can't be reached above the capacity speed limit"
                );
                return Err(AllowanceError::TooMuchTime);
            }
        }

        // sections go from stop to stop
        let mut split_points = vec![base_range.begin_pos()];
        for part in base_range.parts() {
            if part.end_speed() == 0.0 && part.end_pos() > split_points[split_points.len() - 1] {
                split_points.push(part.end_pos());
            }
        }
        if split_points[split_points.len() - 1] < base_range.end_pos() {
            split_points.push(base_range.end_pos());
        }

        let section_count = split_points.len() - 1;
        let mut builder = EnvelopeBuilder::new();
        for (index, bounds) in split_points.windows(2).enumerate() {
            debug!(section = index + 1, of = section_count, "computing section");
            let section = Envelope::new(base_range.slice(bounds[0], bounds[1])?)?;
            let section_time = section.total_time();
            let ratio = self.distribution.section_ratio(
                section_time,
                base_time,
                section.total_distance(),
                base_distance,
            );
            let section_target = section_time + added_time * ratio;
            let imposed_begin = if index == 0 { begin_speed } else { None };
            let imposed_end = if index == section_count - 1 { end_speed } else { None };
            let result = self.compute_allowance_section(
                &section,
                context,
                section_target,
                tolerance * ratio,
                imposed_begin,
                imposed_end,
            )?;
            builder.add_envelope(&result);
        }
        Ok(builder.build()?)
    }

    fn compute_allowance_section(
        &self,
        section: &Envelope,
        context: &EnvelopeSimContext,
        target_time: f64,
        tolerance: f64,
        begin_speed: Option<f64>,
        end_speed: Option<f64>,
    ) -> Result<Envelope, AllowanceError> {
        let low_bound = self.initial_low_bound();
        let high_bound = self.initial_high_bound(section, context.rolling_stock);
        if low_bound > high_bound {
            return Err(AllowanceError::TooMuchTime);
        }

        debug!(target_time, low_bound, high_bound, "section search");
        let mut search = DoubleBinarySearch::new(low_bound, high_bound, target_time, tolerance, true);
        let mut last_error = None;
        let mut result = None;
        for attempt in 1..=Self::BINARY_SEARCH_DEPTH {
            if search.complete() {
                break;
            }
            let input = search.input();
            debug!(attempt, input, "starting attempt");
            match self.compute_iteration(section, context, input, begin_speed, end_speed) {
                Ok(envelope) => {
                    debug!(time = envelope.total_time(), "envelope computed");
                    search.feedback(envelope.total_time());
                    result = Some(envelope);
                }
                Err(AllowanceError::TooMuchTime) => {
                    debug!("couldn't build an envelope slow enough");
                    search.feedback(f64::INFINITY);
                    last_error = Some(AllowanceError::TooMuchTime);
                }
                Err(AllowanceError::NotEnoughTime) => {
                    debug!("couldn't build an envelope fast enough");
                    search.feedback(0.0);
                    last_error = Some(AllowanceError::NotEnoughTime);
                }
                Err(err) => return Err(err),
            }
        }

        if !search.complete() {
            let err = last_error.unwrap_or_else(|| search.failure());
            warn!(%err, target_time, "allowance section did not converge");
            return Err(err);
        }
        result.ok_or_else(|| search.failure())
    }

    // -----------------------------------------------------------------
    // One attempt

    /// Computes the section for a given search input, joined to the imposed edge speeds.
    pub fn compute_iteration(
        &self,
        section: &Envelope,
        context: &EnvelopeSimContext,
        input: f64,
        begin_speed: Option<f64>,
        end_speed: Option<f64>,
    ) -> Result<Envelope, AllowanceError> {
        let core = self.compute_core(section, context, input)?;

        let left = match begin_speed {
            Some(speed) => Self::compute_left_junction(section, &core, context, speed)?,
            None => None,
        };
        let core_with_left = match &left {
            Some(part) => {
                let mut builder = EnvelopeBuilder::new();
                builder.add_part(part.clone());
                builder.add_parts(core.slice_with_speeds(
                    part.end_pos(),
                    Some(part.end_speed()),
                    core.end_pos(),
                    None,
                )?);
                Some(builder.build()?)
            }
            None => None,
        };
        let target = core_with_left.as_ref().unwrap_or(&core);
        let right = match end_speed {
            Some(speed) => Self::compute_right_junction(section, target, context, speed)?,
            None => None,
        };

        let left_end = left.as_ref().map_or(section.begin_pos(), EnvelopePart::end_pos);
        let right_begin = right.as_ref().map_or(section.end_pos(), EnvelopePart::begin_pos);
        let result = if right_begin <= left_end {
            match (left, right) {
                (Some(left), Some(right)) => Self::intersect_left_right(left, right)?,
                _ => return Err(AllowanceError::TooMuchTime),
            }
        } else {
            let mut builder = EnvelopeBuilder::new();
            let left_end_speed = left.as_ref().map(EnvelopePart::end_speed);
            let right_begin_speed = right.as_ref().map(EnvelopePart::begin_speed);
            builder.add_parts(left);
            builder.add_parts(core.slice_with_speeds(left_end, left_end_speed, right_begin, right_begin_speed)?);
            builder.add_parts(right);
            builder.build()?
        };

        if let Some(position) = result.find_discontinuity() {
            return Err(EnvelopeError::Discontinuity { position }.into());
        }
        Ok(result)
    }

    fn compute_core(
        &self,
        section: &Envelope,
        context: &EnvelopeSimContext,
        input: f64,
    ) -> Result<Envelope, AllowanceError> {
        match self.algorithm {
            AllowanceAlgorithm::Mareco => self.compute_mareco_core(section, context, input),
            AllowanceAlgorithm::Linear => Self::compute_linear_core(section, input),
        }
    }

    fn initial_low_bound(&self) -> f64 {
        self.capacity_speed_limit
    }

    fn initial_high_bound(&self, section: &Envelope, rolling_stock: &dyn PhysicsRollingStock) -> f64 {
        let section_max_speed = section.max_speed();
        match self.algorithm {
            AllowanceAlgorithm::Linear => section_max_speed,
            AllowanceAlgorithm::Mareco => {
                // high enough for the coasting floor to stay above every speed of the section
                let mut high_bound = section_max_speed;
                for _ in 0..Self::HIGH_BOUND_DOUBLINGS {
                    if compute_vf(rolling_stock, high_bound) >= section_max_speed {
                        break;
                    }
                    high_bound *= 2.0;
                }
                high_bound
            }
        }
    }

    // -----------------------------------------------------------------
    // Junctions

    /// Joins the imposed begin speed to the core.
    fn compute_left_junction(
        section: &Envelope,
        core: &Envelope,
        context: &EnvelopeSimContext,
        imposed_speed: f64,
    ) -> Result<Option<EnvelopePart>, AllowanceError> {
        let begin = section.begin_pos();
        let range = EnvelopePartConstraint::position_range(begin, section.end_pos());
        if imposed_speed > core.begin_speed() {
            let mut builder = JunctionBuilder::new(
                EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Braking)),
                vec![range, EnvelopePartConstraint::envelope_floor(core)],
            );
            let started = overlays::decelerate(context, &mut builder, begin, imposed_speed, 1.0)?;
            Self::finish_junction(builder, started)
        } else if imposed_speed < section.begin_speed() {
            let mut builder = JunctionBuilder::new(
                EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Accelerating)),
                vec![
                    range,
                    EnvelopePartConstraint::envelope_ceiling(core),
                    EnvelopePartConstraint::envelope_ceiling(section),
                ],
            );
            let started = overlays::accelerate(context, &mut builder, begin, imposed_speed, 1.0)?;
            Self::finish_junction(builder, started)
        } else {
            Ok(None)
        }
    }

    /// Joins the target envelope to the imposed end speed, built backward from the section end.
    fn compute_right_junction(
        section: &Envelope,
        target: &Envelope,
        context: &EnvelopeSimContext,
        imposed_speed: f64,
    ) -> Result<Option<EnvelopePart>, AllowanceError> {
        let end = section.end_pos();
        let range = EnvelopePartConstraint::position_range(section.begin_pos(), end);
        if imposed_speed > target.end_speed() {
            let mut builder = JunctionBuilder::new(
                EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Accelerating)),
                vec![range, EnvelopePartConstraint::envelope_floor(target)],
            );
            let started = overlays::accelerate(context, &mut builder, end, imposed_speed, -1.0)?;
            Self::finish_junction(builder, started)
        } else if imposed_speed < section.end_speed() {
            let mut builder = JunctionBuilder::new(
                EnvelopePartBuilder::new().with_attr(EnvelopeAttr::Profile(EnvelopeProfile::Braking)),
                vec![range, EnvelopePartConstraint::envelope_ceiling(target)],
            );
            let started = overlays::decelerate(context, &mut builder, end, imposed_speed, -1.0)?;
            Self::finish_junction(builder, started)
        } else {
            Ok(None)
        }
    }

    fn finish_junction(
        builder: JunctionBuilder,
        started: bool,
    ) -> Result<Option<EnvelopePart>, AllowanceError> {
        if !started {
            return Ok(None);
        }
        // running out of section means the core can't be reached from the imposed speed
        if builder.last_intersection() == Some(0) {
            return Err(AllowanceError::TooMuchTime);
        }
        let part = builder.into_sink();
        if part.is_empty() {
            return Ok(None);
        }
        Ok(Some(part.build()?))
    }

    /// The junctions crossed each other: keep the left one up to the right one.
    fn intersect_left_right(left: EnvelopePart, right: EnvelopePart) -> Result<Envelope, AllowanceError> {
        let sliced = left.slice(left.begin_pos(), None, right.begin_pos(), Some(right.begin_speed()));
        match sliced {
            Some(sliced) if sliced.end_pos() == right.begin_pos() => Ok(Envelope::new(vec![sliced, right])?),
            _ => Err(AllowanceError::TooMuchTime),
        }
    }

    // -----------------------------------------------------------------
    // Algorithms

    /// Caps the section at `v1`, then coasts before every slowdown and accelerating slope.
    fn compute_mareco_core(
        &self,
        section: &Envelope,
        context: &EnvelopeSimContext,
        v1: f64,
    ) -> Result<Envelope, AllowanceError> {
        if v1 <= 0.0 {
            return Err(AllowanceError::TooMuchTime);
        }
        let vf = compute_vf(context.rolling_stock, v1).max(self.capacity_speed_limit);
        let capped = section.cap_speed(v1, &[])?;

        let mut opportunities: Vec<CoastingOpportunity> = AcceleratingSlopeCoast::find_all(&capped, context, vf)
            .into_iter()
            .map(CoastingOpportunity::AcceleratingSlope)
            .chain(
                BrakingPhaseCoast::find_all(&capped, vf)
                    .into_iter()
                    .map(CoastingOpportunity::BrakingPhase),
            )
            .collect();
        // the last opportunities are evaluated first, skipping the ones they overlap
        opportunities.sort_by(|a, b| b.end_position().total_cmp(&a.end_position()));

        let mut core = capped.clone();
        let mut last_coast_begin = f64::INFINITY;
        for opportunity in &opportunities {
            if last_coast_begin < opportunity.end_position() {
                continue;
            }
            let part = match opportunity.compute(&capped, context, v1, vf)? {
                Some(part) => part,
                None => continue,
            };
            last_coast_begin = part.begin_pos();
            core = core.overlay(part)?;
        }
        Ok(core)
    }

    /// Scales the section so that its max speed becomes `max_speed`.
    fn compute_linear_core(section: &Envelope, max_speed: f64) -> Result<Envelope, AllowanceError> {
        if max_speed <= 0.0 {
            return Err(AllowanceError::TooMuchTime);
        }
        let ratio = max_speed / section.max_speed();
        let parts = section.parts().iter().map(|part| part.scale_speeds(ratio)).collect();
        Ok(Envelope::new(parts)?)
    }
}

/// The coasting floor matching a MARECO max speed `v1`.
pub fn compute_vf(rolling_stock: &dyn PhysicsRollingStock, v1: f64) -> f64 {
    let wle = v1 * v1 * rolling_stock.rolling_resistance_deriv(v1);
    wle * v1 / (wle + rolling_stock.rolling_resistance(v1) * v1)
}
