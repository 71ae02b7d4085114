//! Closed-form helpers for a single envelope step.
//!
//! Within a step the acceleration is assumed constant, which makes the
//! squared speed linear in position: v² = v₁² + 2·a·(x - x₁).

/// Speed at `position` on the step from (x1, v1) to (x2, v2).
pub fn interpolate_step_speed(x1: f64, x2: f64, v1: f64, v2: f64, position: f64) -> f64 {
    if position == x1 || x1 == x2 {
        return v1;
    }
    if position == x2 {
        return v2;
    }
    let ratio = (position - x1) / (x2 - x1);
    let squared = v1 * v1 + (v2 * v2 - v1 * v1) * ratio;
    squared.max(0.0).sqrt()
}

/// Time needed to go from (x1, v1) to (x2, v2) at constant acceleration.
pub fn compute_step_time(x1: f64, x2: f64, v1: f64, v2: f64) -> f64 {
    let distance = (x2 - x1).abs();
    if distance == 0.0 {
        return 0.0;
    }
    // mean speed of a constant acceleration step
    distance * 2.0 / (v1 + v2)
}

/// Time needed to go from the start of the step to `position`.
pub fn interpolate_step_time(x1: f64, x2: f64, v1: f64, v2: f64, position: f64) -> f64 {
    let speed = interpolate_step_speed(x1, x2, v1, v2, position);
    compute_step_time(x1, position, v1, speed)
}

/// Position at which the step reaches `speed`. The speed must lie between v1 and v2.
pub fn intersect_step_with_speed(x1: f64, x2: f64, v1: f64, v2: f64, speed: f64) -> f64 {
    let (s1, s2, target) = (v1 * v1, v2 * v2, speed * speed);
    if s1 == s2 {
        return x1;
    }
    let ratio = ((target - s1) / (s2 - s1)).clamp(0.0, 1.0);
    x1 + (x2 - x1) * ratio
}

/// Position at which two quantities linear in position over `[x1, x2]` become equal,
/// given their differences `d1` at `x1` and `d2` at `x2`.
pub fn intersect_linear_differences(x1: f64, x2: f64, d1: f64, d2: f64) -> f64 {
    if d1 == d2 {
        return x1;
    }
    let ratio = (d1 / (d1 - d2)).clamp(0.0, 1.0);
    x1 + (x2 - x1) * ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn squared_speed_is_linear_in_position() {
        let speed = interpolate_step_speed(0.0, 100.0, 10.0, 20.0, 50.0);
        assert_relative_eq!(speed * speed, 250.0);
        assert_eq!(interpolate_step_speed(0.0, 100.0, 10.0, 20.0, 0.0), 10.0);
        assert_eq!(interpolate_step_speed(0.0, 100.0, 10.0, 20.0, 100.0), 20.0);
    }

    #[test]
    fn step_time_uses_mean_speed() {
        assert_relative_eq!(compute_step_time(0.0, 100.0, 10.0, 10.0), 10.0);
        assert_relative_eq!(compute_step_time(100.0, 0.0, 0.0, 20.0), 10.0);
        let half = interpolate_step_time(0.0, 100.0, 10.0, 10.0, 50.0);
        assert_relative_eq!(half, 5.0);
    }

    #[test]
    fn finds_speed_crossing() {
        let position = intersect_step_with_speed(0.0, 100.0, 0.0, 10.0, 5.0);
        assert_relative_eq!(position, 25.0);
        let position = intersect_step_with_speed(100.0, 0.0, 0.0, 10.0, 5.0);
        assert_relative_eq!(position, 75.0);
    }

    #[test]
    fn intersects_differences() {
        assert_relative_eq!(intersect_linear_differences(10.0, 20.0, -1.0, 3.0), 12.5);
    }
}
