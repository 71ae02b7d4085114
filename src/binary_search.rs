use crate::error::AllowanceError;

/// Bisection over one input driving a monotonic output toward a target.
///
/// The caller alternates `input()` and `feedback(output)` until `complete()`,
/// bounding the number of iterations itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DoubleBinarySearch {
    low_bound: f64,
    high_bound: f64,
    target: f64,
    tolerance: f64,
    /// Whether the output decreases when the input increases
    decreasing: bool,
    input: f64,
    has_raised_low_bound: bool,
    has_lowered_high_bound: bool,
    complete: bool,
}

impl DoubleBinarySearch {
    pub fn new(low_bound: f64, high_bound: f64, target: f64, tolerance: f64, decreasing: bool) -> Self {
        debug_assert!(low_bound <= high_bound);
        Self {
            low_bound,
            high_bound,
            target,
            tolerance,
            decreasing,
            input: (low_bound + high_bound) / 2.0,
            has_raised_low_bound: false,
            has_lowered_high_bound: false,
            complete: false,
        }
    }

    /// The next input to evaluate
    pub fn input(&self) -> f64 {
        self.input
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low_bound, self.high_bound)
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    pub fn has_raised_low_bound(&self) -> bool {
        self.has_raised_low_bound
    }

    pub fn has_lowered_high_bound(&self) -> bool {
        self.has_lowered_high_bound
    }

    /// Reports the output obtained for the current input and moves the bracket.
    pub fn feedback(&mut self, output: f64) {
        if self.complete {
            return;
        }
        if (output - self.target).abs() <= self.tolerance {
            self.complete = true;
            return;
        }
        let output_too_high = output > self.target;
        if output_too_high != self.decreasing {
            self.high_bound = self.input;
            self.has_lowered_high_bound = true;
        } else {
            self.low_bound = self.input;
            self.has_raised_low_bound = true;
        }
        self.input = (self.low_bound + self.high_bound) / 2.0;
    }

    /// Why the search did not converge.
    ///
    /// Never moving a bound means the target lies past it: with a decreasing
    /// output, the low bound is the slowest case and the high bound the fastest.
    pub fn failure(&self) -> AllowanceError {
        if !self.has_raised_low_bound {
            AllowanceError::TooMuchTime
        } else if !self.has_lowered_high_bound {
            AllowanceError::NotEnoughTime
        } else {
            AllowanceError::Discontinuity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run(search: &mut DoubleBinarySearch, function: impl Fn(f64) -> f64) -> usize {
        let mut iterations = 0;
        while !search.complete() && iterations < 1000 {
            let output = function(search.input());
            search.feedback(output);
            iterations += 1;
        }
        iterations
    }

    #[test]
    fn finds_cube_root_increasing() {
        let mut search = DoubleBinarySearch::new(0.0, 10.0, 4.0, 0.01, false);
        let iterations = run(&mut search, |x| x * x * x);
        assert!(search.complete());
        assert!(iterations < 1000);
        assert_abs_diff_eq!(search.input(), 1.5874, epsilon = 0.01);
    }

    #[test]
    fn finds_cube_root_decreasing() {
        let mut search = DoubleBinarySearch::new(0.0, 10.0, -4.0, 0.01, true);
        let iterations = run(&mut search, |x| -x * x * x);
        assert!(search.complete());
        assert!(iterations < 1000);
        assert_abs_diff_eq!(search.input(), 1.5874, epsilon = 0.01);
    }

    #[test]
    fn classifies_unreachable_targets() {
        // output always above target on a decreasing function: the slowest input is not slow enough
        let mut search = DoubleBinarySearch::new(0.0, 10.0, 10.0, 0.01, true);
        run(&mut search, |x| 5.0 - x);
        assert!(!search.complete());
        assert_eq!(search.failure(), AllowanceError::TooMuchTime);

        let mut search = DoubleBinarySearch::new(0.0, 10.0, -10.0, 0.01, true);
        run(&mut search, |x| 5.0 - x);
        assert!(!search.complete());
        assert_eq!(search.failure(), AllowanceError::NotEnoughTime);
    }

    #[test]
    fn classifies_discontinuities() {
        let mut search = DoubleBinarySearch::new(0.0, 10.0, 5.0, 0.01, true);
        run(&mut search, |x| if x < 3.0 { 10.0 } else { 0.0 });
        assert!(!search.complete());
        assert_eq!(search.failure(), AllowanceError::Discontinuity);
    }
}
