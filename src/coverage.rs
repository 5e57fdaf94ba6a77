//! # Coverage Calculation
//!
//! Merges the position ranges a listener actually played through into the number of
//! *unique* seconds heard and the furthest position reached. Replaying the same
//! seconds twice never counts twice.
//!
//! The sweep is pure and order-independent: any permutation of the same set of
//! intervals produces the same [`Coverage`].

/// A played range of track positions, in seconds. Always `end > start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    /// Builds an interval, discarding degenerate or non-finite ranges.
    pub fn new(start: f64, end: f64) -> Option<Self> {
        if start.is_finite() && end.is_finite() && end > start {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

/// Result of merging a set of intervals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coverage {
    /// Total length of the union of all intervals.
    pub unique_seconds: f64,
    /// Largest `end` of any interval.
    pub max_position: f64,
}

/// Sorts by start, sweeps merging overlapping or touching runs, and sums the merged
/// run lengths.
///
/// ```
/// use music::coverage::{calculate, Interval};
///
/// let intervals: Vec<Interval> = [(0.0, 30.0), (20.0, 50.0), (100.0, 110.0)]
///     .iter()
///     .filter_map(|&(s, e)| Interval::new(s, e))
///     .collect();
/// let coverage = calculate(&intervals);
/// assert_eq!(coverage.unique_seconds, 90.0);
/// assert_eq!(coverage.max_position, 110.0);
/// ```
pub fn calculate(intervals: &[Interval]) -> Coverage {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut coverage = Coverage::default();
    let mut runs = sorted.into_iter();
    let Some(first) = runs.next() else {
        return coverage;
    };

    let (mut run_start, mut run_end) = (first.start, first.end);
    coverage.max_position = first.end;

    for next in runs {
        coverage.max_position = coverage.max_position.max(next.end);
        if next.start <= run_end {
            run_end = run_end.max(next.end);
        } else {
            coverage.unique_seconds += run_end - run_start;
            run_start = next.start;
            run_end = next.end;
        }
    }
    coverage.unique_seconds += run_end - run_start;

    coverage
}
