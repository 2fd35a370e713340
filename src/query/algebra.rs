//! Streaming operators over scan results
//!
//! Every operator is a pure function of sorted, gap-tolerant
//! `(timestamp, value)` sequences. Gaps stay gaps: `sum` merges without
//! zero-filling, and the moving window emits at every step of the native
//! resolution whether or not the window holds data.

use crate::query::error::{QueryError, QueryResult};
use crate::store::PointSeries;

/// Multiply every value by `factor`
pub fn scale(series: &PointSeries, factor: f64) -> PointSeries {
    series.iter().map(|(ts, v)| (*ts, v * factor)).collect()
}

/// Sorted merge by timestamp; matching timestamps add, unmatched values
/// pass through unchanged
///
/// Missing is treated as identity-for-addition, not as a zero-filled gap:
/// the output carries a point wherever either input does, and only there.
pub fn sum(left: &PointSeries, right: &PointSeries) -> PointSeries {
    let mut out = Vec::with_capacity(left.len().max(right.len()));
    let mut l = 0;
    let mut r = 0;

    while l < left.len() && r < right.len() {
        let (lt, lv) = left[l];
        let (rt, rv) = right[r];
        if lt == rt {
            out.push((lt, lv + rv));
            l += 1;
            r += 1;
        } else if lt < rt {
            out.push((lt, lv));
            l += 1;
        } else {
            out.push((rt, rv));
            r += 1;
        }
    }
    out.extend_from_slice(&left[l..]);
    out.extend_from_slice(&right[r..]);
    out
}

/// Elementwise transform functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFn {
    /// Natural logarithm
    Log,
    /// Logistic function `1 / (1 + e^-x)`
    Sigmoid,
}

impl TransformFn {
    fn apply(self, x: f64) -> f64 {
        match self {
            TransformFn::Log => x.ln(),
            TransformFn::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// Apply `fn` to every value
pub fn transform(series: &PointSeries, func: TransformFn) -> PointSeries {
    series.iter().map(|(ts, v)| (*ts, func.apply(*v))).collect()
}

/// Sliding window over the series via two monotonically advancing indices
///
/// For each output timestamp `t` - from `first_ts + step_ms` through
/// `last_ts` at the native step - the window holds the input points with
/// timestamps in `(t - window_ms, t]`, and `combine(sum, count)` is emitted
/// whether or not the window is empty. Both indices only move forward, so
/// the whole pass is O(n + outputs) with no re-scanning.
pub fn moving_window<F>(
    series: &PointSeries,
    window_ms: i64,
    step_ms: i64,
    combine: F,
) -> PointSeries
where
    F: Fn(f64, u64) -> f64,
{
    if series.is_empty() || step_ms <= 0 {
        return Vec::new();
    }

    let first_ts = series[0].0;
    let last_ts = series[series.len() - 1].0;

    let mut out = Vec::new();
    let mut head = 0usize; // first index not yet inside the window
    let mut tail = 0usize; // first index still inside the window
    let mut running_sum = 0.0;
    let mut running_count = 0u64;

    let mut t = first_ts + step_ms;
    while t <= last_ts {
        while head < series.len() && series[head].0 <= t {
            running_sum += series[head].1;
            running_count += 1;
            head += 1;
        }
        while tail < head && series[tail].0 <= t - window_ms {
            running_sum -= series[tail].1;
            running_count -= 1;
            tail += 1;
        }
        out.push((t, combine(running_sum, running_count)));
        t += step_ms;
    }

    out
}

/// Windowed mean; an empty window yields NaN (0/0), never an error
pub fn moving_average(series: &PointSeries, window_ms: i64, step_ms: i64) -> PointSeries {
    moving_window(series, window_ms, step_ms, |sum, count| {
        sum / count as f64
    })
}

/// Windowed sum
pub fn moving_sum(series: &PointSeries, window_ms: i64, step_ms: i64) -> PointSeries {
    moving_window(series, window_ms, step_ms, |sum, _| sum)
}

/// Degenerate moving window whose window is the whole requested span
pub fn aggregate_sum(series: &PointSeries, span_ms: i64, step_ms: i64) -> PointSeries {
    moving_window(series, span_ms, step_ms, |sum, _| sum)
}

/// Difference quotient of adjacent points: `(v[i] - v[i-1]) / (t[i] - t[i-1])`
///
/// Output length is input length - 1; empty or single-point input yields
/// empty output.
pub fn first_derivative(series: &PointSeries) -> PointSeries {
    series
        .windows(2)
        .map(|pair| {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            (t1, (v1 - v0) / (t1 - t0) as f64)
        })
        .collect()
}

/// Counting is not supported in this layer; use the reader contract's
/// bucket count instead
pub fn count(_series: &PointSeries) -> QueryResult<u64> {
    Err(QueryError::Unsupported(
        "count: use the reader's count_buckets",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale() {
        let series = vec![(0, 1.0), (10, -2.5)];
        assert_eq!(scale(&series, 4.0), vec![(0, 4.0), (10, -10.0)]);
        assert!(scale(&Vec::new(), 4.0).is_empty());
    }

    #[test]
    fn test_sum_identity_merge() {
        let a = vec![(0, 10.0), (2, 30.0)];
        let b = vec![(1, 5.0), (2, 7.0)];

        let merged = sum(&a, &b);
        assert_eq!(merged, vec![(0, 10.0), (1, 5.0), (2, 37.0)]);

        // Commutative in output values
        assert_eq!(sum(&b, &a), merged);
    }

    #[test]
    fn test_sum_with_empty_side() {
        let a = vec![(0, 1.0), (5, 2.0)];
        assert_eq!(sum(&a, &Vec::new()), a);
        assert_eq!(sum(&Vec::new(), &a), a);
    }

    #[test]
    fn test_transform_log_and_sigmoid() {
        let series = vec![(0, 1.0), (1, std::f64::consts::E)];

        let logged = transform(&series, TransformFn::Log);
        assert!(logged[0].1.abs() < 1e-12);
        assert!((logged[1].1 - 1.0).abs() < 1e-12);

        let squashed = transform(&vec![(0, 0.0)], TransformFn::Sigmoid);
        assert!((squashed[0].1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_moving_average_two_pointer() {
        let series = vec![(0, 10.0), (1, 20.0), (2, 30.0), (3, 40.0)];

        let averaged = moving_average(&series, 2, 1);
        assert_eq!(averaged, vec![(1, 15.0), (2, 25.0), (3, 35.0)]);
    }

    #[test]
    fn test_moving_sum_over_gap() {
        // Gap between 2 and 5; the window still emits at every step
        let series = vec![(0, 1.0), (1, 1.0), (2, 1.0), (5, 1.0)];

        let summed = moving_sum(&series, 2, 1);
        assert_eq!(
            summed,
            vec![(1, 2.0), (2, 2.0), (3, 1.0), (4, 0.0), (5, 1.0)]
        );
    }

    #[test]
    fn test_moving_average_empty_window_is_nan() {
        let series = vec![(0, 1.0), (10, 1.0)];

        let averaged = moving_average(&series, 2, 1);
        assert_eq!(averaged.len(), 10);
        // Steps 3..=8 have nothing within the trailing 2ms window
        assert!(averaged[3].1.is_nan());
        assert!(averaged[7].1.is_nan());
        assert_eq!(averaged[9], (10, 1.0));
    }

    #[test]
    fn test_moving_window_empty_and_single_input() {
        assert!(moving_average(&Vec::new(), 5, 1).is_empty());
        // Single point: no output timestamps after first_ts
        assert!(moving_average(&vec![(3, 9.0)], 5, 1).is_empty());
    }

    #[test]
    fn test_aggregate_sum_spans_everything() {
        let series = vec![(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)];

        let total = aggregate_sum(&series, 4, 1);
        // Final step sees the whole span
        assert_eq!(total.last(), Some(&(3, 10.0)));
    }

    #[test]
    fn test_first_derivative() {
        let series = vec![(0, 10.0), (1, 12.0), (2, 18.0)];
        assert_eq!(first_derivative(&series), vec![(1, 2.0), (2, 6.0)]);

        assert!(first_derivative(&Vec::new()).is_empty());
        assert!(first_derivative(&vec![(0, 1.0)]).is_empty());

        // Uneven spacing divides by the actual gap
        let series = vec![(0, 0.0), (4, 8.0)];
        assert_eq!(first_derivative(&series), vec![(4, 2.0)]);
    }

    #[test]
    fn test_count_always_unsupported() {
        let series = vec![(0, 1.0)];
        assert!(matches!(
            count(&series),
            Err(QueryError::Unsupported(_))
        ));
    }
}
