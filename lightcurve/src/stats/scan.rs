//! Order and moment statistics over floating point slices.
//!
//! All functions expect finite input (see [`finite_values`]) and return NaN
//! when there is not enough data, mirroring how NaN-skipping array libraries
//! behave. Callers decide how to present NaN.

use std::cmp::Ordering;

use num_traits::Float;

/// Copy of `data` with NaN and infinite values removed.
pub fn finite_values<T: Float>(data: &[T]) -> Vec<T> {
    data.iter().copied().filter(|v| v.is_finite()).collect()
}

fn sorted<T: Float>(data: &[T]) -> Vec<T> {
    let mut values = data.to_vec();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values
}

fn from_usize<T: Float>(n: usize) -> T {
    T::from(n).unwrap_or_else(T::nan)
}

/// Arithmetic mean, NaN for empty input.
pub fn mean<T: Float>(data: &[T]) -> T {
    if data.is_empty() {
        return T::nan();
    }
    let sum = data.iter().fold(T::zero(), |acc, &x| acc + x);
    sum / from_usize(data.len())
}

/// Median, averaging the two central values for even lengths.
pub fn median<T: Float>(data: &[T]) -> T {
    percentile(data, T::from(50.0).unwrap_or_else(T::nan))
}

/// Percentile `p` in [0, 100] with linear interpolation between order statistics.
pub fn percentile<T: Float>(data: &[T], p: T) -> T {
    if data.is_empty() || p.is_nan() {
        return T::nan();
    }
    let values = sorted(data);
    let hundred = from_usize::<T>(100);
    let p = p.max(T::zero()).min(hundred);
    let rank = p / hundred * from_usize(values.len() - 1);
    let lower = rank.floor();
    let frac = rank - lower;
    let lo = lower.to_usize().unwrap_or(0).min(values.len() - 1);
    let hi = (lo + 1).min(values.len() - 1);
    values[lo] + (values[hi] - values[lo]) * frac
}

fn variance_with_ddof<T: Float>(data: &[T], ddof: usize) -> T {
    if data.len() <= ddof {
        return T::nan();
    }
    let m = mean(data);
    let sum_sq = data
        .iter()
        .map(|&x| (x - m) * (x - m))
        .fold(T::zero(), |acc, x| acc + x);
    sum_sq / from_usize(data.len() - ddof)
}

/// Sample standard deviation (N-1 denominator). NaN for fewer than 2 values.
pub fn sample_std<T: Float>(data: &[T]) -> T {
    variance_with_ddof(data, 1).sqrt()
}

/// Population standard deviation (N denominator). NaN for empty input.
pub fn population_std<T: Float>(data: &[T]) -> T {
    variance_with_ddof(data, 0).sqrt()
}

/// Median of absolute deviations from the median, without normal scaling.
pub fn median_abs_deviation<T: Float>(data: &[T]) -> T {
    let centre = median(data);
    let deviations: Vec<T> = data.iter().map(|&x| (x - centre).abs()).collect();
    median(&deviations)
}

/// Smallest and largest value, `None` for empty input.
pub fn min_max<T: Float>(data: &[T]) -> Option<(T, T)> {
    data.iter().fold(None, |acc, &x| match acc {
        None => Some((x, x)),
        Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
    })
}
