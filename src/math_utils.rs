//! Numerical helpers shared by the correlation, threshold and lead-lag modules.

/// Numerical constants
pub mod constants {
    /// Default epsilon for floating point comparisons
    pub const DEFAULT_EPSILON: f64 = 1e-12;

    /// Standard deviation, relative to the largest magnitude in a window, at
    /// or below which the window is treated as constant (a few ulps).
    pub const RELATIVE_SPREAD_TOLERANCE: f64 = 4.0 * f64::EPSILON;

    /// Tolerance used when checking correlation matrix invariants
    pub const CORRELATION_TOLERANCE: f64 = 1e-9;
}

/// Safe floating point comparison functions
pub mod float_ops {
    use super::constants::DEFAULT_EPSILON;

    /// Check if two floating point numbers are approximately equal
    #[inline]
    pub fn approx_eq(a: f64, b: f64) -> bool {
        approx_eq_eps(a, b, DEFAULT_EPSILON)
    }

    /// Check if two floating point numbers are approximately equal with custom epsilon
    #[inline]
    pub fn approx_eq_eps(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    /// Division that rejects a zero denominator and non-finite inputs.
    ///
    /// There is no absolute cutoff on small denominators.
    pub fn safe_div(numerator: f64, denominator: f64) -> Option<f64> {
        if denominator == 0.0 || !numerator.is_finite() || !denominator.is_finite() {
            None
        } else {
            Some(numerator / denominator)
        }
    }
}

/// Arithmetic mean; 0.0 for an empty slice.
#[inline]
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample variance (n - 1 denominator) using Welford's single-pass update.
///
/// Returns 0.0 for fewer than two points.
///
/// ```rust
/// use market_effects::math_utils::calculate_variance;
///
/// let variance = calculate_variance(&[1.0, 2.0, 3.0, 4.0, 5.0]);
/// assert!((variance - 2.5).abs() < 1e-10);
/// ```
pub fn calculate_variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }

    let mut mean = 0.0;
    let mut m2 = 0.0;

    for (i, &value) in data.iter().enumerate() {
        let count = (i + 1) as f64;
        let delta = value - mean;
        mean += delta / count;
        m2 += delta * (value - mean);
    }

    (m2 / (data.len() - 1) as f64).max(0.0)
}

/// Sample standard deviation (n - 1 denominator).
#[inline]
pub fn sample_std_dev(data: &[f64]) -> f64 {
    calculate_variance(data).sqrt()
}

/// True when every value equals the first one, or the spread is rounding
/// noise relative to the window's magnitude.
pub fn is_degenerate(data: &[f64]) -> bool {
    let Some(&first) = data.first() else {
        return true;
    };
    if data.iter().all(|&x| x == first) {
        return true;
    }
    let scale = data.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    sample_std_dev(data) <= constants::RELATIVE_SPREAD_TOLERANCE * scale
}

/// Sample Pearson correlation between two equal-length slices.
///
/// Returns `None` when the slices differ in length, hold fewer than two points,
/// or either side is degenerate. The result is clamped into [-1, 1].
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 || is_degenerate(x) || is_degenerate(y) {
        return None;
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    float_ops::safe_div(cov, var_x.sqrt() * var_y.sqrt()).map(|r| r.clamp(-1.0, 1.0))
}
