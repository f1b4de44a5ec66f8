//! Descriptive statistics over plain slices

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}

/// Sample standard deviation
pub fn sd(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Quantile with linear interpolation between order statistics
/// (Hyndman & Fan type 7). `p` in [0, 1].
pub fn quantile(data: &[f64], p: f64) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, p)
}

pub(crate) fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn median(data: &[f64]) -> f64 {
    quantile(data, 0.5)
}

/// Median absolute deviation, scaled for consistency with the normal sd
pub fn mad(data: &[f64]) -> f64 {
    let center = median(data);
    let deviations: Vec<f64> = data.iter().map(|x| (x - center).abs()).collect();
    1.4826 * median(&deviations)
}

/// Central moments m2, m3, m4 (population normalisation)
fn central_moments(data: &[f64]) -> (f64, f64, f64) {
    let n = data.len() as f64;
    let m = mean(data);
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &x in data {
        let d = x - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Moment skewness m3 / m2^1.5; 0 for constant data
pub fn skewness(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let (m2, m3, _) = central_moments(data);
    if m2 > 0.0 {
        m3 / m2.powf(1.5)
    } else {
        0.0
    }
}

/// Moment kurtosis m4 / m2^2 (not excess); 0 for constant data
pub fn kurtosis(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    let (m2, _, m4) = central_moments(data);
    if m2 > 0.0 {
        m4 / (m2 * m2)
    } else {
        0.0
    }
}

/// Quantile of a discrete distribution given by support points and weights
pub(crate) fn weighted_quantile(support: &[f64], weights: &[f64], p: f64) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || support.is_empty() {
        return f64::NAN;
    }
    let mut cumulative = 0.0;
    for (&x, &w) in support.iter().zip(weights) {
        cumulative += w / total;
        if cumulative >= p {
            return x;
        }
    }
    support[support.len() - 1]
}
