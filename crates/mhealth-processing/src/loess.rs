//! Local polynomial regression (LOESS) used for detrending

/// Fitted values of a local regression of `y` on `x`.
///
/// For every point, the `ceil(span * n)` nearest neighbours are weighted with
/// the tricube kernel and a polynomial of `degree` (1 or 2) is fitted by
/// weighted least squares. Returns `None` when the fit is degenerate: too
/// few points, non-finite input, or a singular local system.
pub fn loess_fit(x: &[f64], y: &[f64], span: f64, degree: usize) -> Option<Vec<f64>> {
    let n = x.len();
    if n != y.len() || !(1..=2).contains(&degree) || n < degree + 2 {
        return None;
    }
    if !(span > 0.0 && span <= 1.0) {
        return None;
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let q = ((span * n as f64).ceil() as usize).clamp(degree + 1, n);
    let mut fitted = vec![0.0; n];
    let mut lo = 0usize;

    for i in 0..n {
        let xi = xs[i];
        // slide the q-point neighbourhood while the next point is closer than the first
        while lo + q < n && xs[lo + q] - xi < xi - xs[lo] {
            lo += 1;
        }
        let hi = lo + q;
        let radius = (xi - xs[lo]).max(xs[hi - 1] - xi);
        if radius <= 0.0 {
            return None;
        }
        // widen slightly so the q-th neighbour keeps a non-zero weight
        let radius = radius * 1.000_001;

        let mut normal = [[0.0f64; 3]; 3];
        let mut rhs = [0.0f64; 3];
        for j in lo..hi {
            let d = xs[j] - xi;
            let u = d.abs() / radius;
            if u >= 1.0 {
                continue;
            }
            let w = (1.0 - u * u * u).powi(3);
            let basis = [1.0, d, d * d];
            for r in 0..=degree {
                rhs[r] += w * basis[r] * ys[j];
                for c in 0..=degree {
                    normal[r][c] += w * basis[r] * basis[c];
                }
            }
        }

        fitted[order[i]] = solve_intercept(normal, rhs, degree + 1)?;
    }

    Some(fitted)
}

/// Residuals `y - loess_fit(x, y)`
pub fn loess_residuals(x: &[f64], y: &[f64], span: f64, degree: usize) -> Option<Vec<f64>> {
    let fitted = loess_fit(x, y, span, degree)?;
    Some(y.iter().zip(fitted).map(|(obs, fit)| obs - fit).collect())
}

/// Gaussian elimination with partial pivoting on the leading `dim` block;
/// only the constant term of the local polynomial is needed.
fn solve_intercept(mut a: [[f64; 3]; 3], mut b: [f64; 3], dim: usize) -> Option<f64> {
    let scale = (0..dim).map(|i| a[i][i].abs()).fold(0.0f64, f64::max);
    if scale <= 0.0 {
        return None;
    }

    for col in 0..dim {
        let pivot = (col..dim).max_by(|&r, &s| a[r][col].abs().total_cmp(&a[s][col].abs()))?;
        if a[pivot][col].abs() <= scale * 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..dim {
            let factor = a[row][col] / a[col][col];
            for k in col..dim {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = [0.0f64; 3];
    for row in (0..dim).rev() {
        let tail: f64 = (row + 1..dim).map(|k| a[row][k] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[row][row];
    }
    Some(solution[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_trend_is_reproduced() {
        let x: Vec<f64> = (0..200).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 0.5 * v - 0.2 * v * v).collect();

        let residuals = loess_residuals(&x, &y, 0.75, 2).unwrap();
        assert!(residuals.iter().all(|r| r.abs() < 1e-8));
    }

    #[test]
    fn test_fast_oscillation_survives_detrending() {
        let x: Vec<f64> = (0..500).map(|i| i as f64 * 0.01).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|v| 3.0 * v + (2.0 * std::f64::consts::PI * 8.0 * v).sin())
            .collect();

        let residuals = loess_residuals(&x, &y, 0.75, 2).unwrap();
        let interior = &residuals[50..450];
        let mean = interior.iter().sum::<f64>() / interior.len() as f64;
        let power = interior.iter().map(|r| r * r).sum::<f64>() / interior.len() as f64;

        assert!(mean.abs() < 0.05);
        assert!((power - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(loess_fit(&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0], 0.75, 2).is_none());
        assert!(loess_fit(&[1.0; 10], &[0.0; 10], 0.75, 1).is_none());
        assert!(loess_fit(&[0.0, 1.0, 2.0, 3.0], &[1.0, f64::NAN, 1.0, 1.0], 0.75, 1).is_none());
        assert!(loess_fit(&[0.0, 1.0, 2.0, 3.0], &[1.0; 4], 1.5, 1).is_none());
    }

    #[test]
    fn test_unsorted_x_maps_back() {
        let x = [3.0, 0.0, 2.0, 1.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let fitted = loess_fit(&x, &y, 1.0, 1).unwrap();
        for (f, expected) in fitted.iter().zip(&y) {
            assert!((f - expected).abs() < 1e-9);
        }
    }
}
