//! Small dense least-squares solver for the model fits.
//!
//! Design matrices here have at most a few dozen columns, so normal equations
//! with Gauss-Jordan elimination and partial pivoting are plenty.

/// Solve `min (1/n)·‖Xβ − y‖² + Σ penalties[j]·β[j]²`.
///
/// Returns `None` if the system is singular or the solution is not finite.
pub(crate) fn solve_penalized(x: &[Vec<f64>], y: &[f64], penalties: &[f64]) -> Option<Vec<f64>> {
    let n = x.len();
    if n == 0 || n != y.len() {
        return None;
    }
    let p = x[0].len();
    if p == 0 || penalties.len() != p {
        return None;
    }

    let inv_n = 1.0 / n as f64;
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, &yi) in x.iter().zip(y) {
        for a in 0..p {
            let xa = row[a];
            if xa == 0.0 {
                continue;
            }
            xty[a] += xa * yi * inv_n;
            for b in a..p {
                xtx[a][b] += xa * row[b] * inv_n;
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            xtx[a][b] = xtx[b][a];
        }
        xtx[a][a] += penalties[a];
    }

    let beta = gauss_jordan(xtx, xty)?;
    beta.iter().all(|b| b.is_finite()).then_some(beta)
}

fn gauss_jordan(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let p = b.len();
    for i in 0..p {
        let mut max_r = i;
        let mut max_v = a[i][i].abs();
        for (r, row) in a.iter().enumerate().skip(i + 1) {
            if row[i].abs() > max_v {
                max_v = row[i].abs();
                max_r = r;
            }
        }
        if max_v < 1e-14 {
            return None;
        }
        if max_r != i {
            a.swap(i, max_r);
            b.swap(i, max_r);
        }

        let inv_piv = 1.0 / a[i][i];
        for j in i..p {
            a[i][j] *= inv_piv;
        }
        b[i] *= inv_piv;

        for r in 0..p {
            if r == i {
                continue;
            }
            let factor = a[r][i];
            if factor == 0.0 {
                continue;
            }
            for j in i..p {
                a[r][j] -= factor * a[i][j];
            }
            b[r] -= factor * b[i];
        }
    }
    Some(b)
}

/// Dot product of a design row with coefficients.
pub(crate) fn dot(row: &[f64], beta: &[f64]) -> f64 {
    row.iter().zip(beta).map(|(x, b)| x * b).sum()
}
