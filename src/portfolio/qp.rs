//! # Non-negative QP
//!
//! $$
//! \min_x \tfrac12 x^\top Q x \quad \text{s.t.}\quad A x = b,\ x \ge 0
//! $$
//!
//! Primal active-set method started from a feasible point. Each iteration
//! solves the equality-constrained KKT system on the free coordinates; a zero
//! step releases the bound with the most negative multiplier, a non-zero step
//! is cut at the first bound it hits.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::trace;

use crate::error::Error;
use crate::error::Result;

const FEASIBILITY_TOL: f64 = 1e-8;

fn kkt_step(
  q: &DMatrix<f64>,
  a: &DMatrix<f64>,
  g: &DVector<f64>,
  free: &[usize],
) -> Result<(DVector<f64>, DVector<f64>)> {
  let nf = free.len();
  let m = a.nrows();
  let mut k = DMatrix::zeros(nf + m, nf + m);
  let mut rhs = DVector::zeros(nf + m);

  for (r, &i) in free.iter().enumerate() {
    for (c, &j) in free.iter().enumerate() {
      k[(r, c)] = q[(i, j)];
    }
    for row in 0..m {
      k[(r, nf + row)] = a[(row, i)];
      k[(nf + row, r)] = a[(row, i)];
    }
    rhs[r] = -g[i];
  }

  let svd = k.svd(true, true);
  let tol = (svd.singular_values.max() * 1e-12).max(f64::MIN_POSITIVE);
  let sol = svd.solve(&rhs, tol).map_err(Error::model)?;
  if sol.iter().any(|v| !v.is_finite()) {
    return Err(Error::model("KKT system produced a non-finite step"));
  }

  let step = DVector::from_iterator(nf, sol.iter().take(nf).copied());
  let nu = DVector::from_iterator(m, sol.iter().skip(nf).copied());
  Ok((step, nu))
}

/// Minimise `0.5 x'Qx` subject to `Ax = b` and `x >= 0`, starting from the
/// feasible point `x0`.
pub fn solve_nonneg_qp(
  q: &DMatrix<f64>,
  a: &DMatrix<f64>,
  b: &DVector<f64>,
  x0: DVector<f64>,
) -> Result<DVector<f64>> {
  let n = q.nrows();
  if q.ncols() != n || a.ncols() != n || a.nrows() != b.len() || x0.len() != n {
    return Err(Error::invalid("inconsistent QP dimensions"));
  }
  let residual = (a * &x0 - b).amax();
  if residual > FEASIBILITY_TOL * (1.0 + b.amax()) || x0.iter().any(|&v| v < 0.0) {
    return Err(Error::invalid("QP start point is infeasible"));
  }

  let mut x = x0;
  let mut bound: Vec<bool> = x.iter().map(|&v| v == 0.0).collect();
  let max_iter = 50 * (n + a.nrows()) + 100;

  for iter in 0..max_iter {
    let g = q * &x;
    let free: Vec<usize> = (0..n).filter(|&i| !bound[i]).collect();
    let (step, nu) = kkt_step(q, a, &g, &free)?;

    let step_tol = 1e-12 * (1.0 + x.amax());
    if step.amax() <= step_tol {
      let a_nu = a.transpose() * &nu;
      let mu_tol = -1e-10 * (1.0 + g.amax());
      let release = (0..n)
        .filter(|&i| bound[i])
        .map(|i| (i, g[i] + a_nu[i]))
        .filter(|&(_, mu)| mu < mu_tol)
        .min_by(|l, r| l.1.total_cmp(&r.1));

      match release {
        Some((i, mu)) => {
          trace!(iter, index = i, multiplier = mu, "releasing bound");
          bound[i] = false;
        }
        None => return Ok(x),
      }
      continue;
    }

    let mut alpha = 1.0;
    let mut blocking = None;
    for (k, &i) in free.iter().enumerate() {
      if step[k] < 0.0 {
        let ratio = -x[i] / step[k];
        if ratio < alpha {
          alpha = ratio;
          blocking = Some(i);
        }
      }
    }

    for (k, &i) in free.iter().enumerate() {
      x[i] = (x[i] + alpha * step[k]).max(0.0);
    }
    if let Some(i) = blocking {
      trace!(iter, index = i, alpha, "bound became active");
      x[i] = 0.0;
      bound[i] = true;
    }
  }

  Err(Error::model(format!(
    "active-set QP did not converge in {max_iter} iterations"
  )))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn interior_solution_matches_closed_form() {
    let q = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 1.0]);
    let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
    let b = DVector::from_vec(vec![1.0]);
    let x = solve_nonneg_qp(&q, &a, &b, DVector::from_vec(vec![1.0, 0.0])).unwrap();
    // Inverse-variance weights.
    assert_abs_diff_eq!(x[0], 1.0 / 3.0, epsilon = 1e-10);
    assert_abs_diff_eq!(x[1], 2.0 / 3.0, epsilon = 1e-10);
  }

  #[test]
  fn bound_becomes_active() {
    let q = DMatrix::identity(2, 2);
    let a = DMatrix::from_row_slice(1, 2, &[1.0, -1.0]);
    let b = DVector::from_vec(vec![1.0]);
    let x = solve_nonneg_qp(&q, &a, &b, DVector::from_vec(vec![2.0, 1.0])).unwrap();
    assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(x[1], 0.0, epsilon = 1e-12);
  }

  #[test]
  fn two_equalities_on_three_assets() {
    let q = DMatrix::from_row_slice(3, 3, &[0.04, 0.0, 0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.09]);
    let a = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 0.1, 0.05, 0.2]);
    let b = DVector::from_vec(vec![1.0, 0.12]);
    let x0 = DVector::from_vec(vec![0.0, 0.5333333333333333, 0.4666666666666667]);
    let x = solve_nonneg_qp(&q, &a, &b, x0).unwrap();

    assert_abs_diff_eq!(x.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(x[0] * 0.1 + x[1] * 0.05 + x[2] * 0.2, 0.12, epsilon = 1e-9);
    assert!(x.iter().all(|&v| v >= 0.0));
  }

  #[test]
  fn infeasible_start_is_rejected() {
    let q = DMatrix::identity(2, 2);
    let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
    let b = DVector::from_vec(vec![1.0]);
    assert!(solve_nonneg_qp(&q, &a, &b, DVector::from_vec(vec![0.2, 0.2])).is_err());
  }
}
