//! # Return Metrics
//!
//! $$
//! \mu_i = \Big(\prod_{t=1}^{T}(1 + r_{t,i})\Big)^{f/T} - 1,\qquad
//! \Sigma = f \cdot \widehat{\operatorname{Cov}}(r)
//! $$
//!
//! Annualised expected returns and sample covariance of simple returns laid
//! out one column per asset.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;

use crate::error::Error;
use crate::error::Result;

fn check_rows(returns: &ArrayView2<f64>) -> Result<()> {
  if returns.nrows() < 2 {
    return Err(Error::insufficient(format!(
      "{} return observations, need at least 2",
      returns.nrows()
    )));
  }
  if returns.iter().any(|r| !r.is_finite()) {
    return Err(Error::invalid("returns contain non-finite values"));
  }
  Ok(())
}

/// Annualised mean historical return per column.
pub fn mean_historical_return(
  returns: ArrayView2<f64>,
  frequency: usize,
  compounding: bool,
) -> Result<Array1<f64>> {
  check_rows(&returns)?;
  let periods = returns.nrows() as f64;
  let freq = frequency as f64;

  if compounding {
    Ok(
      returns
        .map_axis(Axis(0), |col| col.iter().map(|r| (1.0 + r).ln()).sum::<f64>())
        .mapv(|log_growth| (log_growth * freq / periods).exp() - 1.0),
    )
  } else {
    returns
      .mean_axis(Axis(0))
      .map(|m| m * freq)
      .ok_or_else(|| Error::insufficient("no return observations"))
  }
}

/// Annualised sample covariance (ddof 1).
pub fn sample_cov(returns: ArrayView2<f64>, frequency: usize) -> Result<Array2<f64>> {
  check_rows(&returns)?;
  let cov = returns
    .t()
    .cov(1.0)
    .map_err(|e| Error::insufficient(e.to_string()))?;
  Ok(cov * frequency as f64)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn compounded_return_annualises_geometric_growth() {
    let r = array![[0.1, 0.0], [-0.1, 0.02], [0.05, 0.01]];
    let mu = mean_historical_return(r.view(), 3, true).unwrap();
    assert_abs_diff_eq!(mu[0], 1.1 * 0.9 * 1.05 - 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(mu[1], 1.02 * 1.01 - 1.0, epsilon = 1e-12);
  }

  #[test]
  fn arithmetic_return_scales_the_mean() {
    let r = array![[0.01], [0.03]];
    let mu = mean_historical_return(r.view(), 252, false).unwrap();
    assert_abs_diff_eq!(mu[0], 0.02 * 252.0, epsilon = 1e-12);
  }

  #[test]
  fn covariance_uses_unbiased_estimator() {
    let r = array![[1.0, 2.0], [3.0, 6.0], [5.0, 10.0]];
    let cov = sample_cov(r.view(), 1).unwrap();
    assert_abs_diff_eq!(cov[[0, 0]], 4.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[0, 1]], 8.0, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[[1, 1]], 16.0, epsilon = 1e-12);

    let annual = sample_cov(r.view(), 252).unwrap();
    assert_abs_diff_eq!(annual[[0, 0]], 4.0 * 252.0, epsilon = 1e-9);
  }

  #[test]
  fn single_observation_is_insufficient() {
    let r = array![[0.01, 0.02]];
    assert!(matches!(
      sample_cov(r.view(), 252),
      Err(Error::InsufficientData(_))
    ));
  }
}
