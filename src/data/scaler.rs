//! # Min-Max Scaling
//!
//! $$
//! \tilde x = \frac{x - x_{\min}}{x_{\max} - x_{\min}}
//! $$
//!
//! The fitted parameters are a plain value: whoever trains a model on scaled
//! data hands the same scaler to every later inverse transform.

use ndarray::ArrayView1;
use ndarray_stats::QuantileExt;

use crate::error::Error;
use crate::error::Result;

/// Affine map of a fitted range onto `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMaxScaler {
  min: f64,
  max: f64,
}

impl MinMaxScaler {
  /// Fit on `values`. A constant series has no usable range.
  pub fn fit(values: &[f64]) -> Result<Self> {
    let view = ArrayView1::from(values);
    let min = *view
      .min()
      .map_err(|e| Error::model(format!("cannot fit scaler: {e}")))?;
    let max = *view
      .max()
      .map_err(|e| Error::model(format!("cannot fit scaler: {e}")))?;
    if !min.is_finite() || !max.is_finite() {
      return Err(Error::model("cannot fit scaler on non-finite values"));
    }
    if max - min <= f64::EPSILON * max.abs().max(1.0) {
      return Err(Error::model("cannot fit scaler on a zero-variance series"));
    }
    Ok(Self { min, max })
  }

  pub fn min(&self) -> f64 {
    self.min
  }

  pub fn max(&self) -> f64 {
    self.max
  }

  pub fn transform(&self, x: f64) -> f64 {
    (x - self.min) / (self.max - self.min)
  }

  pub fn inverse_transform(&self, x: f64) -> f64 {
    x * (self.max - self.min) + self.min
  }

  pub fn transform_slice(&self, xs: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| self.transform(x)).collect()
  }

  pub fn inverse_transform_slice(&self, xs: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| self.inverse_transform(x)).collect()
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;

  use super::*;

  #[test]
  fn maps_range_onto_unit_interval() {
    let s = MinMaxScaler::fit(&[10.0, 20.0, 15.0]).unwrap();
    assert_eq!(s.transform_slice(&[10.0, 20.0, 15.0]), vec![0.0, 1.0, 0.5]);
  }

  #[test]
  fn round_trip_recovers_training_data() {
    let data = [101.3, 99.7, 104.2, 100.0, 98.15, 103.9];
    let s = MinMaxScaler::fit(&data).unwrap();
    let back = s.inverse_transform_slice(&s.transform_slice(&data));
    for (a, b) in data.iter().zip(back.iter()) {
      assert_relative_eq!(a, b, max_relative = 1e-12);
    }
  }

  #[test]
  fn inverse_is_monotonic() {
    let s = MinMaxScaler::fit(&[3.0, 7.0]).unwrap();
    let ys = s.inverse_transform_slice(&[-0.5, 0.0, 0.25, 1.0, 1.5]);
    assert!(ys.windows(2).all(|w| w[1] > w[0]));
  }

  #[test]
  fn constant_series_is_a_model_error() {
    assert!(matches!(
      MinMaxScaler::fit(&[5.0, 5.0, 5.0]),
      Err(Error::Model(_))
    ));
    assert!(matches!(MinMaxScaler::fit(&[]), Err(Error::Model(_))));
  }
}
