//! # Supervised Windows
//!
//! $$
//! X_i = (x_i, \dots, x_{i+W-1}),\qquad y_i = x_{i+W},\qquad i = 0, \dots, N-W-1
//! $$

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Array3;
use ndarray::Axis;

use crate::error::Error;
use crate::error::Result;

/// Windows and next-value targets built from one series.
#[derive(Clone, Debug)]
pub struct TrainingPairs {
  /// Shape `(N - W, W)`.
  pub inputs: Array2<f64>,
  /// Shape `(N - W,)`.
  pub targets: Array1<f64>,
}

impl TrainingPairs {
  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  pub fn window(&self) -> usize {
    self.inputs.ncols()
  }

  /// Inputs reshaped to `(N - W, W, 1)` for a univariate sequence model.
  pub fn inputs_3d(&self) -> Array3<f64> {
    self.inputs.clone().insert_axis(Axis(2))
  }
}

/// Build every (window, next value) pair of `values`.
pub fn training_pairs(values: &[f64], window: usize) -> Result<TrainingPairs> {
  if window == 0 {
    return Err(Error::invalid("window length must be positive"));
  }
  if values.len() <= window {
    return Err(Error::insufficient(format!(
      "series of length {} is too short for window {window}",
      values.len()
    )));
  }

  let n_pairs = values.len() - window;
  let mut inputs = Array2::zeros((n_pairs, window));
  let mut targets = Array1::zeros(n_pairs);
  for i in 0..n_pairs {
    for j in 0..window {
      inputs[[i, j]] = values[i + j];
    }
    targets[i] = values[i + window];
  }

  Ok(TrainingPairs { inputs, targets })
}

/// Input windows only, shape `(N - W, W, 1)`.
pub fn sliding_windows(values: &[f64], window: usize) -> Result<Array3<f64>> {
  Ok(training_pairs(values, window)?.inputs_3d())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_len_minus_window_pairs_with_next_value_targets() {
    let values: Vec<f64> = (0..75).map(|v| v as f64 * 1.5).collect();
    let pairs = training_pairs(&values, 60).unwrap();

    assert_eq!(pairs.len(), 15);
    assert_eq!(pairs.window(), 60);
    for i in 0..pairs.len() {
      assert_eq!(pairs.targets[i], values[i + 60]);
      assert_eq!(pairs.inputs[[i, 0]], values[i]);
      assert_eq!(pairs.inputs[[i, 59]], values[i + 59]);
    }
  }

  #[test]
  fn one_more_than_window_gives_a_single_pair() {
    let values = [1.0, 2.0, 3.0, 4.0];
    let pairs = training_pairs(&values, 3).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs.targets[0], 4.0);
  }

  #[test]
  fn series_not_longer_than_window_is_insufficient() {
    let values = vec![1.0; 60];
    assert!(matches!(
      training_pairs(&values, 60),
      Err(Error::InsufficientData(_))
    ));
  }

  #[test]
  fn sliding_windows_adds_feature_axis() {
    let values: Vec<f64> = (0..10).map(f64::from).collect();
    let w = sliding_windows(&values, 4).unwrap();
    assert_eq!(w.dim(), (6, 4, 1));
    assert_eq!(w[[5, 3, 0]], 8.0);
  }
}
