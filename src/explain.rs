//! # Expected Gradients
//!
//! $$
//! \phi_i(x) = \mathbb{E}_{x' \sim \mathcal{B},\ \alpha \sim U(0,1)}
//! \left[(x_i - x'_i)\,\frac{\partial f}{\partial x_i}\big(x' + \alpha (x - x')\big)\right]
//! $$
//!
//! The expectation runs over every background window and a midpoint grid of
//! `alpha` values, so the result does not depend on background order. For a
//! linear model the attributions of a window sum to `f(x) - E[f(x')]`.

use candle_core::Device;
use candle_core::Tensor;
use candle_core::Var;
use candle_nn::Module;
use ndarray::Array1;
use ndarray::Array3;
use ndarray::Axis;
use tracing::debug;

use crate::config::DEFAULT_ALPHA_STEPS;
use crate::error::Error;
use crate::error::Result;

/// Gradient attribution of a differentiable model against a background set.
pub struct GradientExplainer<'a, M: Module> {
  model: &'a M,
  background: Array3<f64>,
  device: Device,
  alpha_steps: usize,
}

impl<'a, M: Module> GradientExplainer<'a, M> {
  /// `background` has shape `(samples, window, features)`.
  pub fn new(model: &'a M, background: Array3<f64>, device: &Device) -> Result<Self> {
    if background.is_empty() {
      return Err(Error::invalid("background set is empty"));
    }
    Ok(Self {
      model,
      background,
      device: device.clone(),
      alpha_steps: DEFAULT_ALPHA_STEPS,
    })
  }

  /// Interpolation points per background reference (at least one).
  pub fn with_alpha_steps(mut self, steps: usize) -> Self {
    self.alpha_steps = steps.max(1);
    self
  }

  pub fn alpha_steps(&self) -> usize {
    self.alpha_steps
  }

  pub fn background(&self) -> &Array3<f64> {
    &self.background
  }

  /// Mean model output over the background.
  pub fn expected_value(&self) -> Result<f64> {
    let data: Vec<f32> = self.background.iter().map(|&v| v as f32).collect();
    let xs = Tensor::from_vec(data, self.background.dim(), &self.device)?;
    let ys = self.model.forward(&xs)?.flatten_all()?.to_vec1::<f32>()?;
    Ok(ys.iter().map(|&v| v as f64).sum::<f64>() / ys.len() as f64)
  }

  /// Attributions with the same shape as `test`.
  pub fn explain(&self, test: &Array3<f64>) -> Result<Array3<f64>> {
    let (n_bg, window, features) = self.background.dim();
    let (_, t_window, t_features) = test.dim();
    if (t_window, t_features) != (window, features) {
      return Err(Error::invalid(format!(
        "test windows have shape (_, {t_window}, {t_features}), background has (_, {window}, {features})"
      )));
    }

    let steps = self.alpha_steps;
    let cell = window * features;
    let n_points = n_bg * steps;
    let background: Vec<f64> = self.background.iter().copied().collect();

    let mut out = Array3::zeros(test.dim());
    for (s, x) in test.outer_iter().enumerate() {
      let x: Vec<f64> = x.iter().copied().collect();

      let mut points = Vec::with_capacity(n_points * cell);
      for b in 0..n_bg {
        let reference = &background[b * cell..(b + 1) * cell];
        for k in 0..steps {
          let alpha = (k as f64 + 0.5) / steps as f64;
          points.extend(
            reference
              .iter()
              .zip(x.iter())
              .map(|(r, xi)| (r + alpha * (xi - r)) as f32),
          );
        }
      }

      let var = Var::from_tensor(&Tensor::from_vec(
        points,
        (n_points, window, features),
        &self.device,
      )?)?;
      let ys = self.model.forward(var.as_tensor())?;
      let grads = ys.sum_all()?.backward()?;
      let grad = grads
        .get(var.as_tensor())
        .ok_or_else(|| Error::model("model output does not depend on its input"))?
        .flatten_all()?
        .to_vec1::<f32>()?;

      let mut acc = vec![0.0; cell];
      for b in 0..n_bg {
        let reference = &background[b * cell..(b + 1) * cell];
        for k in 0..steps {
          let g = &grad[(b * steps + k) * cell..(b * steps + k + 1) * cell];
          for i in 0..cell {
            acc[i] += g[i] as f64 * (x[i] - reference[i]);
          }
        }
      }

      for (i, a) in acc.into_iter().enumerate() {
        out[[s, i / features, i % features]] = a / n_points as f64;
      }
      debug!(sample = s, points = n_points, "window explained");
    }

    Ok(out)
  }
}

/// Importance score of one input feature.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureImportance {
  pub name: String,
  pub score: f64,
}

/// Mean absolute attribution per feature, averaged over samples and lags.
pub fn feature_importance<S: AsRef<str>>(
  attributions: &Array3<f64>,
  feature_names: &[S],
) -> Result<Vec<FeatureImportance>> {
  let features = attributions.dim().2;
  if feature_names.len() != features {
    return Err(Error::invalid(format!(
      "{} feature names for {features} features",
      feature_names.len()
    )));
  }
  let scores = attributions
    .mapv(f64::abs)
    .mean_axis(Axis(0))
    .and_then(|m| m.mean_axis(Axis(0)))
    .ok_or_else(|| Error::invalid("attribution tensor is empty"))?;

  Ok(
    feature_names
      .iter()
      .zip(scores.iter())
      .map(|(name, &score)| FeatureImportance {
        name: name.as_ref().to_string(),
        score,
      })
      .collect(),
  )
}

/// Mean absolute attribution per lag; index 0 is the oldest observation.
pub fn temporal_importance(attributions: &Array3<f64>) -> Result<Array1<f64>> {
  attributions
    .mapv(f64::abs)
    .mean_axis(Axis(0))
    .and_then(|m| m.mean_axis(Axis(1)))
    .ok_or_else(|| Error::invalid("attribution tensor is empty"))
}
