//! # Stacked LSTM
//!
//! $$
//! \hat x_{t+1} = f_\theta(x_{t-W+1}, \dots, x_t)
//! $$
//!
//! Two LSTM layers with dropout, a dense bottleneck and a scalar head, trained
//! on min-max scaled windows. Multi-step forecasts are recursive: each
//! prediction is appended to a rolling buffer whose oldest value is dropped.

use std::collections::VecDeque;

use candle_core::DType;
use candle_core::Device;
use candle_core::Tensor;
use candle_nn::linear;
use candle_nn::rnn::lstm;
use candle_nn::rnn::LSTMConfig;
use candle_nn::rnn::LSTM;
use candle_nn::AdamW;
use candle_nn::Dropout;
use candle_nn::Linear;
use candle_nn::Module;
use candle_nn::Optimizer;
use candle_nn::ParamsAdamW;
use candle_nn::VarBuilder;
use candle_nn::VarMap;
use candle_nn::RNN;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;
use tracing::info;

use super::ForecasterExt;
use crate::config::SequenceConfig;
use crate::data::training_pairs;
use crate::data::MinMaxScaler;
use crate::data::PriceSeries;
use crate::error::Error;
use crate::error::Result;

/// LSTM(h) -> Dropout -> LSTM(h) -> Dropout -> Dense(d) -> Dense(1).
pub struct SequenceNetwork {
  lstm1: LSTM,
  lstm2: LSTM,
  dropout: Dropout,
  dense: Linear,
  out: Linear,
}

impl SequenceNetwork {
  pub fn new(vs: VarBuilder, config: &SequenceConfig) -> candle_core::Result<Self> {
    let lstm1 = lstm(1, config.hidden_dim, LSTMConfig::default(), vs.pp("lstm_1"))?;
    let lstm2 = lstm(
      config.hidden_dim,
      config.hidden_dim,
      LSTMConfig::default(),
      vs.pp("lstm_2"),
    )?;
    let dense = linear(config.hidden_dim, config.dense_dim, vs.pp("dense_1"))?;
    let out = linear(config.dense_dim, 1, vs.pp("dense_2"))?;
    Ok(Self {
      lstm1,
      lstm2,
      dropout: Dropout::new(config.dropout),
      dense,
      out,
    })
  }

  /// `xs` has shape `(batch, W, 1)`; returns `(batch, 1)`. Dropout is active
  /// only when `train` is set.
  pub fn forward_mode(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
    let states = self.lstm1.seq(xs)?;
    let h1 = self
      .lstm1
      .states_to_tensor(&states)?
      .apply_t(&self.dropout, train)?;

    let states = self.lstm2.seq(&h1)?;
    let last = states
      .last()
      .ok_or_else(|| candle_core::Error::Msg("empty input sequence".to_string()))?;
    let h2 = last.h().apply_t(&self.dropout, train)?;

    let x = self.dense.forward(&h2)?;
    self.out.forward(&x)
  }
}

impl Module for SequenceNetwork {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    self.forward_mode(xs, false)
  }
}

/// Outcome of one training run.
#[derive(Clone, Debug)]
pub struct SequenceFit {
  /// Scaler fitted on the full training series.
  pub scaler: MinMaxScaler,
  /// Mean squared error per epoch, on the scaled targets.
  pub epoch_losses: Vec<f64>,
}

impl SequenceFit {
  pub fn final_loss(&self) -> Option<f64> {
    self.epoch_losses.last().copied()
  }
}

struct FittedNetwork {
  // Owns the trainable variables referenced by `network`.
  _varmap: VarMap,
  network: SequenceNetwork,
  scaler: MinMaxScaler,
}

/// Recurrent price forecaster for one ticker.
pub struct SequenceForecaster {
  ticker: String,
  config: SequenceConfig,
  device: Device,
  fitted: Option<FittedNetwork>,
}

impl SequenceForecaster {
  pub fn new(ticker: impl Into<String>, config: SequenceConfig) -> Self {
    Self {
      ticker: ticker.into(),
      config,
      device: Device::Cpu,
      fitted: None,
    }
  }

  pub fn config(&self) -> &SequenceConfig {
    &self.config
  }

  pub fn window(&self) -> usize {
    self.config.window
  }

  pub fn device(&self) -> &Device {
    &self.device
  }

  /// Train with the configured epochs and batch size.
  pub fn train(&mut self, series: &PriceSeries) -> Result<SequenceFit> {
    self.train_with(series, self.config.epochs, self.config.batch_size)
  }

  /// Train from scratch. A failure leaves the forecaster untrained.
  pub fn train_with(
    &mut self,
    series: &PriceSeries,
    epochs: usize,
    batch_size: usize,
  ) -> Result<SequenceFit> {
    self.fitted = None;
    if epochs == 0 || batch_size == 0 {
      return Err(Error::invalid("epochs and batch_size must be positive"));
    }

    let window = self.config.window;
    if series.len() <= window {
      return Err(Error::insufficient(format!(
        "{} observations cannot fill a window of {window} plus a target",
        series.len()
      )));
    }
    let scaler = MinMaxScaler::fit(series.as_slice())?;
    let scaled = scaler.transform_slice(series.as_slice());
    let pairs = training_pairs(&scaled, window)?;
    let n = pairs.len();

    let x: Vec<f32> = pairs.inputs.iter().map(|&v| v as f32).collect();
    let y: Vec<f32> = pairs.targets.iter().map(|&v| v as f32).collect();
    let xs = Tensor::from_vec(x, (n, window, 1), &self.device)?;
    let ys = Tensor::from_vec(y, (n, 1), &self.device)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
    let network = SequenceNetwork::new(vs, &self.config)?;

    let optimizer_params = ParamsAdamW {
      lr: self.config.learning_rate,
      beta1: 0.9,
      beta2: 0.999,
      eps: 1e-7,
      weight_decay: 0.0,
    };
    let mut opt = AdamW::new(varmap.all_vars(), optimizer_params)?;

    let mut rng = match self.config.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    let mut order: Vec<u32> = (0..n as u32).collect();

    let bar = if self.config.show_progress {
      ProgressBar::new(epochs as u64)
    } else {
      ProgressBar::hidden()
    };
    bar.set_style(
      ProgressStyle::default_bar()
        .template("{prefix} [{bar:30}] {pos}/{len} {msg}")
        .map_err(|e| Error::model(e.to_string()))?,
    );
    bar.set_prefix(self.ticker.clone());

    let mut epoch_losses = Vec::with_capacity(epochs);
    for epoch in 1..=epochs {
      if self.config.shuffle {
        order.shuffle(&mut rng);
      }

      let mut total = 0.0;
      for batch in order.chunks(batch_size) {
        let idx = Tensor::from_slice(batch, batch.len(), &self.device)?;
        let xb = xs.index_select(&idx, 0)?;
        let yb = ys.index_select(&idx, 0)?;

        let pred = network.forward_mode(&xb, true)?;
        let loss = candle_nn::loss::mse(&pred, &yb)?;
        let value = loss.to_scalar::<f32>()?;
        if !value.is_finite() {
          bar.abandon();
          return Err(Error::model(format!(
            "non-finite training loss at epoch {epoch}"
          )));
        }
        opt.backward_step(&loss)?;
        total += value as f64 * batch.len() as f64;
      }

      let mean = total / n as f64;
      epoch_losses.push(mean);
      debug!(ticker = %self.ticker, epoch, loss = mean, "epoch finished");
      bar.set_message(format!("loss {mean:.6}"));
      bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
      ticker = %self.ticker,
      samples = n,
      epochs,
      loss = epoch_losses.last().copied().unwrap_or(f64::NAN),
      "sequence model trained"
    );

    self.fitted = Some(FittedNetwork {
      _varmap: varmap,
      network,
      scaler,
    });
    Ok(SequenceFit {
      scaler,
      epoch_losses,
    })
  }

  fn fitted(&self) -> Result<&FittedNetwork> {
    self.fitted.as_ref().ok_or(Error::NotTrained)
  }

  /// Trained network, for attribution.
  pub fn network(&self) -> Result<&SequenceNetwork> {
    Ok(&self.fitted()?.network)
  }

  /// Scaler fitted by the last successful training run.
  pub fn scaler(&self) -> Result<MinMaxScaler> {
    Ok(self.fitted()?.scaler)
  }

  /// Recursive forecast in scaled units. `initial_window` must hold exactly
  /// `W` scaled values.
  pub fn predict_scaled(&self, initial_window: &[f64], steps: usize) -> Result<Vec<f64>> {
    let fitted = self.fitted()?;
    let window = self.config.window;
    if initial_window.len() != window {
      return Err(Error::invalid(format!(
        "initial window has {} values, expected {window}",
        initial_window.len()
      )));
    }

    let mut buffer: VecDeque<f32> = initial_window.iter().map(|&v| v as f32).collect();
    let mut out = Vec::with_capacity(steps);
    for _ in 0..steps {
      let input: Vec<f32> = buffer.iter().copied().collect();
      let x = Tensor::from_vec(input, (1, window, 1), &self.device)?;
      let y = fitted.network.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;
      let next = y
        .first()
        .copied()
        .ok_or_else(|| Error::model("network produced no output"))?;
      out.push(next as f64);
      buffer.pop_front();
      buffer.push_back(next);
    }
    Ok(out)
  }

  /// Recursive forecast mapped back to prices with `scaler`.
  pub fn predict(
    &self,
    scaler: &MinMaxScaler,
    initial_window: &[f64],
    steps: usize,
  ) -> Result<Vec<f64>> {
    let scaled = self.predict_scaled(initial_window, steps)?;
    Ok(scaler.inverse_transform_slice(&scaled))
  }
}

impl ForecasterExt for SequenceForecaster {
  fn ticker(&self) -> &str {
    &self.ticker
  }

  fn is_trained(&self) -> bool {
    self.fitted.is_some()
  }

  fn fit(&mut self, series: &PriceSeries) -> Result<()> {
    self.train(series).map(|_| ())
  }

  fn forecast_values(&self, history: &PriceSeries, horizon: usize) -> Result<Vec<f64>> {
    let scaler = self.scaler()?;
    let window = self.config.window;
    if history.len() < window {
      return Err(Error::insufficient(format!(
        "history of length {} is shorter than window {window}",
        history.len()
      )));
    }
    let initial = scaler.transform_slice(history.tail(window));
    self.predict(&scaler, &initial, horizon)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::data::test_support::gbm_path;
  use crate::data::test_support::series_from;

  fn small_config(window: usize) -> SequenceConfig {
    SequenceConfig {
      window,
      epochs: 2,
      batch_size: 16,
      hidden_dim: 8,
      dense_dim: 4,
      seed: Some(17),
      ..SequenceConfig::default()
    }
  }

  fn trained(window: usize, len: usize) -> (SequenceForecaster, PriceSeries, SequenceFit) {
    let series = series_from(gbm_path(len, 100.0, 0.0003, 0.015, 9));
    let mut model = SequenceForecaster::new("GBM", small_config(window));
    let fit = model.train(&series).unwrap();
    (model, series, fit)
  }

  #[test]
  fn predict_before_training_fails() {
    let model = SequenceForecaster::new("X", small_config(10));
    let scaler = MinMaxScaler::fit(&[1.0, 2.0]).unwrap();
    let err = model.predict(&scaler, &[0.5; 10], 3).unwrap_err();
    assert!(matches!(err, Error::NotTrained));
  }

  #[test]
  fn training_reports_one_finite_loss_per_epoch() {
    let (model, _, fit) = trained(10, 120);
    assert!(model.is_trained());
    assert_eq!(fit.epoch_losses.len(), 2);
    assert!(fit.epoch_losses.iter().all(|l| l.is_finite() && *l >= 0.0));
    assert_eq!(model.scaler().unwrap(), fit.scaler);
  }

  #[test]
  fn predict_returns_requested_number_of_steps() {
    let (model, series, fit) = trained(10, 120);
    let window = fit.scaler.transform_slice(series.tail(10));

    let prices = model.predict(&fit.scaler, &window, 7).unwrap();
    assert_eq!(prices.len(), 7);
    assert!(prices.iter().all(|p| p.is_finite()));
    assert!(model.predict(&fit.scaler, &window, 0).unwrap().is_empty());
  }

  #[test]
  fn recursion_feeds_predictions_back_into_the_window() {
    let (model, series, fit) = trained(10, 120);
    let window = fit.scaler.transform_slice(series.tail(10));

    let steps = model.predict_scaled(&window, 2).unwrap();
    let first = model.predict_scaled(&window, 1).unwrap();
    assert_abs_diff_eq!(steps[0], first[0], epsilon = 1e-9);

    let mut shifted = window[1..].to_vec();
    shifted.push(steps[0]);
    let second = model.predict_scaled(&shifted, 1).unwrap();
    assert_abs_diff_eq!(steps[1], second[0], epsilon = 1e-5);
  }

  #[test]
  fn window_length_mismatch_is_invalid_input() {
    let (model, _, fit) = trained(10, 80);
    let err = model.predict(&fit.scaler, &[0.5; 9], 3).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn series_not_longer_than_window_is_insufficient() {
    let series = series_from(gbm_path(10, 100.0, 0.0, 0.01, 1));
    let mut model = SequenceForecaster::new("X", small_config(10));
    let err = model.train(&series).unwrap_err();
    assert!(matches!(err, Error::InsufficientData(_)));
    assert!(!model.is_trained());
  }

  #[test]
  fn short_constant_series_is_insufficient_not_a_model_error() {
    let series = series_from(vec![10.0; 10]);
    let mut model = SequenceForecaster::new("X", small_config(10));
    let err = model.train(&series).unwrap_err();
    assert!(matches!(err, Error::InsufficientData(_)));
  }

  #[test]
  fn failed_retrain_discards_previous_network() {
    let (mut model, _, fit) = trained(10, 80);
    assert!(model.is_trained());

    let err = model.train(&series_from(vec![10.0; 50])).unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    assert!(!model.is_trained());
    assert!(matches!(
      model.predict(&fit.scaler, &[0.5; 10], 3),
      Err(Error::NotTrained)
    ));
    assert!(model.network().is_err());
  }

  #[test]
  fn constant_series_is_a_model_error() {
    let series = series_from(vec![10.0; 50]);
    let mut model = SequenceForecaster::new("X", small_config(10));
    assert!(matches!(model.train(&series), Err(Error::Model(_))));
  }

  #[test]
  fn default_window_forecast_through_trait() {
    let series = series_from(gbm_path(140, 50.0, 0.0002, 0.01, 4));
    let config = SequenceConfig {
      epochs: 1,
      hidden_dim: 8,
      dense_dim: 4,
      seed: Some(3),
      ..SequenceConfig::default()
    };
    let mut model = SequenceForecaster::new("DEF", config);
    model.fit(&series).unwrap();

    let path = model.forecast(&series, 5).unwrap();
    assert_eq!(path.len(), 5);
    assert_eq!(model.window(), 60);
    assert!(path.dates[0] > series.last_date().unwrap());
  }
}
