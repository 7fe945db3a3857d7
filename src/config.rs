//! # Configuration
//!
//! Immutable run configuration. A [`ProjectConfig`] is built once and handed by
//! reference to every component constructor; nothing reads global state.

use std::path::PathBuf;

use chrono::NaiveDate;
use impl_new_derive::ImplNew;

/// ARIMA(p, d, q) order.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArimaOrder {
  /// Autoregressive order.
  pub p: usize,
  /// Differencing order.
  pub d: usize,
  /// Moving-average order.
  pub q: usize,
}

impl Default for ArimaOrder {
  fn default() -> Self {
    Self { p: 5, d: 1, q: 0 }
  }
}

/// Architecture and training settings for the sequence forecaster.
#[derive(Clone, Debug)]
pub struct SequenceConfig {
  /// Input window length `W`.
  pub window: usize,
  pub epochs: usize,
  pub batch_size: usize,
  pub learning_rate: f64,
  /// Width of both LSTM layers.
  pub hidden_dim: usize,
  /// Width of the dense bottleneck before the scalar output.
  pub dense_dim: usize,
  pub dropout: f32,
  /// Seeds mini-batch shuffling. Weight initialisation stays unseeded.
  pub seed: Option<u64>,
  pub shuffle: bool,
  /// Draw an epoch progress bar on stderr.
  pub show_progress: bool,
}

impl Default for SequenceConfig {
  fn default() -> Self {
    Self {
      window: 60,
      epochs: 10,
      batch_size: 32,
      learning_rate: 1e-3,
      hidden_dim: 50,
      dense_dim: 25,
      dropout: 0.2,
      seed: None,
      shuffle: true,
      show_progress: false,
    }
  }
}

/// Interpolation points per background reference unless configured otherwise.
pub const DEFAULT_ALPHA_STEPS: usize = 8;

/// Settings for gradient attribution of sequence forecasts.
#[derive(Clone, Debug)]
pub struct AttributionConfig {
  /// Number of most recent observations turned into background windows.
  pub background_observations: usize,
  /// Interpolation points per background reference.
  pub alpha_steps: usize,
  /// Appended to the ticker to name the single input feature.
  pub feature_suffix: String,
}

impl AttributionConfig {
  pub fn feature_name(&self, ticker: &str) -> String {
    format!("{ticker}{}", self.feature_suffix)
  }
}

impl Default for AttributionConfig {
  fn default() -> Self {
    Self {
      background_observations: 200,
      alpha_steps: DEFAULT_ALPHA_STEPS,
      feature_suffix: " Lag".to_string(),
    }
  }
}

/// Conventions used for expected returns, risk and Sharpe ratios.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
  /// Annual risk-free rate used by max-Sharpe and by every reported Sharpe ratio.
  pub risk_free_rate: f64,
  /// Weights below this value are reported as zero.
  pub weight_cutoff: f64,
  /// Observations per year.
  pub frequency: usize,
  /// Geometric (compounded) instead of arithmetic mean returns.
  pub compounding: bool,
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self {
      risk_free_rate: 0.02,
      weight_cutoff: 1e-4,
      frequency: 252,
      compounding: true,
    }
  }
}

/// Top-level configuration of a portfolio run.
#[derive(Clone, Debug)]
pub struct ProjectConfig {
  pub tickers: Vec<String>,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  /// Where the ingestion collaborator writes the combined price table.
  pub processed_data_path: PathBuf,
  pub arima_order: ArimaOrder,
  pub sequence: SequenceConfig,
  pub attribution: AttributionConfig,
  pub optimizer: OptimizerConfig,
}

impl Default for ProjectConfig {
  fn default() -> Self {
    Self {
      tickers: vec!["TSLA".to_string(), "BND".to_string(), "SPY".to_string()],
      start_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
      end_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default(),
      processed_data_path: PathBuf::from("data/processed/portfolio_data.csv"),
      arima_order: ArimaOrder::default(),
      sequence: SequenceConfig::default(),
      attribution: AttributionConfig::default(),
      optimizer: OptimizerConfig::default(),
    }
  }
}

impl ProjectConfig {
  /// Replace the ticker universe.
  pub fn with_tickers<S: Into<String>>(mut self, tickers: impl IntoIterator<Item = S>) -> Self {
    self.tickers = tickers.into_iter().map(Into::into).collect();
    self
  }
}
