//! # Pipeline
//!
//! Price table in, forecasts, attributions and an allocation out. Each ticker
//! gets its own forecaster, scaler and network; tickers are processed in
//! parallel.

use std::fmt::Display;

use clap::ValueEnum;
use ndarray::s;
use ndarray::Array1;
use rayon::prelude::*;
use tracing::info;
use tracing::info_span;

use crate::config::ProjectConfig;
use crate::data::sliding_windows;
use crate::data::PortfolioTable;
use crate::error::Error;
use crate::error::Result;
use crate::explain::feature_importance;
use crate::explain::temporal_importance;
use crate::explain::FeatureImportance;
use crate::explain::GradientExplainer;
use crate::forecast::ArimaForecaster;
use crate::forecast::ForecastInterval;
use crate::forecast::ForecastPath;
use crate::forecast::ForecasterExt;
use crate::forecast::SequenceForecaster;
use crate::portfolio::equal_weights;
use crate::portfolio::PortfolioOptimizer;
use crate::portfolio::PortfolioResult;

/// Confidence of the ARIMA bands attached to reports.
const INTERVAL_CONFIDENCE: f64 = 0.95;

/// Forecasting model family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelKind {
  #[default]
  Arima,
  #[value(alias = "sequence")]
  Lstm,
}

impl Display for ModelKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Arima => write!(f, "ARIMA"),
      Self::Lstm => write!(f, "LSTM"),
    }
  }
}

/// Attribution summary of the most recent forecast window.
#[derive(Clone, Debug)]
pub struct Explanation {
  pub feature_importance: Vec<FeatureImportance>,
  /// One score per lag, oldest first.
  pub temporal_importance: Array1<f64>,
  /// Mean scaled model output over the background windows.
  pub expected_value: f64,
}

impl Explanation {
  /// `(lag, score)` of the `n` most influential lags, strongest first. Lag 1
  /// is the most recent observation.
  pub fn top_lags(&self, n: usize) -> Vec<(usize, f64)> {
    let w = self.temporal_importance.len();
    let mut lags: Vec<(usize, f64)> = self
      .temporal_importance
      .iter()
      .enumerate()
      .map(|(i, &score)| (w - i, score))
      .collect();
    lags.sort_by(|a, b| b.1.total_cmp(&a.1));
    lags.truncate(n);
    lags
  }
}

#[derive(Clone, Debug)]
pub struct ForecastReport {
  pub ticker: String,
  pub model: ModelKind,
  pub last_price: f64,
  pub path: ForecastPath,
  /// ARIMA only.
  pub interval: Option<ForecastInterval>,
  /// LSTM only.
  pub explanation: Option<Explanation>,
}

impl ForecastReport {
  /// Relative change from the last observed price to the end of the horizon.
  pub fn expected_change(&self) -> Option<f64> {
    self.path.values.last().map(|p| p / self.last_price - 1.0)
  }
}

#[derive(Clone, Debug)]
pub struct AllocationReport {
  pub optimal: PortfolioResult,
  /// Equal-weight portfolio under the same estimates.
  pub benchmark: PortfolioResult,
}

impl AllocationReport {
  pub fn sharpe_improvement(&self) -> f64 {
    self.optimal.sharpe - self.benchmark.sharpe
  }
}

/// End-to-end runs driven by one [`ProjectConfig`].
pub struct Pipeline<'a> {
  config: &'a ProjectConfig,
}

impl<'a> Pipeline<'a> {
  pub fn new(config: &'a ProjectConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ProjectConfig {
    self.config
  }

  /// Train `kind` on one ticker and forecast `horizon` calendar days.
  pub fn forecast(
    &self,
    table: &PortfolioTable,
    ticker: &str,
    kind: ModelKind,
    horizon: usize,
  ) -> Result<ForecastReport> {
    let _span = info_span!("forecast", ticker, model = %kind).entered();
    let series = table.series(ticker)?;
    let last_price = series
      .as_slice()
      .last()
      .copied()
      .ok_or_else(|| Error::insufficient(format!("no prices for {ticker}")))?;

    let report = match kind {
      ModelKind::Arima => {
        let mut model = ArimaForecaster::new(ticker, self.config.arima_order);
        let fit = model.train(&series)?;
        let interval = fit.forecast_interval(horizon, INTERVAL_CONFIDENCE)?;
        let path = model.forecast(&series, horizon)?;
        ForecastReport {
          ticker: ticker.to_string(),
          model: kind,
          last_price,
          path,
          interval: Some(interval),
          explanation: None,
        }
      }
      ModelKind::Lstm => {
        let mut model = SequenceForecaster::new(ticker, self.config.sequence.clone());
        let fit = model.train(&series)?;
        let path = model.forecast(&series, horizon)?;

        let recent = fit
          .scaler
          .transform_slice(series.tail(self.config.attribution.background_observations));
        let background = sliding_windows(&recent, model.window())?;
        let test = background.slice(s![-1.., .., ..]).to_owned();
        let explainer = GradientExplainer::new(model.network()?, background, model.device())?
          .with_alpha_steps(self.config.attribution.alpha_steps);
        let attributions = explainer.explain(&test)?;
        let explanation = Explanation {
          feature_importance: feature_importance(
            &attributions,
            &[self.config.attribution.feature_name(ticker)],
          )?,
          temporal_importance: temporal_importance(&attributions)?,
          expected_value: explainer.expected_value()?,
        };

        ForecastReport {
          ticker: ticker.to_string(),
          model: kind,
          last_price,
          path,
          interval: None,
          explanation: Some(explanation),
        }
      }
    };

    info!(
      horizon,
      change = report.expected_change().unwrap_or(0.0),
      "forecast complete"
    );
    Ok(report)
  }

  /// [`Pipeline::forecast`] for every configured ticker, in parallel.
  pub fn forecast_all(
    &self,
    table: &PortfolioTable,
    kind: ModelKind,
    horizon: usize,
  ) -> Result<Vec<ForecastReport>> {
    self
      .config
      .tickers
      .par_iter()
      .map(|ticker| self.forecast(table, ticker, kind, horizon))
      .collect()
  }

  /// Optimal weights (max-Sharpe, or minimum variance at `target_return`)
  /// next to the equal-weight benchmark.
  pub fn allocate(
    &self,
    table: &PortfolioTable,
    target_return: Option<f64>,
  ) -> Result<AllocationReport> {
    let mut optimizer = PortfolioOptimizer::new(table.clone(), self.config.optimizer.clone());
    let weights = optimizer.optimize_performance(target_return)?;
    let optimal = optimizer.get_performance(&weights)?;
    let benchmark = optimizer.get_performance(&equal_weights(table.tickers()))?;

    info!(
      sharpe = optimal.sharpe,
      benchmark_sharpe = benchmark.sharpe,
      "allocation complete"
    );
    Ok(AllocationReport { optimal, benchmark })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AttributionConfig;
  use crate::config::SequenceConfig;
  use crate::data::test_support::gbm_table;

  fn table() -> PortfolioTable {
    gbm_table(
      300,
      &[
        ("AAA", 0.0008, 0.02),
        ("BBB", 0.0004, 0.002),
        ("CCC", 0.0005, 0.01),
      ],
      7,
    )
  }

  fn config() -> ProjectConfig {
    ProjectConfig {
      sequence: SequenceConfig {
        window: 10,
        epochs: 1,
        hidden_dim: 4,
        dense_dim: 2,
        seed: Some(1),
        ..SequenceConfig::default()
      },
      attribution: AttributionConfig {
        background_observations: 40,
        alpha_steps: 2,
        ..AttributionConfig::default()
      },
      ..ProjectConfig::default()
    }
    .with_tickers(["AAA", "BBB", "CCC"])
  }

  #[test]
  fn arima_forecasts_every_ticker() {
    let cfg = config();
    let reports = Pipeline::new(&cfg)
      .forecast_all(&table(), ModelKind::Arima, 30)
      .unwrap();

    assert_eq!(reports.len(), 3);
    for r in &reports {
      assert_eq!(r.path.len(), 30);
      assert!(r.explanation.is_none());
      assert_eq!(r.interval.as_ref().unwrap().point.len(), 30);
    }
    let tickers: Vec<&str> = reports.iter().map(|r| r.ticker.as_str()).collect();
    assert_eq!(tickers, vec!["AAA", "BBB", "CCC"]);
  }

  #[test]
  fn lstm_forecast_carries_an_explanation() {
    let cfg = config();
    let report = Pipeline::new(&cfg)
      .forecast(&table(), "AAA", ModelKind::Lstm, 5)
      .unwrap();

    assert_eq!(report.path.len(), 5);
    let explanation = report.explanation.unwrap();
    assert_eq!(explanation.temporal_importance.len(), 10);
    assert_eq!(explanation.feature_importance[0].name, "AAA Lag");
    assert_eq!(explanation.top_lags(3).len(), 3);
  }

  #[test]
  fn unknown_ticker_fails() {
    let cfg = config();
    let err = Pipeline::new(&cfg)
      .forecast(&table(), "ZZZ", ModelKind::Arima, 5)
      .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
  }

  #[test]
  fn allocation_is_at_least_as_good_as_equal_weights() {
    let cfg = config();
    let report = Pipeline::new(&cfg).allocate(&table(), None).unwrap();
    assert!(report.sharpe_improvement() >= -1e-9);
    assert!((report.optimal.weights.values().sum::<f64>() - 1.0).abs() < 1e-6);
  }

  #[test]
  fn model_kind_parses_from_cli_values() {
    assert_eq!(ModelKind::from_str("LSTM", true).unwrap(), ModelKind::Lstm);
    assert_eq!(ModelKind::from_str("sequence", false).unwrap(), ModelKind::Lstm);
    assert_eq!(ModelKind::from_str("arima", false).unwrap(), ModelKind::Arima);
    assert!(ModelKind::from_str("prophet", true).is_err());
  }
}
