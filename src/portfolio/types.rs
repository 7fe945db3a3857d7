//! # Allocation Types
//!
//! $$
//! \sum_{t \in \text{tickers}} w_t = 1,\qquad w_t \ge 0
//! $$
//!
//! Weights are keyed by ticker so they survive reordering of table columns.
//! An [`Objective`] picks which point of the long-only frontier to solve for;
//! [`MarketMetrics`] carries the annualised estimates every objective shares.

use std::collections::BTreeMap;

use ndarray::Array1;
use ndarray::Array2;

/// Ticker to weight.
pub type WeightVector = BTreeMap<String, f64>;

/// Allocation objective of a long-only, fully invested portfolio.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Objective {
  /// Tangency portfolio.
  MaxSharpe,
  /// Least variance among portfolios earning exactly this return.
  TargetReturn(f64),
  /// Global minimum variance.
  MinVolatility,
}

impl From<Option<f64>> for Objective {
  fn from(target: Option<f64>) -> Self {
    match target {
      Some(t) => Self::TargetReturn(t),
      None => Self::MaxSharpe,
    }
  }
}

/// Annualised estimates feeding the optimizer.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketMetrics {
  pub tickers: Vec<String>,
  pub expected_returns: Array1<f64>,
  pub covariance: Array2<f64>,
}

/// Weights and their model performance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioResult {
  pub weights: WeightVector,
  /// Annualised expected return.
  pub expected_return: f64,
  /// Annualised volatility.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`.
  pub sharpe: f64,
}

/// `1/N` on every ticker.
pub fn equal_weights<S: AsRef<str>>(tickers: &[S]) -> WeightVector {
  let w = 1.0 / tickers.len().max(1) as f64;
  tickers
    .iter()
    .map(|t| (t.as_ref().to_string(), w))
    .collect()
}
