//! # Mean-Variance Optimizer
//!
//! $$
//! \max_{\mathbf{w} \ge 0,\ \mathbf{1}^\top\mathbf{w} = 1}
//! \frac{\mu^\top\mathbf{w} - r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! \iff
//! \min_{\mathbf{y} \ge 0} \mathbf{y}^\top\Sigma\mathbf{y}
//! \ \text{s.t.}\ (\mu - r_f)^\top\mathbf{y} = 1,\quad \mathbf{w} = \mathbf{y}/\mathbf{1}^\top\mathbf{y}
//! $$
//!
//! Every objective reduces to a non-negative QP over the covariance matrix.
//! Market estimates are computed once per optimizer and reused.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;
use tracing::info;

use super::metrics::mean_historical_return;
use super::metrics::sample_cov;
use super::qp::solve_nonneg_qp;
use super::types::MarketMetrics;
use super::types::Objective;
use super::types::PortfolioResult;
use super::types::WeightVector;
use crate::config::OptimizerConfig;
use crate::data::PortfolioTable;
use crate::error::Error;
use crate::error::Result;

const TARGET_TOL: f64 = 1e-12;

fn covariance_matrix(metrics: &MarketMetrics) -> Result<DMatrix<f64>> {
  let cov = &metrics.covariance;
  let n = cov.nrows();
  let sigma = DMatrix::from_fn(n, n, |i, j| cov[[i, j]]);

  if sigma.clone().cholesky().is_none() {
    return Err(Error::model("covariance matrix is not positive definite"));
  }
  let eigen = sigma.clone().symmetric_eigen().eigenvalues;
  let (lo, hi) = (eigen.min(), eigen.max());
  if !(hi > 0.0) || lo <= hi * 1e-12 {
    return Err(Error::model(format!(
      "covariance matrix is singular (eigenvalues in [{lo:.3e}, {hi:.3e}])"
    )));
  }
  Ok(sigma)
}

fn argmin_argmax(v: &[f64]) -> (usize, usize) {
  let mut lo = 0;
  let mut hi = 0;
  for (i, &x) in v.iter().enumerate() {
    if x < v[lo] {
      lo = i;
    }
    if x > v[hi] {
      hi = i;
    }
  }
  (lo, hi)
}

fn solve(metrics: &MarketMetrics, risk_free: f64, objective: Objective) -> Result<Vec<f64>> {
  let mu: Vec<f64> = metrics.expected_returns.to_vec();
  let n = mu.len();
  if n == 0 {
    return Err(Error::invalid("no assets to allocate"));
  }
  let sigma = covariance_matrix(metrics)?;

  match objective {
    Objective::MaxSharpe => {
      let excess: Vec<f64> = mu.iter().map(|m| m - risk_free).collect();
      let (_, best) = argmin_argmax(&excess);
      if excess[best] <= 0.0 {
        return Err(Error::model(format!(
          "no asset has an expected return above the risk-free rate {risk_free}"
        )));
      }
      let a = DMatrix::from_row_slice(1, n, &excess);
      let b = DVector::from_element(1, 1.0);
      let mut y0 = DVector::zeros(n);
      y0[best] = 1.0 / excess[best];

      let y = solve_nonneg_qp(&sigma, &a, &b, y0)?;
      let total = y.sum();
      if !(total > 0.0) {
        return Err(Error::model("degenerate tangency solution"));
      }
      Ok(y.iter().map(|v| v / total).collect())
    }
    Objective::TargetReturn(target) => {
      let (lo, hi) = argmin_argmax(&mu);
      let (min, max) = (mu[lo], mu[hi]);
      if !target.is_finite() || target < min - TARGET_TOL || target > max + TARGET_TOL {
        return Err(Error::InfeasibleTarget { target, min, max });
      }

      let mut w0 = DVector::zeros(n);
      if max - min > TARGET_TOL {
        let theta = ((target - min) / (max - min)).clamp(0.0, 1.0);
        w0[lo] = 1.0 - theta;
        w0[hi] += theta;
      } else {
        w0[lo] = 1.0;
      }
      let mut rows = vec![1.0; n];
      rows.extend_from_slice(&mu);
      let a = DMatrix::from_row_slice(2, n, &rows);
      let b = DVector::from_vec(vec![1.0, target.clamp(min, max)]);
      Ok(solve_nonneg_qp(&sigma, &a, &b, w0)?.iter().copied().collect())
    }
    Objective::MinVolatility => {
      let a = DMatrix::from_element(1, n, 1.0);
      let b = DVector::from_element(1, 1.0);
      let w0 = DVector::from_element(n, 1.0 / n as f64);
      Ok(solve_nonneg_qp(&sigma, &a, &b, w0)?.iter().copied().collect())
    }
  }
}

/// Zero weights below `cutoff`, renormalise the rest to sum to one.
fn clean_weights(raw: &[f64], cutoff: f64) -> Result<Vec<f64>> {
  let kept: Vec<f64> = raw
    .iter()
    .map(|&w| if w < cutoff { 0.0 } else { w })
    .collect();
  let total: f64 = kept.iter().sum();
  if !(total > 0.0) {
    return Err(Error::model("all weights fall below the cutoff"));
  }
  Ok(kept.into_iter().map(|w| w / total).collect())
}

fn performance(metrics: &MarketMetrics, w: &[f64], risk_free: f64) -> (f64, f64, f64) {
  let w = ndarray::ArrayView1::from(w);
  let expected_return = metrics.expected_returns.dot(&w);
  let volatility = w.dot(&metrics.covariance.dot(&w)).max(0.0).sqrt();
  let sharpe = if volatility > 1e-15 {
    (expected_return - risk_free) / volatility
  } else {
    0.0
  };
  (expected_return, volatility, sharpe)
}

/// Long-only mean-variance optimizer over one price table.
#[derive(Clone, Debug)]
pub struct PortfolioOptimizer {
  table: PortfolioTable,
  config: OptimizerConfig,
  metrics: Option<MarketMetrics>,
}

impl PortfolioOptimizer {
  pub fn new(table: PortfolioTable, config: OptimizerConfig) -> Self {
    Self {
      table,
      config,
      metrics: None,
    }
  }

  pub fn config(&self) -> &OptimizerConfig {
    &self.config
  }

  pub fn tickers(&self) -> &[String] {
    self.table.tickers()
  }

  /// Annualised expected returns and covariance, computed on first use.
  pub fn calculate_metrics(&mut self) -> Result<&MarketMetrics> {
    let metrics = match self.metrics.take() {
      Some(m) => m,
      None => {
        let returns = self.table.returns();
        let expected_returns = mean_historical_return(
          returns.view(),
          self.config.frequency,
          self.config.compounding,
        )?;
        let covariance = sample_cov(returns.view(), self.config.frequency)?;
        info!(
          assets = self.table.n_assets(),
          observations = returns.nrows(),
          "market metrics estimated"
        );
        MarketMetrics {
          tickers: self.table.tickers().to_vec(),
          expected_returns,
          covariance,
        }
      }
    };
    Ok(&*self.metrics.insert(metrics))
  }

  /// Cleaned weights: max-Sharpe without a target, minimum variance at the
  /// target return otherwise.
  pub fn optimize_performance(&mut self, target_return: Option<f64>) -> Result<WeightVector> {
    Ok(self.optimize(Objective::from(target_return))?.weights)
  }

  /// Solve `objective`, clean the weights and report their performance.
  pub fn optimize(&mut self, objective: Objective) -> Result<PortfolioResult> {
    let risk_free = self.config.risk_free_rate;
    let cutoff = self.config.weight_cutoff;
    let metrics = self.calculate_metrics()?;

    let raw = solve(metrics, risk_free, objective)?;
    debug!(?objective, ?raw, "raw weights");
    let w = clean_weights(&raw, cutoff)?;
    let (expected_return, volatility, sharpe) = performance(metrics, &w, risk_free);

    info!(
      ?objective,
      expected_return,
      volatility,
      sharpe,
      "portfolio optimized"
    );
    Ok(PortfolioResult {
      weights: metrics.tickers.iter().cloned().zip(w).collect(),
      expected_return,
      volatility,
      sharpe,
    })
  }

  /// Global minimum-variance portfolio.
  pub fn min_volatility(&mut self) -> Result<PortfolioResult> {
    self.optimize(Objective::MinVolatility)
  }

  /// `points` target-return portfolios evenly spaced from the minimum-variance
  /// return up to the largest expected return.
  pub fn efficient_frontier(&mut self, points: usize) -> Result<Vec<PortfolioResult>> {
    if points < 2 {
      return Err(Error::invalid("efficient frontier needs at least two points"));
    }
    let start = self.min_volatility()?.expected_return;
    let end = self
      .calculate_metrics()?
      .expected_returns
      .iter()
      .copied()
      .fold(f64::NEG_INFINITY, f64::max);

    (0..points)
      .map(|k| {
        let t = start + (end - start) * k as f64 / (points - 1) as f64;
        self.optimize(Objective::TargetReturn(t.min(end)))
      })
      .collect()
  }

  /// Expected return, volatility and Sharpe ratio of arbitrary weights.
  /// Tickers missing from `weights` count as zero.
  pub fn get_performance(&mut self, weights: &WeightVector) -> Result<PortfolioResult> {
    let risk_free = self.config.risk_free_rate;
    let metrics = self.calculate_metrics()?;

    if let Some(unknown) = weights.keys().find(|t| !metrics.tickers.contains(*t)) {
      return Err(Error::invalid(format!("unknown ticker {unknown}")));
    }
    if weights.values().any(|w| !w.is_finite()) {
      return Err(Error::invalid("weights must be finite"));
    }
    let w: Vec<f64> = metrics
      .tickers
      .iter()
      .map(|t| weights.get(t).copied().unwrap_or(0.0))
      .collect();
    let (expected_return, volatility, sharpe) = performance(metrics, &w, risk_free);

    Ok(PortfolioResult {
      weights: weights.clone(),
      expected_return,
      volatility,
      sharpe,
    })
  }
}
