//! # ARIMA
//!
//! $$
//! \phi(B)(1-B)^d X_t = c + \theta(B)\varepsilon_t,\qquad
//! \phi(B) = 1 - \sum_{i=1}^p \phi_i B^i,\quad \theta(B) = 1 + \sum_{j=1}^q \theta_j B^j
//! $$
//!
//! Conditional least squares on the differenced series. Pure AR orders are a
//! single SVD least-squares solve; orders with an MA part start from the
//! Hannan-Rissanen regression and refine the conditional sum of squares with
//! a Nelder-Mead simplex. A constant enters only when `d = 0`.
//!
//! Multi-step forecasts set future innovations to zero and undo the
//! differencing level by level.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use nalgebra::DMatrix;
use nalgebra::DVector;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use tracing::debug;
use tracing::info;

use super::ForecasterExt;
use crate::config::ArimaOrder;
use crate::data::PriceSeries;
use crate::error::Error;
use crate::error::Result;

fn difference(y: &[f64]) -> Vec<f64> {
  y.windows(2).map(|w| w[1] - w[0]).collect()
}

fn integrate(diff: &[f64], start: f64) -> Vec<f64> {
  diff
    .iter()
    .scan(start, |acc, &d| {
      *acc += d;
      Some(*acc)
    })
    .collect()
}

fn long_ar_order(order: ArimaOrder) -> usize {
  (2 * (order.p + order.q)).max(4)
}

/// Observations needed so every regression in the fit is over-determined.
pub fn min_observations(order: ArimaOrder) -> usize {
  let c = usize::from(order.d == 0);
  let core = if order.q == 0 {
    2 * order.p + c + 2
  } else {
    let m = long_ar_order(order);
    2 * m + order.p.max(order.q) + order.p + order.q + c + 2
  };
  order.d + core
}

/// Regression rows `[1?, w_{t-1..p}, e_{t-1..q}]` for `t` in `start..n`.
fn design(
  w: &[f64],
  e: &[f64],
  with_constant: bool,
  p: usize,
  q: usize,
  start: usize,
) -> (Vec<Vec<f64>>, Vec<f64>) {
  let mut x = Vec::with_capacity(w.len().saturating_sub(start));
  let mut y = Vec::with_capacity(w.len().saturating_sub(start));
  for t in start..w.len() {
    let mut row = Vec::with_capacity(usize::from(with_constant) + p + q);
    if with_constant {
      row.push(1.0);
    }
    row.extend((1..=p).map(|i| w[t - i]));
    row.extend((1..=q).map(|j| e[t - j]));
    x.push(row);
    y.push(w[t]);
  }
  (x, y)
}

/// Least squares through the SVD, minimum-norm when the design is rank deficient.
fn lstsq(x: &[Vec<f64>], y: &[f64], k: usize) -> Result<Vec<f64>> {
  if k == 0 {
    return Ok(Vec::new());
  }
  if y.len() <= k {
    return Err(Error::insufficient(format!(
      "{} observations for {k} regressors",
      y.len()
    )));
  }

  let flat: Vec<f64> = x.iter().flatten().copied().collect();
  let x_mat = DMatrix::from_row_slice(y.len(), k, &flat);
  let y_vec = DVector::from_row_slice(y);

  let svd = x_mat.svd(true, true);
  let tol = (svd.singular_values.max() * 1e-10).max(f64::MIN_POSITIVE);
  let beta = svd.solve(&y_vec, tol).map_err(Error::model)?;

  if beta.iter().any(|b| !b.is_finite()) {
    return Err(Error::model("least squares produced non-finite coefficients"));
  }
  Ok(beta.iter().copied().collect())
}

fn split(beta: &[f64], with_constant: bool, p: usize) -> (f64, &[f64], &[f64]) {
  let c = usize::from(with_constant);
  let constant = if with_constant { beta[0] } else { 0.0 };
  (constant, &beta[c..c + p], &beta[c + p..])
}

/// One-step prediction errors; the first `p` are zero.
fn css_residuals(w: &[f64], constant: f64, ar: &[f64], ma: &[f64]) -> Vec<f64> {
  let p = ar.len();
  let mut e = vec![0.0; w.len()];
  for t in p..w.len() {
    let mut pred = constant;
    for (i, phi) in ar.iter().enumerate() {
      pred += phi * w[t - 1 - i];
    }
    for (j, theta) in ma.iter().enumerate() {
      if t > j {
        pred += theta * e[t - 1 - j];
      }
    }
    e[t] = w[t] - pred;
  }
  e
}

fn hannan_rissanen(w: &[f64], with_constant: bool, p: usize, q: usize, m: usize) -> Result<Vec<f64>> {
  let c = usize::from(with_constant);
  let (x, y) = design(w, &[], with_constant, m, 0, m);
  let long = lstsq(&x, &y, c + m)?;
  let (c0, phi, _) = split(&long, with_constant, m);
  let proxy = css_residuals(w, c0, phi, &[]);

  let (x, y) = design(w, &proxy, with_constant, p, q, m + p.max(q));
  lstsq(&x, &y, c + p + q)
}

struct CssCost {
  w: Vec<f64>,
  with_constant: bool,
  p: usize,
}

impl CostFunction for CssCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let (c, ar, ma) = split(x, self.with_constant, self.p);
    let e = css_residuals(&self.w, c, ar, ma);
    let sse = e[self.p..].iter().map(|v| v * v).sum::<f64>();
    Ok(if sse.is_finite() { sse } else { f64::INFINITY })
  }
}

fn refine_css(w: &[f64], with_constant: bool, p: usize, x0: Vec<f64>) -> Result<Vec<f64>> {
  let cost = CssCost {
    w: w.to_vec(),
    with_constant,
    p,
  };

  let mut simplex = Vec::with_capacity(x0.len() + 1);
  simplex.push(x0.clone());
  for i in 0..x0.len() {
    let mut point = x0.clone();
    point[i] += if point[i].abs() > 1e-3 { 0.1 * point[i] } else { 0.05 };
    simplex.push(point);
  }

  let solver = NelderMead::new(simplex)
    .with_sd_tolerance(1e-10)
    .map_err(|e| Error::model(format!("simplex setup failed: {e}")))?;
  let res = Executor::new(cost, solver)
    .configure(|state| state.max_iters(2000))
    .run()
    .map_err(|e| Error::model(format!("conditional sum of squares did not converge: {e}")))?;

  let best_cost = res.state.best_cost;
  if !best_cost.is_finite() {
    return Err(Error::model("conditional sum of squares is not finite"));
  }
  debug!(iterations = res.state.iter, best_cost, "css refinement finished");
  res
    .state
    .best_param
    .ok_or_else(|| Error::model("simplex returned no parameters"))
}

/// Point forecasts with symmetric normal bands.
#[derive(Clone, Debug)]
pub struct ForecastInterval {
  pub point: Vec<f64>,
  pub lower: Vec<f64>,
  pub upper: Vec<f64>,
  pub confidence: f64,
}

/// Estimated ARIMA model together with the series it was fitted on.
#[derive(Clone, Debug)]
pub struct ArimaFit {
  pub order: ArimaOrder,
  pub constant: f64,
  pub ar: Vec<f64>,
  pub ma: Vec<f64>,
  /// One-step residuals of the differenced series, first `p` dropped.
  pub residuals: Vec<f64>,
  pub sigma2: f64,
  pub aic: f64,
  pub bic: f64,
  values: Vec<f64>,
}

impl ArimaFit {
  /// Fit `order` to `values`.
  pub fn estimate(values: &[f64], order: ArimaOrder) -> Result<Self> {
    if values.iter().any(|v| !v.is_finite()) {
      return Err(Error::model("series contains non-finite values"));
    }
    let required = min_observations(order);
    if values.len() < required {
      return Err(Error::insufficient(format!(
        "ARIMA({},{},{}) needs at least {required} observations, got {}",
        order.p,
        order.d,
        order.q,
        values.len()
      )));
    }
    let (lo, hi) = values
      .iter()
      .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
      return Err(Error::model("cannot fit ARIMA on a zero-variance series"));
    }

    let ArimaOrder { p, d, q } = order;
    let mut w = values.to_vec();
    for _ in 0..d {
      w = difference(&w);
    }
    let with_constant = d == 0;

    let beta = if q == 0 {
      let (x, y) = design(&w, &[], with_constant, p, 0, p);
      lstsq(&x, &y, usize::from(with_constant) + p)?
    } else {
      let start = hannan_rissanen(&w, with_constant, p, q, long_ar_order(order))?;
      debug!(?start, "hannan-rissanen start");
      refine_css(&w, with_constant, p, start)?
    };

    let (constant, ar, ma) = split(&beta, with_constant, p);
    let residuals = css_residuals(&w, constant, ar, ma)[p..].to_vec();
    let n = residuals.len() as f64;
    let sigma2 = residuals.iter().map(|e| e * e).sum::<f64>() / n;
    let log_likelihood =
      -0.5 * n * (1.0 + (2.0 * std::f64::consts::PI * sigma2.max(f64::EPSILON)).ln());
    let k = (p + q + usize::from(with_constant) + 1) as f64;

    Ok(Self {
      order,
      constant,
      ar: ar.to_vec(),
      ma: ma.to_vec(),
      residuals,
      sigma2,
      aic: -2.0 * log_likelihood + 2.0 * k,
      bic: -2.0 * log_likelihood + k * n.ln(),
      values: values.to_vec(),
    })
  }

  /// Forecast `horizon` steps after the training series.
  pub fn forecast(&self, horizon: usize) -> Vec<f64> {
    self.project(&self.values, horizon)
  }

  /// Forecast `horizon` steps after `values` with the fitted coefficients.
  pub fn forecast_from(&self, values: &[f64], horizon: usize) -> Result<Vec<f64>> {
    let needed = self.order.d + self.order.p.max(self.order.q) + 1;
    if values.len() < needed {
      return Err(Error::insufficient(format!(
        "conditioning on {} observations, need {needed}",
        values.len()
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(Error::invalid("history contains non-finite values"));
    }
    Ok(self.project(values, horizon))
  }

  fn project(&self, values: &[f64], horizon: usize) -> Vec<f64> {
    if horizon == 0 {
      return Vec::new();
    }

    let mut levels = vec![values.to_vec()];
    for k in 0..self.order.d {
      let next = difference(&levels[k]);
      levels.push(next);
    }
    let mut w = levels[self.order.d].clone();
    let mut e = css_residuals(&w, self.constant, &self.ar, &self.ma);

    let mut out = Vec::with_capacity(horizon);
    for _ in 0..horizon {
      let n = w.len();
      let mut f = self.constant;
      for (i, phi) in self.ar.iter().enumerate() {
        if n > i {
          f += phi * w[n - 1 - i];
        }
      }
      for (j, theta) in self.ma.iter().enumerate() {
        if n > j {
          f += theta * e[n - 1 - j];
        }
      }
      w.push(f);
      e.push(0.0);
      out.push(f);
    }

    for level in levels[..self.order.d].iter().rev() {
      let start = level.last().copied().unwrap_or(0.0);
      out = integrate(&out, start);
    }
    out
  }

  /// MA(infinity) weights of the integrated model, `psi_0 = 1`.
  pub fn psi_weights(&self, horizon: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    poly.extend(self.ar.iter().map(|a| -a));
    for _ in 0..self.order.d {
      let mut next = vec![0.0; poly.len() + 1];
      for (i, &a) in poly.iter().enumerate() {
        next[i] += a;
        next[i + 1] -= a;
      }
      poly = next;
    }
    let phi_star: Vec<f64> = poly[1..].iter().map(|a| -a).collect();

    let mut psi = vec![0.0; horizon];
    if horizon > 0 {
      psi[0] = 1.0;
    }
    for j in 1..horizon {
      let mut v = self.ma.get(j - 1).copied().unwrap_or(0.0);
      for i in 1..=j.min(phi_star.len()) {
        v += phi_star[i - 1] * psi[j - i];
      }
      psi[j] = v;
    }
    psi
  }

  /// Forecasts with `confidence` normal bands from the psi weights.
  pub fn forecast_interval(&self, horizon: usize, confidence: f64) -> Result<ForecastInterval> {
    if !(confidence > 0.0 && confidence < 1.0) {
      return Err(Error::invalid(format!(
        "confidence must lie in (0, 1), got {confidence}"
      )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::model(e.to_string()))?;
    let z = normal.inverse_cdf(0.5 + confidence / 2.0);

    let point = self.forecast(horizon);
    let psi = self.psi_weights(horizon);
    let mut acc = 0.0;
    let mut lower = Vec::with_capacity(horizon);
    let mut upper = Vec::with_capacity(horizon);
    for (f, w) in point.iter().zip(psi.iter()) {
      acc += w * w;
      let half = z * (self.sigma2 * acc).sqrt();
      lower.push(f - half);
      upper.push(f + half);
    }

    Ok(ForecastInterval {
      point,
      lower,
      upper,
      confidence,
    })
  }
}

/// ARIMA price forecaster for one ticker.
#[derive(Clone, Debug)]
pub struct ArimaForecaster {
  ticker: String,
  order: ArimaOrder,
  fit: Option<ArimaFit>,
}

impl ArimaForecaster {
  pub fn new(ticker: impl Into<String>, order: ArimaOrder) -> Self {
    Self {
      ticker: ticker.into(),
      order,
      fit: None,
    }
  }

  pub fn order(&self) -> ArimaOrder {
    self.order
  }

  /// Fit the configured order.
  pub fn train(&mut self, series: &PriceSeries) -> Result<&ArimaFit> {
    self.train_with_order(series, self.order)
  }

  /// Fit an explicit order. A failure leaves the forecaster untrained.
  pub fn train_with_order(&mut self, series: &PriceSeries, order: ArimaOrder) -> Result<&ArimaFit> {
    self.fit = None;
    let fit = ArimaFit::estimate(series.as_slice(), order)?;
    info!(
      ticker = %self.ticker,
      p = order.p,
      d = order.d,
      q = order.q,
      aic = fit.aic,
      sigma2 = fit.sigma2,
      "arima fitted"
    );
    Ok(&*self.fit.insert(fit))
  }

  pub fn fitted(&self) -> Result<&ArimaFit> {
    self.fit.as_ref().ok_or(Error::NotTrained)
  }

  /// Conditional-mean forecasts following the training series.
  pub fn predict(&self, horizon: usize) -> Result<Vec<f64>> {
    Ok(self.fitted()?.forecast(horizon))
  }
}

impl ForecasterExt for ArimaForecaster {
  fn ticker(&self) -> &str {
    &self.ticker
  }

  fn is_trained(&self) -> bool {
    self.fit.is_some()
  }

  fn fit(&mut self, series: &PriceSeries) -> Result<()> {
    self.train(series).map(|_| ())
  }

  fn forecast_values(&self, history: &PriceSeries, horizon: usize) -> Result<Vec<f64>> {
    self.fitted()?.forecast_from(history.as_slice(), horizon)
  }
}
