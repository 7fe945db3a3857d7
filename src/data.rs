//! # Price Data
//!
//! $$
//! r_t = \frac{P_t}{P_{t-1}} - 1
//! $$
//!
//! Date-indexed price series, the aligned multi-asset price table, scaling and
//! supervised-window helpers.

pub mod ingestion;
pub mod scaler;
pub mod windows;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

pub use scaler::MinMaxScaler;
pub use windows::sliding_windows;
pub use windows::training_pairs;
pub use windows::TrainingPairs;

use crate::error::Error;
use crate::error::Result;

fn validate_dates(dates: &[NaiveDate]) -> Result<()> {
  if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
    return Err(Error::invalid(format!(
      "dates must be strictly increasing ({} followed by {})",
      w[0], w[1]
    )));
  }
  Ok(())
}

fn validate_prices<'a>(values: impl IntoIterator<Item = &'a f64>) -> Result<()> {
  for &v in values {
    if !v.is_finite() || v <= 0.0 {
      return Err(Error::invalid(format!(
        "prices must be positive and finite, got {v}"
      )));
    }
  }
  Ok(())
}

/// Single-asset price history.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
  dates: Vec<NaiveDate>,
  values: Array1<f64>,
}

impl PriceSeries {
  /// Build a series from parallel date/price vectors.
  pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
    if dates.len() != values.len() {
      return Err(Error::invalid(format!(
        "{} dates for {} prices",
        dates.len(),
        values.len()
      )));
    }
    validate_dates(&dates)?;
    validate_prices(&values)?;
    Ok(Self {
      dates,
      values: Array1::from_vec(values),
    })
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn values(&self) -> ArrayView1<'_, f64> {
    self.values.view()
  }

  /// Prices as a contiguous slice.
  pub fn as_slice(&self) -> &[f64] {
    // Built from a Vec, always standard layout.
    self.values.as_slice().unwrap_or(&[])
  }

  pub fn last_date(&self) -> Option<NaiveDate> {
    self.dates.last().copied()
  }

  /// The most recent `n` observations (all of them if shorter).
  pub fn tail(&self, n: usize) -> &[f64] {
    let s = self.as_slice();
    &s[s.len().saturating_sub(n)..]
  }
}

/// Aligned close prices, one column per ticker, one row per trading date.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioTable {
  dates: Vec<NaiveDate>,
  tickers: Vec<String>,
  prices: Array2<f64>,
}

impl PortfolioTable {
  /// Build a table; `prices` has shape `(dates.len(), tickers.len())`.
  pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() || prices.ncols() != tickers.len() {
      return Err(Error::invalid(format!(
        "price matrix shape {:?} does not match {} dates x {} tickers",
        prices.dim(),
        dates.len(),
        tickers.len()
      )));
    }
    for (i, t) in tickers.iter().enumerate() {
      if tickers[..i].contains(t) {
        return Err(Error::invalid(format!("duplicate ticker {t}")));
      }
    }
    validate_dates(&dates)?;
    validate_prices(prices.iter())?;
    Ok(Self {
      dates,
      tickers,
      prices,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  pub fn prices(&self) -> ArrayView2<'_, f64> {
    self.prices.view()
  }

  pub fn nrows(&self) -> usize {
    self.prices.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.tickers.len()
  }

  pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
    self.tickers.iter().position(|t| t == ticker)
  }

  /// Extract one ticker's column as a [`PriceSeries`].
  pub fn series(&self, ticker: &str) -> Result<PriceSeries> {
    let idx = self
      .ticker_index(ticker)
      .ok_or_else(|| Error::invalid(format!("unknown ticker {ticker}")))?;
    Ok(PriceSeries {
      dates: self.dates.clone(),
      values: self.prices.column(idx).to_owned(),
    })
  }

  /// Simple period returns, shape `(nrows - 1, n_assets)`.
  pub fn returns(&self) -> Array2<f64> {
    let n = self.prices.nrows();
    if n < 2 {
      return Array2::zeros((0, self.n_assets()));
    }
    let prev = self.prices.slice(ndarray::s![..n - 1, ..]);
    let next = self.prices.slice(ndarray::s![1.., ..]);
    &next / &prev - 1.0
  }

  /// Last observed price per ticker.
  pub fn last_prices(&self) -> Option<Array1<f64>> {
    let n = self.prices.nrows();
    (n > 0).then(|| self.prices.index_axis(Axis(0), n - 1).to_owned())
  }
}
