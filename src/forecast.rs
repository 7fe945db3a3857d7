//! # Forecasting
//!
//! $$
//! \hat P_{T+h},\quad h = 1, \dots, H
//! $$
//!
//! Two interchangeable forecasters share [`ForecasterExt`]: a classical
//! ARIMA model and a stacked LSTM driven recursively over a rolling window.

use chrono::Duration;
use chrono::NaiveDate;

use crate::data::PriceSeries;
use crate::error::Error;
use crate::error::Result;

pub mod arima;
pub mod lstm;

pub use arima::ArimaFit;
pub use arima::ArimaForecaster;
pub use arima::ForecastInterval;
pub use lstm::SequenceFit;
pub use lstm::SequenceForecaster;
pub use lstm::SequenceNetwork;

/// Dated point forecasts.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastPath {
  pub dates: Vec<NaiveDate>,
  pub values: Vec<f64>,
}

impl ForecastPath {
  /// Date the `values` one calendar day apart, starting the day after `last`.
  pub fn from_last_date(last: NaiveDate, values: Vec<f64>) -> Self {
    let dates = (1..=values.len() as i64)
      .map(|h| last + Duration::days(h))
      .collect();
    Self { dates, values }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Common surface of the price forecasters.
pub trait ForecasterExt {
  fn ticker(&self) -> &str;

  fn is_trained(&self) -> bool;

  /// Fit on `series`, discarding any previous fit.
  fn fit(&mut self, series: &PriceSeries) -> Result<()>;

  /// Forecast `horizon` prices following the end of `history`.
  fn forecast_values(&self, history: &PriceSeries, horizon: usize) -> Result<Vec<f64>>;

  /// [`ForecasterExt::forecast_values`] dated from the last observation.
  fn forecast(&self, history: &PriceSeries, horizon: usize) -> Result<ForecastPath> {
    let last = history
      .last_date()
      .ok_or_else(|| Error::insufficient("cannot forecast from an empty history"))?;
    let values = self.forecast_values(history, horizon)?;
    Ok(ForecastPath::from_last_date(last, values))
  }
}
