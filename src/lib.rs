//! # portfolio-forecast
//!
//! Price forecasting, forecast attribution and mean-variance allocation for a
//! small basket of assets.
//!
//! | Module | Contents |
//! |---|---|
//! | [`config`] | Immutable run configuration |
//! | [`data`] | Price series, aligned price table, scaling, windows, CSV ingestion |
//! | [`forecast`] | ARIMA and stacked-LSTM forecasters |
//! | [`explain`] | Expected-gradients attribution over forecast windows |
//! | [`portfolio`] | Expected returns, covariance, max-Sharpe and target-return allocation |
//! | [`pipeline`] | End-to-end forecast and allocation runs |

pub mod config;
pub mod data;
pub mod error;
pub mod explain;
pub mod forecast;
pub mod pipeline;
pub mod portfolio;

pub use error::Error;
pub use error::Result;
