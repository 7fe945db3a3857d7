//! # Errors
//!
//! Failure taxonomy shared by the forecasters, the attribution engine and the
//! optimizer. Nothing in the core recovers locally; every variant reaches the
//! immediate caller.

/// Error type of the forecasting and allocation core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Series too short for the window or the model order.
  #[error("insufficient data: {0}")]
  InsufficientData(String),

  /// Prediction requested before a successful `train`.
  #[error("model must be trained before prediction")]
  NotTrained,

  /// Fit or solve failed, or the inputs are numerically degenerate.
  #[error("model error: {0}")]
  Model(String),

  /// Target return unreachable with long-only, fully invested weights.
  #[error(
    "target return {target:.6} is infeasible for a long-only portfolio (achievable range [{min:.6}, {max:.6}])"
  )]
  InfeasibleTarget { target: f64, min: f64, max: f64 },

  /// Malformed argument (shape mismatch, unknown ticker, ...).
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

impl Error {
  pub(crate) fn model(msg: impl Into<String>) -> Self {
    Self::Model(msg.into())
  }

  pub(crate) fn insufficient(msg: impl Into<String>) -> Self {
    Self::InsufficientData(msg.into())
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }
}

impl From<candle_core::Error> for Error {
  fn from(err: candle_core::Error) -> Self {
    Self::Model(err.to_string())
  }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
