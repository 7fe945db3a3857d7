use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use portfolio_forecast::config::ProjectConfig;
use portfolio_forecast::data::ingestion;
use portfolio_forecast::pipeline::ModelKind;
use portfolio_forecast::pipeline::Pipeline;
use prettytable::row;
use prettytable::Table;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfolio-forecast")]
#[command(about = "Forecast prices, attribute LSTM forecasts and allocate a max-Sharpe portfolio")]
struct Cli {
  /// Processed price table (Date column followed by one column per ticker)
  #[arg(value_name = "PRICES_CSV")]
  prices: Option<PathBuf>,

  /// Forecast horizon in calendar days
  #[arg(long, default_value_t = 30)]
  horizon: usize,

  /// Forecasting model
  #[arg(long, value_enum, default_value_t = ModelKind::Arima)]
  model: ModelKind,

  /// Target annual return; max-Sharpe when omitted
  #[arg(long)]
  target_return: Option<f64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();

  let cli = Cli::parse();
  let defaults = ProjectConfig::default();
  let path = cli
    .prices
    .unwrap_or_else(|| defaults.processed_data_path.clone());
  let horizon = cli.horizon;
  let kind = cli.model;

  let table = ingestion::load(&path)
    .with_context(|| format!("failed to load price table from {}", path.display()))?;
  let config = defaults.with_tickers(table.tickers().to_vec());
  let pipeline = Pipeline::new(&config);

  let reports = pipeline.forecast_all(&table, kind, horizon)?;
  let mut forecasts = Table::new();
  forecasts.add_row(row!["Ticker", "Model", "Last", "Horizon end", "Forecast", "Change"]);
  for r in &reports {
    let end = r.path.values.last().copied().unwrap_or(r.last_price);
    let end_date = r
      .path
      .dates
      .last()
      .map(|d| d.to_string())
      .unwrap_or_default();
    forecasts.add_row(row![
      r.ticker,
      r.model,
      format!("{:.2}", r.last_price),
      end_date,
      format!("{end:.2}"),
      format!("{:+.2}%", 100.0 * r.expected_change().unwrap_or(0.0))
    ]);
  }
  forecasts.printstd();

  for r in &reports {
    if let Some(explanation) = &r.explanation {
      let mut lags = Table::new();
      lags.add_row(row![format!("{} lag", r.ticker), "Importance"]);
      for (lag, score) in explanation.top_lags(5) {
        lags.add_row(row![format!("t-{lag}"), format!("{score:.6}")]);
      }
      lags.printstd();
    }
  }

  let allocation = pipeline.allocate(&table, cli.target_return)?;
  let mut weights = Table::new();
  let objective = match cli.target_return {
    Some(_) => "Target return",
    None => "Max Sharpe",
  };
  weights.add_row(row!["Ticker", objective, "Equal weight"]);
  for ticker in table.tickers() {
    weights.add_row(row![
      ticker,
      format!("{:.4}", allocation.optimal.weights.get(ticker).copied().unwrap_or(0.0)),
      format!("{:.4}", allocation.benchmark.weights.get(ticker).copied().unwrap_or(0.0))
    ]);
  }
  for (label, optimal, benchmark) in [
    (
      "Expected return",
      allocation.optimal.expected_return,
      allocation.benchmark.expected_return,
    ),
    (
      "Volatility",
      allocation.optimal.volatility,
      allocation.benchmark.volatility,
    ),
    ("Sharpe", allocation.optimal.sharpe, allocation.benchmark.sharpe),
  ] {
    weights.add_row(row![label, format!("{optimal:.4}"), format!("{benchmark:.4}")]);
  }
  weights.printstd();

  Ok(())
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
  }

  #[test]
  fn defaults_to_arima_over_thirty_days() {
    let cli = Cli::try_parse_from(["portfolio-forecast"]).unwrap();
    assert!(cli.prices.is_none());
    assert_eq!(cli.horizon, 30);
    assert_eq!(cli.model, ModelKind::Arima);
    assert!(cli.target_return.is_none());
  }

  #[test]
  fn parses_flags_and_positional_path() {
    let cli = Cli::try_parse_from([
      "portfolio-forecast",
      "data/prices.csv",
      "--horizon",
      "10",
      "--model",
      "lstm",
      "--target-return",
      "0.12",
    ])
    .unwrap();
    assert_eq!(cli.prices, Some(PathBuf::from("data/prices.csv")));
    assert_eq!(cli.horizon, 10);
    assert_eq!(cli.model, ModelKind::Lstm);
    assert_eq!(cli.target_return, Some(0.12));
  }

  #[test]
  fn unknown_flags_and_models_are_rejected() {
    assert!(Cli::try_parse_from(["portfolio-forecast", "--horizn", "5"]).is_err());
    assert!(Cli::try_parse_from(["portfolio-forecast", "--model", "prophet"]).is_err());
    assert!(Cli::try_parse_from(["portfolio-forecast", "--horizon", "-3"]).is_err());
  }
}
