//! # Ingestion
//!
//! Raw per-ticker price histories are merged into one [`PortfolioTable`].
//! Each ticker contributes a single price column, adjusted close when its
//! source has one and close otherwise. Dates are outer-joined and any row
//! with a missing price is dropped. The combined table is persisted as CSV with
//! a `Date` column followed by one column per ticker.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Context;
use chrono::NaiveDate;
use ndarray::Array2;
use tracing::info;
use tracing::warn;

use super::PortfolioTable;
use crate::error::Error;
use crate::error::Result;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One daily observation of a ticker.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceBar {
  pub date: NaiveDate,
  pub close: f64,
  pub adj_close: Option<f64>,
}

/// Raw history of one ticker as delivered by a [`PriceSource`].
#[derive(Clone, Debug)]
pub struct TickerHistory {
  pub ticker: String,
  pub bars: Vec<PriceBar>,
}

impl TickerHistory {
  /// Whether any bar carries an adjusted close.
  pub fn is_adjusted(&self) -> bool {
    self.bars.iter().any(|b| b.adj_close.is_some())
  }

  /// The price column of this ticker keyed by date.
  ///
  /// The column is chosen once for the whole history: adjusted close if any
  /// bar has it, close otherwise. Bars lacking the chosen price are absent, so
  /// they fall out of the join. Later bars win on duplicate dates.
  pub fn prices(&self) -> BTreeMap<NaiveDate, f64> {
    let adjusted = self.is_adjusted();
    let column: BTreeMap<NaiveDate, Option<f64>> = self
      .bars
      .iter()
      .map(|b| {
        let price = if adjusted { b.adj_close } else { Some(b.close) };
        (b.date, price)
      })
      .collect();
    column
      .into_iter()
      .filter_map(|(date, price)| price.map(|p| (date, p)))
      .collect()
  }
}

/// Anything able to deliver raw daily prices for a set of tickers.
pub trait PriceSource {
  fn fetch(
    &self,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<TickerHistory>>;
}

/// Reads `<dir>/<TICKER>.csv` files with `Date`, `Close` and optional
/// `Adj Close` columns.
#[derive(Clone, Debug)]
pub struct CsvDirSource {
  dir: PathBuf,
}

impl CsvDirSource {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  fn read_one(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<TickerHistory> {
    let path = self.dir.join(format!("{ticker}.csv"));
    let mut reader = csv::Reader::from_path(&path)
      .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let date_idx = column("Date").ok_or_else(|| anyhow!("{}: missing Date column", path.display()))?;
    let close_idx =
      column("Close").ok_or_else(|| anyhow!("{}: missing Close column", path.display()))?;
    let adj_idx = column("Adj Close");

    let mut bars = Vec::new();
    for (line, record) in reader.records().enumerate() {
      let record = record.with_context(|| format!("{}: bad record {line}", path.display()))?;
      let date = NaiveDate::parse_from_str(record.get(date_idx).unwrap_or("").trim(), DATE_FORMAT)
        .with_context(|| format!("{}: bad date on record {line}", path.display()))?;
      if date < start || date > end {
        continue;
      }
      let close = match parse_price(record.get(close_idx)) {
        Some(v) => v,
        None => continue,
      };
      let adj_close = adj_idx.and_then(|i| parse_price(record.get(i)));
      bars.push(PriceBar {
        date,
        close,
        adj_close,
      });
    }

    Ok(TickerHistory {
      ticker: ticker.to_string(),
      bars,
    })
  }
}

fn parse_price(field: Option<&str>) -> Option<f64> {
  field
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .and_then(|s| s.parse::<f64>().ok())
    .filter(|v| v.is_finite())
}

impl PriceSource for CsvDirSource {
  fn fetch(
    &self,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<TickerHistory>> {
    tickers
      .iter()
      .map(|t| self.read_one(t, start, end))
      .collect()
  }
}

/// Merge raw histories into an aligned table.
///
/// Column order follows `raw`. See [`TickerHistory::prices`] for the column
/// each ticker contributes.
pub fn combine(raw: &[TickerHistory]) -> Result<PortfolioTable> {
  if raw.is_empty() {
    return Err(Error::invalid("no ticker histories to combine"));
  }

  let columns: Vec<BTreeMap<NaiveDate, f64>> = raw.iter().map(TickerHistory::prices).collect();

  let mut all_dates: Vec<NaiveDate> = columns.iter().flat_map(|c| c.keys().copied()).collect();
  all_dates.sort_unstable();
  all_dates.dedup();

  let mut dates = Vec::with_capacity(all_dates.len());
  let mut rows = Vec::with_capacity(all_dates.len() * raw.len());
  for date in all_dates {
    let row: Option<Vec<f64>> = columns.iter().map(|c| c.get(&date).copied()).collect();
    if let Some(row) = row {
      dates.push(date);
      rows.extend(row);
    }
  }

  if dates.is_empty() {
    return Err(Error::insufficient("no date has a price for every ticker"));
  }

  let prices = Array2::from_shape_vec((dates.len(), raw.len()), rows)
    .map_err(|e| Error::invalid(e.to_string()))?;
  let tickers = raw.iter().map(|h| h.ticker.clone()).collect();
  PortfolioTable::new(dates, tickers, prices)
}

/// Write `table` as CSV, creating parent directories.
pub fn persist(table: &PortfolioTable, path: &Path) -> anyhow::Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
  }

  let mut writer =
    csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
  let mut header = vec!["Date".to_string()];
  header.extend(table.tickers().iter().cloned());
  writer.write_record(&header)?;

  for (date, row) in table.dates().iter().zip(table.prices().outer_iter()) {
    let mut record = vec![date.format(DATE_FORMAT).to_string()];
    record.extend(row.iter().map(|v| v.to_string()));
    writer.write_record(&record)?;
  }
  writer.flush()?;

  info!(path = %path.display(), rows = table.nrows(), "price table persisted");
  Ok(())
}

/// Read a table written by [`persist`].
pub fn load(path: &Path) -> anyhow::Result<PortfolioTable> {
  let mut reader =
    csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
  let headers = reader.headers()?.clone();
  let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
  if tickers.is_empty() {
    anyhow::bail!("{}: no ticker columns", path.display());
  }

  let mut dates = Vec::new();
  let mut values = Vec::new();
  let mut skipped = 0usize;
  for (line, record) in reader.records().enumerate() {
    let record = record.with_context(|| format!("{}: bad record {line}", path.display()))?;
    let date = NaiveDate::parse_from_str(record.get(0).unwrap_or("").trim(), DATE_FORMAT)
      .with_context(|| format!("{}: bad date on record {line}", path.display()))?;
    let row: Option<Vec<f64>> = (1..=tickers.len())
      .map(|i| parse_price(record.get(i)))
      .collect();
    match row {
      Some(row) => {
        dates.push(date);
        values.extend(row);
      }
      None => skipped += 1,
    }
  }
  if skipped > 0 {
    warn!(skipped, "dropped rows with missing prices");
  }

  let prices = Array2::from_shape_vec((dates.len(), tickers.len()), values)?;
  Ok(PortfolioTable::new(dates, tickers, prices)?)
}

/// [`combine`] then [`persist`].
pub fn combine_and_persist(raw: &[TickerHistory], path: &Path) -> anyhow::Result<PortfolioTable> {
  let table = combine(raw)?;
  persist(&table, path)?;
  Ok(table)
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  fn bar(date: NaiveDate, close: f64, adj: Option<f64>) -> PriceBar {
    PriceBar {
      date,
      close,
      adj_close: adj,
    }
  }

  #[test]
  fn combine_prefers_adjusted_and_drops_incomplete_rows() {
    let raw = vec![
      TickerHistory {
        ticker: "AAA".into(),
        bars: vec![
          bar(d(2024, 1, 2), 10.0, Some(9.5)),
          bar(d(2024, 1, 3), 11.0, Some(10.5)),
          bar(d(2024, 1, 4), 12.0, Some(11.5)),
        ],
      },
      TickerHistory {
        ticker: "BBB".into(),
        bars: vec![bar(d(2024, 1, 3), 20.0, None), bar(d(2024, 1, 4), 21.0, None)],
      },
    ];

    let table = combine(&raw).unwrap();
    assert_eq!(table.dates(), &[d(2024, 1, 3), d(2024, 1, 4)]);
    assert_eq!(table.tickers(), &["AAA", "BBB"]);
    assert_eq!(table.prices()[[0, 0]], 10.5);
    assert_eq!(table.prices()[[1, 1]], 21.0);
  }

  #[test]
  fn combine_without_common_dates_fails() {
    let raw = vec![
      TickerHistory {
        ticker: "AAA".into(),
        bars: vec![bar(d(2024, 1, 2), 10.0, None)],
      },
      TickerHistory {
        ticker: "BBB".into(),
        bars: vec![bar(d(2024, 1, 3), 20.0, None)],
      },
    ];
    assert!(matches!(combine(&raw), Err(Error::InsufficientData(_))));
  }

  #[test]
  fn persisted_table_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed").join("portfolio_data.csv");
    let raw = vec![
      TickerHistory {
        ticker: "AAA".into(),
        bars: vec![bar(d(2024, 1, 2), 10.25, None), bar(d(2024, 1, 3), 11.0, None)],
      },
      TickerHistory {
        ticker: "BBB".into(),
        bars: vec![bar(d(2024, 1, 2), 5.0, None), bar(d(2024, 1, 3), 5.5, None)],
      },
    ];

    let written = combine_and_persist(&raw, &path).unwrap();
    let loaded = load(&path).unwrap();
    assert_eq!(written, loaded);
  }

  #[test]
  fn csv_dir_source_filters_by_date_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = fs::File::create(dir.path().join("AAA.csv")).unwrap();
    writeln!(f, "Date,Open,Close,Adj Close").unwrap();
    writeln!(f, "2023-12-29,1,10.0,9.0").unwrap();
    writeln!(f, "2024-01-02,1,11.0,10.0").unwrap();
    writeln!(f, "2024-01-03,1,12.0,").unwrap();
    drop(f);

    let source = CsvDirSource::new(dir.path());
    let out = source
      .fetch(&["AAA".to_string()], d(2024, 1, 1), d(2024, 12, 31))
      .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].bars.len(), 2);
    assert_eq!(out[0].bars[1].adj_close, None);
    let prices: Vec<f64> = out[0].prices().into_values().collect();
    assert_eq!(prices, vec![10.0]);
  }

  #[test]
  fn partial_adjusted_column_never_mixes_in_raw_closes() {
    let raw = vec![
      TickerHistory {
        ticker: "AAA".into(),
        bars: vec![
          bar(d(2024, 1, 2), 100.0, Some(50.0)),
          bar(d(2024, 1, 3), 101.0, None),
          bar(d(2024, 1, 4), 102.0, Some(51.0)),
        ],
      },
      TickerHistory {
        ticker: "BBB".into(),
        bars: vec![
          bar(d(2024, 1, 2), 20.0, None),
          bar(d(2024, 1, 3), 20.5, None),
          bar(d(2024, 1, 4), 21.0, None),
        ],
      },
    ];

    let table = combine(&raw).unwrap();
    assert_eq!(table.dates(), &[d(2024, 1, 2), d(2024, 1, 4)]);
    assert_eq!(table.series("AAA").unwrap().as_slice(), &[50.0, 51.0]);
    assert_eq!(table.series("BBB").unwrap().as_slice(), &[20.0, 21.0]);
    let returns = table.returns();
    assert!((returns[[0, 0]] - 0.02).abs() < 1e-12);
  }

  #[test]
  fn later_duplicate_bar_wins_even_without_a_price() {
    let history = TickerHistory {
      ticker: "AAA".into(),
      bars: vec![
        bar(d(2024, 1, 2), 10.0, Some(9.0)),
        bar(d(2024, 1, 3), 11.0, Some(10.0)),
        bar(d(2024, 1, 3), 11.5, None),
      ],
    };
    assert!(history.is_adjusted());
    let prices = history.prices();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[&d(2024, 1, 2)], 9.0);
  }

  #[test]
  fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let source = CsvDirSource::new(dir.path());
    assert!(source
      .fetch(&["NOPE".to_string()], d(2024, 1, 1), d(2024, 1, 2))
      .is_err());
  }
}
