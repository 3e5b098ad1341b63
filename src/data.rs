//! Market data providers and reference allocations.
//!
//! Prices enter the crate through [`MarketDataProvider`]. The file-backed
//! [`CsvMarketData`] reads a wide CSV (a date column followed by one column
//! per instrument); [`CachedMarketData`] memoizes any provider by instrument
//! list and date range.

use crate::error::{Result, StrataError};
use crate::types::{PriceMatrix, WeightVector};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Prices for a request plus the risk-free rate over the same window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub prices: PriceMatrix,
    /// Annualized, as a decimal (0.04 = 4%).
    pub risk_free_rate: f64,
}

/// Source of aligned historical prices.
pub trait MarketDataProvider: Send + Sync {
    /// Prices for `instruments` (in that column order) with dates in
    /// `[start, end]`, and the risk-free rate over the window.
    fn fetch(&self, instruments: &[String], start: NaiveDate, end: NaiveDate) -> Result<MarketData>;
}

/// Where the risk-free rate comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFreeSource {
    /// A constant annual rate (decimal).
    Fixed(f64),
    /// A yield column quoted in percent (e.g. a 10-year treasury index);
    /// the rate is the window mean divided by 100.
    Column(String),
}

impl Default for RiskFreeSource {
    fn default() -> Self {
        RiskFreeSource::Fixed(0.0)
    }
}

/// Wide price CSV held in memory.
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    source: Option<PathBuf>,
    table: PriceMatrix,
    risk_free: RiskFreeSource,
}

impl CsvMarketData {
    /// Load a wide CSV file.
    pub fn from_path(path: impl AsRef<Path>, risk_free: RiskFreeSource) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading price table from: {}", path.display());
        let reader = ReaderBuilder::new().flexible(true).from_path(path)?;
        let table = read_wide(reader)?;
        Ok(Self {
            source: Some(path.to_path_buf()),
            table,
            risk_free,
        })
    }

    /// Load wide CSV text from any reader.
    pub fn from_reader<R: Read>(reader: R, risk_free: RiskFreeSource) -> Result<Self> {
        let reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        Ok(Self {
            source: None,
            table: read_wide(reader)?,
            risk_free,
        })
    }

    /// Wrap an existing price table.
    pub fn from_matrix(table: PriceMatrix, risk_free: RiskFreeSource) -> Self {
        Self {
            source: None,
            table,
            risk_free,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Every column in the file, including a risk-free column if present.
    pub fn columns(&self) -> &[String] {
        self.table.instruments()
    }

    pub fn table(&self) -> &PriceMatrix {
        &self.table
    }

    fn risk_free_rate(&self, start: NaiveDate, end: NaiveDate) -> Result<f64> {
        match &self.risk_free {
            RiskFreeSource::Fixed(rate) => Ok(*rate),
            RiskFreeSource::Column(name) => {
                let idx = self.table.index_of(name).ok_or_else(|| {
                    StrataError::DimensionMismatch(format!(
                        "Risk-free column {} not present in price data",
                        name
                    ))
                })?;
                let window = self.table.between(start, end);
                let values: Vec<f64> = window
                    .rows()
                    .iter()
                    .filter_map(|row| row[idx])
                    .filter(|v| v.is_finite())
                    .collect();
                if values.is_empty() {
                    return Err(StrataError::NoData);
                }
                Ok(values.iter().sum::<f64>() / values.len() as f64 / 100.0)
            }
        }
    }
}

impl MarketDataProvider for CsvMarketData {
    fn fetch(&self, instruments: &[String], start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
        if start > end {
            return Err(StrataError::InvalidInput(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        let prices = self.table.select(instruments)?.between(start, end);
        if prices.is_empty() {
            return Err(StrataError::NoData);
        }
        let risk_free_rate = self.risk_free_rate(start, end)?;
        debug!(
            "Fetched {} rows for [{}] ({} to {}), risk-free rate {:.4}",
            prices.len(),
            instruments.join(", "),
            start,
            end,
            risk_free_rate
        );
        Ok(MarketData {
            prices,
            risk_free_rate,
        })
    }
}

type CacheKey = (Vec<String>, NaiveDate, NaiveDate);

/// Memoizing wrapper around a provider.
#[derive(Debug)]
pub struct CachedMarketData<P> {
    inner: P,
    cache: Mutex<HashMap<CacheKey, MarketData>>,
}

impl<P: MarketDataProvider> CachedMarketData<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Number of cached requests.
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

impl<P: MarketDataProvider> MarketDataProvider for CachedMarketData<P> {
    fn fetch(&self, instruments: &[String], start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
        let key = (instruments.to_vec(), start, end);
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            debug!("Market data cache hit for [{}]", instruments.join(", "));
            return Ok(hit);
        }

        let data = self.inner.fetch(instruments, start, end)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, data.clone());
        }
        Ok(data)
    }
}

/// Parse a date in one of the accepted formats.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%b-%Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%:z"];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    // Surface chrono's own error for the canonical format
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

fn parse_cell(cell: &str, row: usize, column: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() || ["nan", "null", "na", "n/a"].contains(&cell.to_lowercase().as_str()) {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some).map_err(|_| {
        StrataError::InvalidInput(format!(
            "Row {}: value '{}' in column {} is not a number",
            row, cell, column
        ))
    })
}

fn read_wide<R: Read>(mut reader: csv::Reader<R>) -> Result<PriceMatrix> {
    let headers: StringRecord = reader.headers()?.clone();
    let Some(date_header) = headers.get(0) else {
        return Err(StrataError::NoData);
    };
    if !["date", "timestamp", "time", "datetime"].contains(&date_header.trim().to_lowercase().as_str()) {
        warn!("First column '{}' is treated as the date column", date_header);
    }
    let instruments: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let row_num = i + 1;
        let date = parse_date(record.get(0).unwrap_or_default())?;
        let values = instruments
            .iter()
            .enumerate()
            .map(|(j, name)| match record.get(j + 1) {
                Some(cell) => parse_cell(cell, row_num, name),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push((date, values));
    }

    if rows.is_empty() {
        return Err(StrataError::NoData);
    }

    rows.sort_by_key(|(d, _)| *d);
    let original_len = rows.len();
    rows.dedup_by_key(|(d, _)| *d);
    if rows.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - rows.len());
    }

    info!(
        "Loaded {} rows × {} columns from {} to {}",
        rows.len(),
        instruments.len(),
        rows[0].0,
        rows[rows.len() - 1].0
    );

    let (dates, values) = rows.into_iter().unzip();
    PriceMatrix::new(dates, instruments, values)
}

/// Write a price table as a wide CSV; missing cells are left empty.
pub fn write_price_csv(prices: &PriceMatrix, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path.as_ref())?;
    let mut header = vec!["date".to_string()];
    header.extend(prices.instruments().iter().cloned());
    writer.write_record(&header)?;
    for (date, row) in prices.dates().iter().zip(prices.rows()) {
        let mut record = vec![date.format("%Y-%m-%d").to_string()];
        record.extend(row.iter().map(|v| v.map(|p| p.to_string()).unwrap_or_default()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Named reference portfolios.
pub trait AllocationSource {
    /// Portfolio names in presentation order.
    fn names(&self) -> Vec<String>;

    /// Raw instrument → weight mapping as published. Weights may be in any
    /// positive scale (percentages, units).
    fn allocation(&self, name: &str) -> Result<WeightVector>;
}

/// In-memory allocations, typically loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticAllocations {
    portfolios: Vec<(String, WeightVector)>,
    aliases: BTreeMap<String, String>,
}

impl StaticAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, weights: WeightVector) {
        let name = name.into();
        match self.portfolios.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = weights,
            None => self.portfolios.push((name, weights)),
        }
    }

    /// Rename instruments on the way out, e.g. a listing code to its
    /// exchange-qualified ticker.
    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn len(&self) -> usize {
        self.portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }
}

impl AllocationSource for StaticAllocations {
    fn names(&self) -> Vec<String> {
        self.portfolios.iter().map(|(n, _)| n.clone()).collect()
    }

    fn allocation(&self, name: &str) -> Result<WeightVector> {
        let (_, weights) = self
            .portfolios
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| StrataError::InvalidInput(format!("Unknown portfolio: {}", name)))?;

        let mut out = WeightVector::new();
        for (instrument, w) in weights.iter() {
            let renamed = self.aliases.get(instrument).unwrap_or(instrument);
            out.insert(renamed.clone(), out.weight(renamed) + w);
        }
        Ok(out)
    }
}

/// Validate a raw allocation and rescale it to sum to one.
///
/// Weights must be finite and non-negative with a positive total; every
/// instrument must belong to `known`.
pub fn normalize_allocation(raw: &WeightVector, known: &[String]) -> Result<WeightVector> {
    if let Some((name, w)) = raw.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(StrataError::InvalidInput(format!(
            "Weight {} for {} must be finite and non-negative",
            w, name
        )));
    }
    if let Some((name, _)) = raw.iter().find(|(name, _)| !known.contains(name)) {
        return Err(StrataError::DimensionMismatch(format!(
            "Allocation names {} which has no price data",
            name
        )));
    }
    let total = raw.sum();
    if !(total > 0.0) {
        return Err(StrataError::InvalidInput(
            "Allocation weights sum to zero".to_string(),
        ));
    }
    Ok(raw.iter().map(|(name, w)| (name.clone(), w / total)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CSV: &str = "date,SPY,AGG,TNX\n\
        2024-01-03,470.0,95.0,4.0\n\
        2024-01-02,468.0,,3.9\n\
        2024-01-04,472.5,95.2,4.1\n\
        2024-01-05,471.0,95.1,4.0\n";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_wide_csv_sorts_and_keeps_missing() {
        let data = CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::Fixed(0.02)).unwrap();
        let table = data.table();
        assert_eq!(table.dates()[0], d(2));
        assert_eq!(table.rows()[0][1], None);
        assert_eq!(data.columns(), &names(&["SPY", "AGG", "TNX"])[..]);
    }

    #[test]
    fn test_fetch_selects_window_and_columns() {
        let data = CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::Fixed(0.02)).unwrap();
        let md = data.fetch(&names(&["AGG", "SPY"]), d(3), d(4)).unwrap();
        assert_eq!(md.prices.instruments(), &names(&["AGG", "SPY"])[..]);
        assert_eq!(md.prices.len(), 2);
        assert_eq!(md.risk_free_rate, 0.02);
    }

    #[test]
    fn test_risk_free_from_yield_column() {
        let data = CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::Column("TNX".into()))
            .unwrap();
        let md = data.fetch(&names(&["SPY"]), d(2), d(5)).unwrap();
        assert!((md.risk_free_rate - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_fetch_unknown_instrument() {
        let data = CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::default()).unwrap();
        assert!(matches!(
            data.fetch(&names(&["QQQ"]), d(2), d(5)),
            Err(StrataError::DimensionMismatch(_))
        ));
        assert!(matches!(
            data.fetch(&names(&["SPY"]), d(20), d(25)),
            Err(StrataError::NoData)
        ));
    }

    #[test]
    fn test_bad_cell_is_invalid_input() {
        let csv = "date,SPY\n2024-01-02,abc\n";
        assert!(matches!(
            CsvMarketData::from_reader(csv.as_bytes(), RiskFreeSource::default()),
            Err(StrataError::InvalidInput(_))
        ));
    }

    struct Counting {
        inner: CsvMarketData,
        calls: AtomicUsize,
    }

    impl MarketDataProvider for Counting {
        fn fetch(&self, instruments: &[String], start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(instruments, start, end)
        }
    }

    #[test]
    fn test_cache_memoizes_requests() {
        let cached = CachedMarketData::new(Counting {
            inner: CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::default()).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let request = names(&["SPY"]);
        let a = cached.fetch(&request, d(2), d(5)).unwrap();
        let b = cached.fetch(&request, d(2), d(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 1);

        cached.fetch(&request, d(3), d(5)).unwrap();
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn test_normalize_allocation() {
        let raw: WeightVector = [("SPY".to_string(), 60.0), ("AGG".to_string(), 40.0)]
            .into_iter()
            .collect();
        let w = normalize_allocation(&raw, &names(&["SPY", "AGG"])).unwrap();
        assert!((w.weight("SPY") - 0.6).abs() < 1e-12);
        assert!((w.sum() - 1.0).abs() < 1e-12);

        assert!(matches!(
            normalize_allocation(&raw, &names(&["SPY"])),
            Err(StrataError::DimensionMismatch(_))
        ));
        let negative: WeightVector = [("SPY".to_string(), -1.0)].into_iter().collect();
        assert!(matches!(
            normalize_allocation(&negative, &names(&["SPY"])),
            Err(StrataError::InvalidInput(_))
        ));
        let zero: WeightVector = [("SPY".to_string(), 0.0)].into_iter().collect();
        assert!(matches!(
            normalize_allocation(&zero, &names(&["SPY"])),
            Err(StrataError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_static_allocations_apply_aliases() {
        let mut source = StaticAllocations::new().with_aliases(
            [("CSPX".to_string(), "CSPX.L".to_string())].into_iter().collect(),
        );
        source.insert(
            "core-growth",
            [("CSPX".to_string(), 70.0), ("AGGU".to_string(), 30.0)]
                .into_iter()
                .collect(),
        );
        let w = source.allocation("core-growth").unwrap();
        assert_eq!(w.weight("CSPX.L"), 70.0);
        assert!(!w.contains("CSPX"));
        assert!(source.allocation("missing").is_err());
    }

    #[test]
    fn test_write_then_read_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let data = CsvMarketData::from_reader(CSV.as_bytes(), RiskFreeSource::default()).unwrap();
        write_price_csv(data.table(), &path).unwrap();
        let again = CsvMarketData::from_path(&path, RiskFreeSource::default()).unwrap();
        assert_eq!(again.table(), data.table());
    }
}
