//! Core data types: price matrices, weight vectors and strategy weight tables.

use crate::error::{Result, StrataError};
use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Trading days per year used for every annualization in the crate.
pub const TRADING_DAYS_PER_YEAR: usize = 252;

/// Dates × instruments price table as delivered by a market data provider.
///
/// Cells are `None` where the provider had no observation. Prices are kept
/// exactly as delivered; [`PriceMatrix::clean`] produces the analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMatrix {
    dates: Vec<NaiveDate>,
    instruments: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl PriceMatrix {
    /// Create a price matrix from row-major data.
    ///
    /// Fails if dates are not strictly increasing, if instrument names repeat,
    /// or if any row width differs from the instrument count.
    pub fn new(
        dates: Vec<NaiveDate>,
        instruments: Vec<String>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        if dates.len() != rows.len() {
            return Err(StrataError::InvalidInput(format!(
                "{} dates but {} price rows",
                dates.len(),
                rows.len()
            )));
        }
        if let Some(pos) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(StrataError::InvalidInput(format!(
                "Dates must be strictly increasing: {} is followed by {}",
                dates[pos],
                dates[pos + 1]
            )));
        }
        for (i, name) in instruments.iter().enumerate() {
            if instruments[..i].contains(name) {
                return Err(StrataError::InvalidInput(format!(
                    "Duplicate instrument column: {}",
                    name
                )));
            }
        }
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != instruments.len())
        {
            return Err(StrataError::DimensionMismatch(format!(
                "Row {} has {} values, expected {}",
                i,
                row.len(),
                instruments.len()
            )));
        }

        Ok(Self {
            dates,
            instruments,
            rows,
        })
    }

    /// Build a fully observed matrix from per-instrument columns.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self> {
        let n = dates.len();
        if let Some((name, col)) = columns.iter().find(|(_, col)| col.len() != n) {
            return Err(StrataError::DimensionMismatch(format!(
                "Column {} has {} values, expected {}",
                name,
                col.len(),
                n
            )));
        }
        let rows = (0..n)
            .map(|t| columns.iter().map(|(_, col)| Some(col[t])).collect())
            .collect();
        let instruments = columns.into_iter().map(|(name, _)| name).collect();
        Self::new(dates, instruments, rows)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Number of dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Position of an instrument column.
    pub fn index_of(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|s| s == instrument)
    }

    /// Restrict the matrix to the given instruments, in the given order.
    pub fn select(&self, instruments: &[String]) -> Result<Self> {
        let indices = instruments
            .iter()
            .map(|name| {
                self.index_of(name).ok_or_else(|| {
                    StrataError::DimensionMismatch(format!(
                        "Instrument {} not present in price data",
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i]).collect())
            .collect();
        Self::new(self.dates.clone(), instruments.to_vec(), rows)
    }

    /// Keep only rows whose date lies in `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let (dates, rows) = self
            .dates
            .iter()
            .zip(self.rows.iter())
            .filter(|(d, _)| **d >= start && **d <= end)
            .map(|(d, r)| (*d, r.clone()))
            .unzip();
        Self {
            dates,
            instruments: self.instruments.clone(),
            rows,
        }
    }

    /// Drop every row holding a missing or non-positive price.
    ///
    /// Fails with [`StrataError::InsufficientData`] when fewer than two rows
    /// survive, since no return can be computed from them.
    pub fn clean(&self) -> Result<CleanPrices> {
        if self.instruments.is_empty() {
            return Err(StrataError::InsufficientData(
                "Price matrix has no instruments".to_string(),
            ));
        }

        let mut dates = Vec::with_capacity(self.dates.len());
        let mut columns = vec![Vec::with_capacity(self.dates.len()); self.instruments.len()];

        for (date, row) in self.dates.iter().zip(self.rows.iter()) {
            let valid = row
                .iter()
                .all(|p| matches!(p, Some(v) if v.is_finite() && *v > 0.0));
            if !valid {
                continue;
            }
            dates.push(*date);
            for (col, p) in columns.iter_mut().zip(row.iter()) {
                col.push(p.unwrap_or_default());
            }
        }

        if dates.len() < 2 {
            return Err(StrataError::InsufficientData(format!(
                "{} valid price rows after cleaning, need at least 2",
                dates.len()
            )));
        }

        Ok(CleanPrices {
            dates,
            instruments: self.instruments.clone(),
            columns,
        })
    }
}

/// Price data with every cell observed and positive.
///
/// Stored column-major: one price series per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanPrices {
    pub dates: Vec<NaiveDate>,
    pub instruments: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl CleanPrices {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Price series for one instrument.
    pub fn column(&self, instrument: &str) -> Option<&[f64]> {
        self.instruments
            .iter()
            .position(|s| s == instrument)
            .map(|i| self.columns[i].as_slice())
    }

    /// Last observed price of each instrument.
    pub fn last_prices(&self) -> Vec<f64> {
        self.columns
            .iter()
            .map(|c| c.last().copied().unwrap_or_default())
            .collect()
    }
}

/// Instrument → weight mapping produced by one strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(BTreeMap<String, f64>);

impl WeightVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Pair instruments with weights positionally.
    pub fn from_slices(instruments: &[String], weights: &[f64]) -> Result<Self> {
        if instruments.len() != weights.len() {
            return Err(StrataError::DimensionMismatch(format!(
                "{} instruments but {} weights",
                instruments.len(),
                weights.len()
            )));
        }
        Ok(Self(
            instruments
                .iter()
                .cloned()
                .zip(weights.iter().copied())
                .collect(),
        ))
    }

    pub fn insert(&mut self, instrument: impl Into<String>, weight: f64) {
        self.0.insert(instrument.into(), weight);
    }

    /// Weight for an instrument, zero when absent.
    pub fn weight(&self, instrument: &str) -> f64 {
        self.0.get(instrument).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.0.contains_key(instrument)
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    /// Weights laid out in the order of `instruments`, absent entries as zero.
    ///
    /// Fails with [`StrataError::DimensionMismatch`] if the vector carries a
    /// non-zero weight for an instrument outside `instruments`.
    pub fn aligned(&self, instruments: &[String]) -> Result<Vec<f64>> {
        if let Some((name, _)) = self
            .0
            .iter()
            .find(|(name, w)| w.abs() > 0.0 && !instruments.contains(name))
        {
            return Err(StrataError::DimensionMismatch(format!(
                "Weight given for {} which is not in the instrument set [{}]",
                name,
                instruments.join(", ")
            )));
        }
        Ok(instruments.iter().map(|s| self.weight(s)).collect())
    }
}

impl FromIterator<(String, f64)> for WeightVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Column table of weight vectors keyed by strategy or portfolio name.
///
/// Column order is insertion order; inserting an existing name replaces it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyWeights {
    columns: Vec<(String, WeightVector)>,
}

impl StrategyWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, weights: WeightVector) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = weights,
            None => self.columns.push((name, weights)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&WeightVector> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, w)| w)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightVector)> {
        self.columns.iter().map(|(n, w)| (n.as_str(), w))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Append every column of `other`.
    pub fn extend(&mut self, other: StrategyWeights) {
        for (name, weights) in other.columns {
            self.insert(name, weights);
        }
    }
}

impl Serialize for StrategyWeights {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, weights) in &self.columns {
            map.serialize_entry(name, weights)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_price_matrix_rejects_unsorted_dates() {
        let result = PriceMatrix::new(
            vec![date(2), date(1)],
            vec!["SPY".to_string()],
            vec![vec![Some(1.0)], vec![Some(2.0)]],
        );
        assert!(matches!(result, Err(StrataError::InvalidInput(_))));
    }

    #[test]
    fn test_price_matrix_rejects_ragged_rows() {
        let result = PriceMatrix::new(
            vec![date(1), date(2)],
            vec!["SPY".to_string(), "TLT".to_string()],
            vec![vec![Some(1.0), Some(2.0)], vec![Some(2.0)]],
        );
        assert!(matches!(result, Err(StrataError::DimensionMismatch(_))));
    }

    #[test]
    fn test_clean_drops_missing_and_non_positive_rows() {
        let prices = PriceMatrix::new(
            vec![date(1), date(2), date(3), date(4)],
            vec!["SPY".to_string(), "TLT".to_string()],
            vec![
                vec![Some(100.0), Some(50.0)],
                vec![None, Some(51.0)],
                vec![Some(101.0), Some(0.0)],
                vec![Some(102.0), Some(52.0)],
            ],
        )
        .unwrap();

        let clean = prices.clean().unwrap();
        assert_eq!(clean.dates, vec![date(1), date(4)]);
        assert_eq!(clean.column("SPY").unwrap(), &[100.0, 102.0]);
        assert_eq!(clean.column("TLT").unwrap(), &[50.0, 52.0]);
        assert_eq!(clean.last_prices(), vec![102.0, 52.0]);
    }

    #[test]
    fn test_clean_insufficient_rows() {
        let prices = PriceMatrix::new(
            vec![date(1), date(2)],
            vec!["SPY".to_string()],
            vec![vec![Some(100.0)], vec![Some(-1.0)]],
        )
        .unwrap();
        assert!(matches!(
            prices.clean(),
            Err(StrataError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_select_unknown_instrument() {
        let prices =
            PriceMatrix::from_columns(vec![date(1)], vec![("SPY".to_string(), vec![1.0])])
                .unwrap();
        assert!(matches!(
            prices.select(&["GLD".to_string()]),
            Err(StrataError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_weight_vector_alignment() {
        let mut weights = WeightVector::new();
        weights.insert("TLT", 0.4);
        weights.insert("SPY", 0.6);

        let instruments = vec!["SPY".to_string(), "GLD".to_string(), "TLT".to_string()];
        assert_eq!(weights.aligned(&instruments).unwrap(), vec![0.6, 0.0, 0.4]);

        weights.insert("QQQ", 0.1);
        assert!(matches!(
            weights.aligned(&instruments),
            Err(StrataError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_strategy_weights_preserve_order() {
        let mut table = StrategyWeights::new();
        table.insert("min_volatility", WeightVector::new());
        table.insert("max_sharpe", WeightVector::new());
        table.insert("min_volatility", WeightVector::new());

        let names: Vec<&str> = table.names().collect();
        assert_eq!(names, vec!["min_volatility", "max_sharpe"]);

        let json = serde_json::to_string(&table).unwrap();
        assert!(json.find("min_volatility").unwrap() < json.find("max_sharpe").unwrap());
    }
}
