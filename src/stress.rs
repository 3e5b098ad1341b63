//! Historical stress windows.
//!
//! Replays each strategy's historical portfolio value over named market
//! crises and reports the annualized return inside each window.

use crate::analytics::{annualize, HistoricalPerformance};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named market stress window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisEvent {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CrisisEvent {
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }
}

/// The standard list of stress events, most recent first.
pub fn default_crisis_events() -> Vec<CrisisEvent> {
    [
        ("2022 Inflation", (2021, 12, 31), (2022, 9, 30)),
        ("COVID-19 Pandemic", (2019, 12, 31), (2020, 3, 31)),
        ("Chinese Stock Market Crash", (2015, 6, 1), (2015, 9, 30)),
        ("Flash Crash 2010", (2010, 3, 31), (2010, 6, 30)),
        ("2008 Financial Crisis", (2007, 10, 1), (2009, 3, 31)),
    ]
    .into_iter()
    .filter_map(|(name, s, e)| {
        let start = NaiveDate::from_ymd_opt(s.0, s.1, s.2)?;
        let end = NaiveDate::from_ymd_opt(e.0, e.1, e.2)?;
        Some(CrisisEvent::new(name, start, end))
    })
    .collect()
}

/// Annualized return of every strategy during one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressRow {
    pub event: CrisisEvent,
    /// Trading days between the first and last observation in the window.
    pub trading_days: usize,
    /// (strategy, annualized return) in strategy order.
    pub returns: Vec<(String, f64)>,
}

/// Stress results; events outside the data window are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StressTable {
    pub rows: Vec<StressRow>,
}

impl StressTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, event: &str) -> Option<&StressRow> {
        self.rows.iter().find(|r| r.event.name == event)
    }
}

/// Value change inside `[start, end]` of a dated value series.
///
/// Returns `(ratio, trading_days)`, or `None` when the series does not cover
/// the whole window or holds fewer than two observations inside it.
pub fn window_growth(
    dates: &[NaiveDate],
    values: &[f64],
    start: NaiveDate,
    end: NaiveDate,
) -> Option<(f64, usize)> {
    let (first, last) = (dates.first()?, dates.last()?);
    if *first > start || *last < end {
        return None;
    }
    let i0 = dates.iter().position(|d| *d >= start)?;
    let i1 = dates.iter().rposition(|d| *d <= end)?;
    if i1 <= i0 || !(values[i0] > 0.0) {
        return None;
    }
    Some((values[i1] / values[i0], i1 - i0))
}

/// Annualized return of each strategy's history over each event.
pub fn stress_test(
    histories: &[(String, HistoricalPerformance)],
    events: &[CrisisEvent],
) -> StressTable {
    let mut rows = Vec::new();
    for event in events {
        let mut returns = Vec::with_capacity(histories.len());
        let mut days = 0;
        for (name, history) in histories {
            if let Some((ratio, n)) =
                window_growth(&history.dates, &history.cumulative, event.start, event.end)
            {
                returns.push((name.clone(), annualize(ratio - 1.0, n)));
                days = n;
            }
        }
        if returns.is_empty() {
            debug!("Skipping {}: outside the data window", event.name);
            continue;
        }
        rows.push(StressRow {
            event: event.clone(),
            trading_days: days,
            returns,
        });
    }
    StressTable { rows }
}
