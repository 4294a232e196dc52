use crate::error::{EngineError, Result};
use crate::models::Bar;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Pull interface for historical bars. Implementations must return gap-free,
/// time-ordered series; the core never fabricates prices.
pub trait MarketDataSource {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BarSeries>;
}

/// A validated, immutable bar series for one (symbol, timeframe).
///
/// The underlying storage is shared behind an `Arc`, so walk-forward windows
/// and parallel optimizer workers slice the same allocation instead of
/// copying it.
#[derive(Debug, Clone)]
pub struct BarSeries {
    symbol: String,
    timeframe: String,
    bars: Arc<Vec<Bar>>,
    offset: usize,
    len: usize,
}

impl BarSeries {
    pub fn new(symbol: &str, timeframe: &str, bars: Vec<Bar>) -> Result<Self> {
        if bars.is_empty() {
            return Err(EngineError::Data(format!(
                "empty bar series for {}/{}",
                symbol, timeframe
            )));
        }

        for (index, bar) in bars.iter().enumerate() {
            for value in [bar.open, bar.high, bar.low, bar.close] {
                if !value.is_finite() {
                    return Err(EngineError::Data(format!(
                        "non-finite price at {} (index {})",
                        bar.timestamp, index
                    )));
                }
            }
            if bar.high < bar.low {
                return Err(EngineError::Data(format!(
                    "high below low at {} (index {})",
                    bar.timestamp, index
                )));
            }
        }

        for window in bars.windows(2) {
            if window[1].timestamp <= window[0].timestamp {
                return Err(EngineError::Data(format!(
                    "timestamps not strictly ascending at {} (previous {})",
                    window[1].timestamp, window[0].timestamp
                )));
            }
        }

        let len = bars.len();
        Ok(Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            bars: Arc::new(bars),
            offset: 0,
            len,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first_timestamp(&self) -> DateTime<Utc> {
        self.bars()[0].timestamp
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.bars()[self.len - 1].timestamp
    }

    /// Zero-copy sub-series covering `start..=end`. May be empty when the
    /// range misses every bar.
    pub fn slice_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> BarSeries {
        let bars = self.bars();
        let begin = bars.partition_point(|bar| bar.timestamp < start);
        let finish = bars.partition_point(|bar| bar.timestamp <= end);
        BarSeries {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            bars: self.bars.clone(),
            offset: self.offset + begin,
            len: finish.saturating_sub(begin),
        }
    }
}

/// In-memory data source backed by preloaded series; the offline counterpart
/// of a broker-terminal feed, used by tests and library callers that already
/// hold their bars.
#[derive(Debug, Default)]
pub struct SliceDataSource {
    series: Vec<BarSeries>,
}

impl SliceDataSource {
    pub fn new(series: Vec<BarSeries>) -> Self {
        Self { series }
    }

    pub fn push(&mut self, series: BarSeries) {
        self.series.push(series);
    }
}

impl MarketDataSource for SliceDataSource {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BarSeries> {
        let found = self
            .series
            .iter()
            .find(|s| s.symbol() == symbol && s.timeframe() == timeframe)
            .ok_or_else(|| {
                EngineError::Data(format!("no series loaded for {}/{}", symbol, timeframe))
            })?;

        let sliced = found.slice_range(start, end);
        if sliced.is_empty() {
            return Err(EngineError::Data(format!(
                "no bars for {}/{} between {} and {}",
                symbol, timeframe, start, end
            )));
        }
        Ok(sliced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(day: i64, close: f64) -> Bar {
        let timestamp = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        Bar {
            timestamp,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn rejects_empty_series() {
        assert!(matches!(
            BarSeries::new("EURUSD", "D1", Vec::new()),
            Err(EngineError::Data(_))
        ));
    }

    #[test]
    fn rejects_unordered_timestamps() {
        let bars = vec![bar(2, 10.0), bar(1, 11.0)];
        assert!(matches!(
            BarSeries::new("EURUSD", "D1", bars),
            Err(EngineError::Data(_))
        ));
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let bars = vec![bar(1, 10.0), bar(1, 11.0)];
        assert!(BarSeries::new("EURUSD", "D1", bars).is_err());
    }

    #[test]
    fn slice_range_shares_storage() {
        let bars: Vec<Bar> = (0..10).map(|d| bar(d, 10.0 + d as f64)).collect();
        let series = BarSeries::new("EURUSD", "D1", bars).unwrap();

        let start = Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 1, 6, 0, 0, 0).unwrap();
        let window = series.slice_range(start, end);

        assert_eq!(window.len(), 4);
        assert_eq!(window.first_timestamp(), start);
        assert_eq!(window.last_timestamp(), end);
        assert_eq!(Arc::strong_count(&series.bars), 2);
    }

    #[test]
    fn fetch_filters_by_symbol_and_range() {
        let bars: Vec<Bar> = (0..5).map(|d| bar(d, 10.0)).collect();
        let source =
            SliceDataSource::new(vec![BarSeries::new("EURUSD", "D1", bars).unwrap()]);

        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 1, 4, 0, 0, 0).unwrap();
        let fetched = source.fetch("EURUSD", "D1", start, end).unwrap();
        assert_eq!(fetched.len(), 3);

        assert!(source.fetch("GBPUSD", "D1", start, end).is_err());
    }
}
