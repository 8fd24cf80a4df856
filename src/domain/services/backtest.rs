//! SMA crossover backtest.
//!
//! One instrument, one position, always all-in or flat. A golden cross of the
//! short SMA over the long SMA enters at the evaluated bar's open, a death
//! cross exits at the evaluated bar's open. No randomness: the same bars and
//! parameters always give the same trades.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::entities::market_bar::MarketBar;
use crate::domain::errors::BacktestError;
use crate::persistence::repository::MarketBarRepository;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub short_window: usize,
    pub long_window: usize,
    pub initial_equity: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
            initial_equity: 100_000.0,
        }
    }
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.short_window == 0 || self.long_window == 0 {
            return Err(BacktestError::InvalidWindow(
                "windows must be at least 1".to_string(),
            ));
        }
        if self.short_window >= self.long_window {
            return Err(BacktestError::InvalidWindow(format!(
                "short window {} must be below long window {}",
                self.short_window, self.long_window
            )));
        }
        if !(self.initial_equity.is_finite() && self.initial_equity > 0.0) {
            return Err(BacktestError::InvalidWindow(
                "initial equity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_date: String,
    pub exit_date: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub start: String,
    pub end: String,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub trades: Vec<BacktestTrade>,
}

/// Trailing simple moving average; `None` until `window` values are seen.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut acc = 0.0;
    for (i, v) in values.iter().enumerate() {
        acc += v;
        if i >= window {
            acc -= values[i - window];
        }
        if i + 1 < window {
            out.push(None);
        } else {
            out.push(Some(acc / window as f64));
        }
    }
    out
}

/// Run the crossover over `bars`, which must be sorted by timestamp.
pub fn run_sma_crossover(
    symbol: &str,
    start: &str,
    end: &str,
    bars: &[MarketBar],
    params: &BacktestParams,
) -> Result<BacktestResult, BacktestError> {
    params.validate()?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let short = sma(&closes, params.short_window);
    let long = sma(&closes, params.long_window);

    let mut equity = params.initial_equity;
    let mut peak = params.initial_equity;
    let mut max_dd_pct: f64 = 0.0;
    let mut entry: Option<(String, f64)> = None;
    let mut trades = Vec::new();

    for i in 1..bars.len() {
        let (Some(prev_short), Some(prev_long), Some(cur_short), Some(cur_long)) =
            (short[i - 1], long[i - 1], short[i], long[i])
        else {
            continue;
        };

        let prev_diff = prev_short - prev_long;
        let cur_diff = cur_short - cur_long;
        let bar = &bars[i];
        let price = bar.open;
        let date = bar.ts.date_naive().to_string();

        match entry.take() {
            None if prev_diff <= 0.0 && cur_diff > 0.0 => {
                entry = Some((date, price));
            }
            Some((entry_date, entry_price)) if prev_diff >= 0.0 && cur_diff < 0.0 => {
                let size = equity / entry_price;
                let pnl = (price - entry_price) * size;
                equity += pnl;
                trades.push(BacktestTrade {
                    entry_date,
                    exit_date: date,
                    entry_price,
                    exit_price: price,
                    pnl,
                });
            }
            other => entry = other,
        }

        peak = peak.max(equity);
        if peak > 0.0 {
            max_dd_pct = max_dd_pct.min((equity - peak) / peak * 100.0);
        }
    }

    let total_return_pct = (equity / params.initial_equity - 1.0) * 100.0;

    Ok(BacktestResult {
        symbol: symbol.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        initial_equity: params.initial_equity,
        final_equity: equity,
        total_return_pct,
        max_drawdown_pct: max_dd_pct,
        trades,
    })
}

/// `YYYY-MM-DD` or RFC 3339. A bare date as the end bound covers the whole day.
pub fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, BacktestError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BacktestError::InvalidDate(raw.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| BacktestError::InvalidDate(raw.to_string()))?;
    Ok(date.and_time(time).and_utc())
}

/// Backtest over stored market bars
#[derive(Clone)]
pub struct BacktestEngine {
    bars: MarketBarRepository,
}

impl BacktestEngine {
    pub fn new(bars: MarketBarRepository) -> Self {
        Self { bars }
    }

    pub async fn run(
        &self,
        symbol: &str,
        timeframe: &str,
        start: &str,
        end: &str,
        params: &BacktestParams,
    ) -> Result<BacktestResult, BacktestError> {
        params.validate()?;
        let from = parse_bound(start, false)?;
        let to = parse_bound(end, true)?;

        let bars = self.bars.range(symbol, timeframe, from, to).await?;
        let result = run_sma_crossover(symbol, start, end, &bars, params)?;

        info!(
            "Backtest {} {} [{} .. {}]: {} bars, {} trades, return {:.2}%",
            symbol,
            timeframe,
            start,
            end,
            bars.len(),
            result.trades.len(),
            result.total_return_pct
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars(opens: &[f64], closes: &[f64]) -> Vec<MarketBar> {
        let day0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        opens
            .iter()
            .zip(closes)
            .enumerate()
            .map(|(i, (&open, &close))| MarketBar {
                symbol: "TEST".to_string(),
                timeframe: "1Day".to_string(),
                ts: day0 + Duration::days(i as i64),
                open,
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 0.0,
            })
            .collect()
    }

    fn params(short: usize, long: usize) -> BacktestParams {
        BacktestParams {
            short_window: short,
            long_window: long,
            initial_equity: 100_000.0,
        }
    }

    #[test]
    fn test_sma_warmup_is_none() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_empty_bars_return_initial_equity() {
        let result = run_sma_crossover("X", "a", "b", &[], &params(2, 4)).unwrap();
        assert_eq!(result.final_equity, 100_000.0);
        assert_eq!(result.total_return_pct, 0.0);
        assert!(result.trades.is_empty());
    }

    #[test]
    fn test_single_round_trip() {
        let opens = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 9.0];
        let closes = [10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 9.0, 8.0];
        let result =
            run_sma_crossover("TEST", "2024-01-01", "2024-01-10", &bars(&opens, &closes), &params(2, 4))
                .unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_date, "2024-01-06");
        assert_eq!(trade.exit_date, "2024-01-09");
        assert_eq!(trade.entry_price, 10.0);
        assert_eq!(trade.exit_price, 13.0);
        assert!((trade.pnl - 30_000.0).abs() < 1e-6);
        assert!((result.final_equity - 130_000.0).abs() < 1e-6);
        assert!((result.total_return_pct - 30.0).abs() < 1e-9);
        assert_eq!(result.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_losing_trade_sets_drawdown() {
        let opens = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 8.0, 8.0];
        let closes = [10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0, 9.0, 8.0];
        let result =
            run_sma_crossover("TEST", "a", "b", &bars(&opens, &closes), &params(2, 4)).unwrap();
        assert!((result.final_equity - 80_000.0).abs() < 1e-6);
        assert!((result.max_drawdown_pct + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_position_at_end_is_not_closed() {
        let opens = [10.0, 10.0, 10.0, 10.0, 10.0, 11.0];
        let closes = [10.0, 10.0, 10.0, 10.0, 10.0, 11.0];
        let result =
            run_sma_crossover("TEST", "a", "b", &bars(&opens, &closes), &params(2, 4)).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.final_equity, 100_000.0);
    }

    #[test]
    fn test_invalid_windows_rejected() {
        assert!(params(4, 2).validate().is_err());
        assert!(params(0, 2).validate().is_err());
        assert!(params(2, 2).validate().is_err());
        assert!(params(2, 4).validate().is_ok());
    }

    #[test]
    fn test_parse_bound() {
        let start = parse_bound("2024-01-02", false).unwrap();
        let end = parse_bound("2024-01-02", true).unwrap();
        assert_eq!(end - start, Duration::seconds(86_399));
        assert!(parse_bound("2024-01-02T10:00:00Z", false).is_ok());
        assert!(parse_bound("yesterday", false).is_err());
    }
}
