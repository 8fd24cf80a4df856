//! Equity curve and summary statistics from daily realized PnL.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::persistence::models::PnlRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: String,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    /// `None` when dates do not parse or the result is not finite
    pub cagr_pct: Option<f64>,
    /// Non-positive: worst (equity - peak) / peak, in percent
    pub max_drawdown_pct: f64,
    pub equity_curve: Vec<EquityPoint>,
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn cagr_pct(start: &str, end: &str, initial: f64, final_equity: f64) -> Option<f64> {
    let days = (parse_date(end)? - parse_date(start)?).num_days().max(1);
    let years = days as f64 / 365.25;
    let cagr = ((final_equity / initial).powf(1.0 / years) - 1.0) * 100.0;
    cagr.is_finite().then_some(cagr)
}

/// Accumulate `realized` per day onto `initial_equity`. Unrealized is ignored.
pub fn build_equity_from_pnl(rows: &[PnlRecord], initial_equity: f64) -> PerformanceSummary {
    let mut sorted: Vec<&PnlRecord> = rows.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date));

    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return PerformanceSummary {
            start_date: None,
            end_date: None,
            initial_equity,
            final_equity: initial_equity,
            total_return_pct: 0.0,
            cagr_pct: None,
            max_drawdown_pct: 0.0,
            equity_curve: Vec::new(),
        };
    };

    let mut equity = initial_equity;
    let mut peak = initial_equity;
    let mut max_dd_pct: f64 = 0.0;
    let mut equity_curve = Vec::with_capacity(sorted.len());

    for row in &sorted {
        equity += row.realized;
        equity_curve.push(EquityPoint {
            date: row.date.clone(),
            equity,
        });
        peak = peak.max(equity);
        let drawdown = if peak > 0.0 {
            (equity - peak) / peak
        } else {
            0.0
        };
        max_dd_pct = max_dd_pct.min(drawdown * 100.0);
    }

    PerformanceSummary {
        start_date: Some(first.date.clone()),
        end_date: Some(last.date.clone()),
        initial_equity,
        final_equity: equity,
        total_return_pct: (equity / initial_equity - 1.0) * 100.0,
        cagr_pct: cagr_pct(&first.date, &last.date, initial_equity, equity),
        max_drawdown_pct: max_dd_pct,
        equity_curve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(date: &str, realized: f64) -> PnlRecord {
        PnlRecord {
            id: 0,
            date: date.to_string(),
            realized,
            unrealized: 999.0,
        }
    }

    #[test]
    fn test_empty_series() {
        let summary = build_equity_from_pnl(&[], 100_000.0);
        assert_eq!(summary.final_equity, 100_000.0);
        assert!(summary.cagr_pct.is_none());
        assert!(summary.equity_curve.is_empty());
    }

    #[test]
    fn test_equity_curve_and_drawdown() {
        let rows = vec![
            row("2024-01-03", -300.0),
            row("2024-01-01", 1000.0),
            row("2024-01-02", -500.0),
        ];
        let summary = build_equity_from_pnl(&rows, 10_000.0);

        let equities: Vec<f64> = summary.equity_curve.iter().map(|p| p.equity).collect();
        assert_eq!(equities, vec![11_000.0, 10_500.0, 10_200.0]);
        assert_eq!(summary.start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(summary.final_equity, 10_200.0);
        assert!((summary.max_drawdown_pct - (-800.0 / 11_000.0 * 100.0)).abs() < 1e-9);
        assert!((summary.total_return_pct - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cagr_over_one_year() {
        let rows = vec![row("2023-01-01", 0.0), row("2024-01-01", 10_000.0)];
        let summary = build_equity_from_pnl(&rows, 100_000.0);
        let cagr = summary.cagr_pct.unwrap();
        // 365 days is slightly under 365.25
        assert!((cagr - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_single_day_uses_one_day_span() {
        let summary = build_equity_from_pnl(&[row("2024-01-01", 0.0)], 100.0);
        assert_eq!(summary.cagr_pct, Some(0.0));
    }

    #[test]
    fn test_unparseable_date_gives_no_cagr() {
        let rows = vec![row("2024-01-01", 10.0), row("not-a-date", 10.0)];
        let summary = build_equity_from_pnl(&rows, 100.0);
        assert!(summary.cagr_pct.is_none());
        assert_eq!(summary.final_equity, 120.0);
    }
}
