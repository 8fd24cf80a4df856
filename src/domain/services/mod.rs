pub mod backtest;
pub mod deduplicator;
pub mod order_router;
pub mod performance;
pub mod risk_guard;
pub mod signal_extractor;
