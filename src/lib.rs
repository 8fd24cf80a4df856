//! Signal Trader
//!
//! Turns free-text trading posts into risk-checked orders routed to a paper
//! ledger, Alpaca or Moomoo OpenD, with SMA backtests and performance stats
//! over the stored history.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;
