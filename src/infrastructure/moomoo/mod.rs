//! Moomoo / futu brokerage through the OpenD gateway.

pub mod broker;
pub mod opend;

pub use broker::{MoomooBroker, MoomooConfig, TrdEnv, TrdMarket};
