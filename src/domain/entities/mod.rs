pub mod market_bar;
pub mod order;
pub mod position;
pub mod signal;
