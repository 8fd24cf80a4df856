pub mod alpaca_client;
pub mod alpaca_market_data;
pub mod broker_factory;
pub mod moomoo;
pub mod openai_client;
pub mod paper_broker;
