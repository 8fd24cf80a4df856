pub mod broker_adapter;
