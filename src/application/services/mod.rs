pub mod credential_store;
pub mod order_reconciler;
