pub mod handlers;
pub mod poller;
pub mod routes;
pub mod services;
pub mod state;
