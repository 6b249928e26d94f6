pub mod api;
pub mod audit;
pub mod config;
pub mod flags;
pub mod metrics;
pub mod router;
pub mod server;
pub mod test_utils;
