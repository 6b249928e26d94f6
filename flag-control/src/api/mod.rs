pub mod admin_rate_limiter;
pub mod auth;
pub mod endpoint;
pub mod errors;
pub mod pipeline;
pub mod types;
