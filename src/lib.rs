pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod notification;
pub mod resolver;
pub mod retry;
pub mod server;
pub mod telemetry;
