//! API layer - HTTP endpoint handlers.

mod dispatch;
mod health;
mod metrics;
mod routes;

pub use dispatch::{dispatch, slugify_topic, DispatchHttpRequest, SlugifyRequest, SlugifyResponse};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
