//! HTTP API handlers
//!
//! Thin surface over the [`Pipeline`](crate::pipeline::Pipeline): event
//! submission, the live verdict stream, session queries and health.

pub mod events;
pub mod health;
pub mod sessions;
pub mod sse;

pub use events::event_routes;
pub use health::health_routes;
pub use sessions::session_routes;
pub use sse::verdict_stream;
