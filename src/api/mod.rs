//! Clients for the booth backend: HTTP API and server-sent event stream.

pub mod events;
pub mod http;

pub use events::{EndedSignal, EventChannel, SseHandle};
pub use http::{ApiClient, ApiError, BoothBackend};
