/// Castlight - live stream overlay server
///
/// Ingests real-time events from two streaming platforms, normalizes
/// them into a canonical taxonomy, aggregates them into flat-file JSON
/// documents and pushes them to browser overlay widgets over WebSocket.
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod jobs;
pub mod normalize;
pub mod notify;
pub mod server;
pub mod session;
pub mod source;
pub mod store;
