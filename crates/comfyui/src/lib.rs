//! ComfyUI execution-engine integration.
//!
//! Provides typed message parsing, the event normalizer and progress
//! tracker that turn the engine's per-node event stream into one overall
//! percentage, the REST and WebSocket clients, the [`engine::Engine`]
//! abstraction with its ComfyUI implementation, and the artifact collector
//! that reads emitted media files from the final output map.

pub mod api;
pub mod client;
pub mod engine;
pub mod messages;
pub mod normalizer;
pub mod outputs;
pub mod processor;
pub mod tracker;
