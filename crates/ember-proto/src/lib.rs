//! Shared building blocks for the ember terminal client: catalog model,
//! configuration, platform paths, durable store, and the catalog HTTP client.

pub mod client;
pub mod config;
pub mod model;
pub mod platform;
pub mod store;
