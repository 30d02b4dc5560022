//! API Module
//!
//! HTTP front of the cache layer: management routes under the configured
//! prefix, health and Prometheus endpoints, and a fallback that serves
//! every other request through the cache.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
