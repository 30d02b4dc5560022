//! Tiered Response Cache
//!
//! An adaptive response cache for file-processing web services. Responses
//! are cached across three tiers of increasing capacity and latency, with
//! per-category strategies and a feedback loop that tunes caching from
//! live request telemetry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                      API Server (axum) / with_caching                        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Request      │  │    Strategy     │  │      Telemetry              │  │
//! │  │   Classifier    │──│     Router      │  │      Collector              │  │
//! │  └─────────────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │                                │                         │                   │
//! │                    ┌───────────┴───────────┐   ┌─────────┴─────────┐        │
//! │                    │     Tiered Cache      │◄──│     Optimizer     │        │
//! │                    │  (keys, TTL policy)   │   │  (tuning knobs)   │        │
//! │                    └───────────┬───────────┘   └───────────────────┘        │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                             Tiers                                            │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │     Memory      │  │      Edge       │  │         Durable             │  │
//! │  │  (bounded LRU)  │  │   (HTTP cache)  │  │   (KV store, compressed)    │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Tiers, keys, TTL policy, invalidation and the orchestrator
//! - [`strategy`]: Request classification and per-category strategies
//! - [`telemetry`]: Request timing, sampling and aggregation
//! - [`optimizer`]: Adaptive tuning from telemetry
//! - [`service`]: The request path tying it all together
//! - [`handler`]: Handler contract and `with_caching`
//! - [`api`]: HTTP server and management endpoints
//! - [`upstream`]: Origin proxy
//! - [`config`]: Configuration
//! - [`error`]: Error types and handling

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod optimizer;
pub mod service;
pub mod strategy;
pub mod telemetry;
pub mod upstream;

// Re-export commonly used types
pub use api::{ApiServer, RestRouter};

pub use cache::{
    CacheEntry, CacheEvent, CacheKey, CacheStatsSnapshot, CacheTier, CachedPayload, EdgeCache,
    InMemoryEdgeCache, InMemoryKvStore, InvalidationReport, InvalidationScope, KeyDeriver, KvStore,
    TieredCache, TieredCacheConfig, TtlPolicy, WorkloadProfile,
};

pub use config::{CacheLayerConfig, DurableBackend, ServerConfig, ServiceConfig, UpstreamConfig};

pub use error::{Error, ErrorDisposition, Result};

pub use handler::{handler_fn, with_caching, CacheManagement, CachingHandler, Handler, WarmReport};

pub use optimizer::{OptimizationState, Optimizer, OptimizerConfig, TuningKnobs};

pub use service::{CacheService, CacheServiceBuilder, RequestOutcome};

pub use strategy::{RequestCategory, RequestClassifier, StrategyRouter};

pub use telemetry::{MetricsSink, TelemetryAggregate, TelemetryCollector, TelemetryConfig};

pub use upstream::UpstreamProxy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
