//! # Rivulet
//!
//! A retry-aware, rate-limited chunk download scheduler for adaptive media
//! players. It decides which pending media chunk to fetch next, bounds how
//! many fetches run at once, throttles the dispatch rate and retries
//! transient failures.
//!
//! ## Features
//!
//! - Pending requests ordered on the media timeline
//! - Four selection strategies driven by the playback position
//! - Sliding-window rate limiting with computed dispatch delays
//! - Bounded retries with backoff and per-attempt timeouts
//! - Single-owner actor with a backpressure-aware handle
//!
//! ## Authors
//!
//! - hua0512
//!

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod index;
pub mod metrics;
pub mod rate;
pub mod request;
pub mod retry;
pub mod scheduler;
pub mod strategy;

pub use config::{SchedulerConfig, SharedConfig};
pub use error::{Result, SchedulerError};
pub use events::{DownloadEvent, SeekCompleted};
pub use fetcher::{ChunkFetcher, FixedPosition, PlaybackPosition};
pub use index::OrderedRequestIndex;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use rate::RateMonitor;
pub use request::{
    ChunkTimestamp, DownloadRequest, RequestId, RequestState, SchedulableRequest, TrackId,
};
pub use retry::{Dispatch, FetchOutcome, RequestQueue, RetryScheduler};
pub use scheduler::{
    ActorOutcome, ChunkDownloadScheduler, ChunkSchedulerBuilder, ChunkSchedulerHandle,
    SchedulerStats,
};
pub use strategy::{ChunkDownloadStrategy, LOOKBEHIND};
