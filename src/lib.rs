//! # vstup-crawl
//!
//! A resilient crawl pipeline for Ukrainian university admission data.
//!
//! The crate walks the admission site in four sequential stages - cities,
//! universities, Master's-level offers, applications - behind a rotating
//! pool of authenticated proxies, with:
//!
//! - Failure classification and per-class backoff with jitter
//! - Randomized browser-like headers on every attempt
//! - Resumable stages that skip work already in the store
//! - Progress and request-log events for an embedding UI
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use vstup_crawl::{
//!     Crawler, CrawlerConfig, CrawlStore, NullObserver, ProxyPool, RetryClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut rng = rand::thread_rng();
//!     let pool = Arc::new(ProxyPool::from_file("proxies.txt", &mut rng)?);
//!     let gateway = Arc::new(RetryClient::new(pool, Arc::new(NullObserver)));
//!
//!     let mut crawler = Crawler::new(CrawlerConfig::new(), gateway, CrawlStore::in_memory());
//!     crawler.run(&CancellationToken::new()).await?;
//!
//!     println!("{:?}", crawler.progress());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod crawler;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod gateway;
pub mod model;
pub mod progress;
pub mod proxy;
pub mod stealth;
pub mod store;

pub use client::RetryClient;
pub use config::CrawlerConfig;
pub use crawler::Crawler;
pub use error::{CrawlError, FailureKind, Result};
pub use events::{
    CrawlObserver, NullObserver, ProgressSnapshot, RequestKind, RequestLogEntry, RequestStatus,
    TracingObserver,
};
pub use gateway::{HttpGateway, RawResponse};
pub use model::{Application, City, Offer, Person, University};
pub use progress::ProgressTracker;
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use store::{CrawlStore, EntityStore, MemoryStore};
