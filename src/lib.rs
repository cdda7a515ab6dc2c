//! # reconmap - Scan Orchestration Engine
//!
//! reconmap runs a selection of pluggable reconnaissance modules against one
//! target. Modules run concurrently under a shared rate budget and per-module
//! time budgets; their outcomes are merged, in module start order, into a
//! single [`ScanResult`](aggregator::ScanResult). A module that fails, panics
//! or times out never takes its siblings down with it.
//!
//! ## Features
//!
//! - **Target resolution**: canonical, syntactically checked domains and IPs
//! - **Shared rate limiting**: one token bucket across every concurrent module
//! - **Module isolation**: each module in its own task with a time budget,
//!   cooperative cancellation and a grace period
//! - **Result cache**: TTL cache for cacheable modules keyed by target,
//!   module and options
//! - **Aggregation**: overall `success`, `partial` or `error` status
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reconmap::cache::ResultCache;
//! use reconmap::modules;
//! use reconmap::orchestrator::{Orchestrator, ScanRequest};
//! use reconmap::rate_limit::RateLimiter;
//! use reconmap::registry::{ModuleRegistry, Selection};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ModuleRegistry::new();
//!     modules::register_builtin(&mut registry)?;
//!
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(registry),
//!         Arc::new(RateLimiter::standard()?),
//!         Arc::new(ResultCache::new()),
//!     )?;
//!
//!     let result = orchestrator
//!         .scan(ScanRequest::new("example.com", Selection::All))
//!         .await?;
//!     println!("{}: {}", result.target(), result.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`target`]: target resolution and canonicalization
//! - [`module`]: the module contract, execution context and outcomes
//! - [`registry`]: module registration and selection
//! - [`rate_limit`]: shared token bucket
//! - [`cache`]: TTL result cache
//! - [`orchestrator`]: scan lifecycle, supervision and cancellation
//! - [`aggregator`]: outcome merging and overall status
//! - [`modules`]: reference modules shipped with the binary
//! - [`config`], [`config_file`]: layered configuration
//! - [`logging`], [`metrics`], [`shutdown`]: ambient tooling
//! - [`validation`], [`error`], [`constants`]

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod config_file;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod module;
pub mod modules;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod shutdown;
pub mod target;
pub mod validation;
