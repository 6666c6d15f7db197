//! `flagcache` is a deterministic feature-flag evaluation engine paired with
//! a dedicated two-tier cache.
//!
//! # Overview
//!
//! [`evaluate`](eval::evaluate) is the heart of the crate: a pure function
//! mapping an [`EvaluationContext`] and a [`FlagDefinition`](flags::FlagDefinition)
//! to an [`EvaluationResult`](eval::EvaluationResult). It never touches the
//! cache, never performs I/O, and always produces a result for well-formed
//! input. Bucketing is deterministic ([`sharder`]), so repeated evaluations
//! of the same identity agree across calls and across process restarts.
//!
//! [`CacheRepository`](cache::CacheRepository) caches scope snapshots and
//! evaluation results, keyed by a content hash of the flag
//! ([`flag_signature`](signature::flag_signature)) and of the normalized
//! context, so definition edits orphan stale entries instead of requiring a
//! purge. It speaks to a remote key-value store through
//! [`RespClient`](wire::RespClient), a minimal hand-rolled wire-protocol
//! client, and degrades permanently to an in-process store on the first
//! transport failure. Cache unavailability costs latency, never correctness.
//!
//! [`InvalidationCoordinator`](invalidation::InvalidationCoordinator) is the
//! hook mutation entry points call after a successful persistence commit: it
//! clears the affected scope(s) and publishes a best-effort broadcast.
//!
//! [`Evaluator`](evaluator::Evaluator) glues a [`FlagSource`](flags::FlagSource)
//! (the persistence seam) and a cache together into a cache-aside evaluation
//! entry point for request handlers.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod flags;
pub mod invalidation;
pub mod sharder;
pub mod signature;
pub mod wire;

pub use cache::{CacheRepository, Clock, EvaluationKey, RemoteStore, Scope, Snapshot, SystemClock};
pub use config::{CacheConfig, ConnectionConfig};
pub use context::EvaluationContext;
pub use error::{EncodingError, TransportError};
pub use eval::{evaluate, EvaluationResult};
pub use evaluator::Evaluator;
pub use flags::{FlagDefinition, FlagSource, MatchClause, Rule, Timestamp, Variant};
pub use invalidation::{InvalidationCoordinator, InvalidationMessage};
pub use sharder::{bucket, Md5Sharder, Sharder};
pub use signature::flag_signature;
pub use wire::{Reply, RespClient};
