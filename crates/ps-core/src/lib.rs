//! Core types, errors, and configuration for the passive-scan pipeline.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - Error types for configuration and result lifecycle failures
//! - Configuration structures ([`Config`] and its sections)
//! - Domain types ([`Exchange`], [`ScanResult`], [`ScanStatus`], [`RiskLevel`])
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    API_KEY_ENV, ApiConfig, Config, FilterConfig, MAX_THREADS, MIN_THREADS, ScanConfig,
};
pub use error::{ConfigError, TransitionError};
pub use types::{
    Exchange, Header, HttpRequest, HttpResponse, NegationPattern, REQUEST_MARKER, RESPONSE_MARKER,
    RiskLevel, RiskRules, ScanId, ScanResult, ScanStatus, dedup_key,
};

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;
