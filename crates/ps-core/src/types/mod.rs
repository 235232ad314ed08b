//! Domain types for the passive-scan pipeline.
//!
//! # Module Organization
//!
//! - [`exchange`] - Captured request/response pairs and the dedup key
//! - [`result`] - Per-exchange scan records and their lifecycle
//! - [`risk`] - Severity levels and text classification
//! - [`status`] - Scan lifecycle status
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use ps_core::{Exchange, RiskLevel, ScanResult, ScanStatus};
//! ```

mod exchange;
mod result;
mod risk;
mod status;

pub use exchange::{
    Exchange, Header, HttpRequest, HttpResponse, REQUEST_MARKER, RESPONSE_MARKER, dedup_key,
};
pub use result::{ScanId, ScanResult};
pub use risk::{NegationPattern, RiskLevel, RiskRules};
pub use status::ScanStatus;
