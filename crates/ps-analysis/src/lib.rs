//! Remote vulnerability analysis for passive-scan.
//!
//! This crate owns everything between a captured exchange and the text the
//! model sends back:
//!
//! - [`AnalysisClient`] - the async boundary to a remote model, with
//!   cooperative cancellation and streamed chunk delivery
//! - [`AnalysisError`] - failure taxonomy with retry classification
//! - [`PromptBuilder`] - renders an exchange, then [`compress`]es and
//!   [`sanitize`]s it
//! - [`OpenAiClient`] - OpenAI-compatible HTTP implementation
//! - [`ScriptedClient`] - in-memory implementation for tests and dry runs
//!
//! # Example
//!
//! ```no_run
//! use ps_analysis::{AnalysisClient, AnalysisRequest, OpenAiClient, PromptBuilder};
//! use ps_core::{ApiConfig, Exchange, HttpRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), ps_analysis::AnalysisError> {
//! let client = OpenAiClient::from_config(&ApiConfig::default())?;
//! let builder = PromptBuilder::new(16 * 1024);
//! let exchange = Exchange::new(HttpRequest::new("GET", "https://h/search?q=1"), None);
//! let prompt = builder.build(&exchange);
//!
//! let text = client
//!     .analyze(
//!         AnalysisRequest::new(builder.system_prompt(), &prompt),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod client;
mod compress;
mod error;
mod mock;
mod openai;
mod prompt;
mod sanitize;

pub use client::{AnalysisClient, AnalysisRequest, ChunkSink};
pub use compress::compress;
pub use error::AnalysisError;
pub use mock::ScriptedClient;
pub use openai::OpenAiClient;
pub use prompt::{DEFAULT_SYSTEM_PROMPT, PromptBuilder};
pub use sanitize::sanitize;
