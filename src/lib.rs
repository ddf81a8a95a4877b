//! # rusts2ag
//!
//! Semantic Scholar Academic Graph harvesting and enrichment pipeline.
//!
//! ## Modules
//!
//! - [`harvest`] - Token-paged bulk search with raw page persistence
//! - [`ledger`] - Per-mode and unified harvest ledgers
//! - [`table`] - CSV projection and the string-typed [`table::Dataset`]
//! - [`enrich`] - Paper/author batch and references enrichment
//! - [`derive`] - DOI normalization, page counts, cited-year and h-index fields
//! - [`export`] - Fixed-schema spreadsheet export
//! - [`download`] - Concurrent open-access PDF downloader
//! - [`retry`] - Retry policy object and sleeper seam
//! - [`transport`] - HTTP transport seam
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rusts2ag::config::{EnrichParams, OutputLayout};
//! use rusts2ag::retry::TokioSleeper;
//! use rusts2ag::transport::ReqwestTransport;
//! use rusts2ag::{enrich, export, table};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let layout = OutputLayout::new(".");
//!     layout.ensure()?;
//!     let params = EnrichParams::load(None)?;
//!     let transport = ReqwestTransport::new(params.s2.timeout())?;
//!     let dataset = table::load_input(&layout.csv)?;
//!     let enriched = enrich::enrich_extract(dataset, &params, &layout, &transport, &TokioSleeper).await?;
//!     export::export_extracted(&enriched, &layout.csv)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod derive;
pub mod download;
pub mod enrich;
pub mod error;
pub mod export;
pub mod harvest;
pub mod ledger;
pub mod logging;
pub mod provenance;
pub mod retry;
pub mod s2;
pub mod table;
pub mod transport;

pub use error::{Result, S2agError};
