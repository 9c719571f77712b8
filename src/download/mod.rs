//! PDF acquisition (stage P3): streaming fetches, landing-page extraction,
//! and the candidate waterfall.
//!
//! # Overview
//!
//! - [`PdfFetcher`] - streaming HTTP client with PDF validation
//! - [`extract_pdf_url`] - landing-page PDF link extraction
//! - [`DownloadManager`] - the per-publication waterfall with a global
//!   concurrency bound and full attempt history
//! - [`DownloadError`] - failure taxonomy for single fetches

mod client;
mod error;
mod landing;
mod waterfall;

pub use client::{BROWSER_USER_AGENT, FetchedHtml, FetchedPdf, PdfFetcher};
pub use error::DownloadError;
pub use landing::extract_pdf_url;
pub use waterfall::{AttemptRecord, AttemptStatus, DownloadManager, DownloadResult};
