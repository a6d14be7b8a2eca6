//! Mail Triage — zero-shot email intent classification and MIME body extraction.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extract;
