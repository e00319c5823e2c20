//! bibsync core library.
//!
//! This crate provides the components for semantically merging a
//! git-versioned BibTeX library: revision location, per-commit content
//! retrieval, the BibTeX codec, field-level three-way merge planning and
//! application, atomic file writing, and commit bookkeeping.

pub mod bib;
pub mod config;
pub mod engine;
pub mod errors;
pub mod git;
pub mod merge;

// Re-exports for convenience.
pub use bib::{BibDatabase, BibRecord, DatabaseSnapshot};
pub use config::AppConfig;
pub use engine::{MergeAnalysis, MergeEngine, PullReport};
pub use errors::MergeError;
pub use merge::{ConflictResolver, FieldConflict, MergePlan};
