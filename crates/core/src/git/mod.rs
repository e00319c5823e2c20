//! Git-facing side of the engine: revision location, per-commit file
//! reading, and merge bookkeeping.

pub mod bookkeeper;
pub mod locator;
pub mod reader;

pub use bookkeeper::{BookkeepingResult, MergeBookkeeper};
pub use locator::{is_ancestor, CommitId, RevisionLocator, RevisionTriple};
