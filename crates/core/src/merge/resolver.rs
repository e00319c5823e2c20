//! The conflict-resolution seam.
//!
//! How conflicts turn into resolved records is owned entirely by the caller
//! (typically an interactive three-pane diff). The engine only fixes the
//! contract: a resolver either returns complete final records for every
//! conflicted entry, or declines, in which case the merge aborts before the
//! working file is touched.

use crate::bib::record::BibRecord;
use crate::merge::planner::{FieldConflict, MergePlan};

/// Decides what to do with conflicts the planner could not auto-merge.
pub trait ConflictResolver {
    /// Return complete final records for the conflicted entries, or `None`
    /// to leave the conflicts unresolved.
    fn resolve(&self, plan: &MergePlan, conflicts: &[FieldConflict]) -> Option<Vec<BibRecord>>;
}

/// Resolver for non-interactive callers: always declines, so any conflict
/// aborts the merge.
pub struct DeclineResolver;

impl ConflictResolver for DeclineResolver {
    fn resolve(&self, _plan: &MergePlan, _conflicts: &[FieldConflict]) -> Option<Vec<BibRecord>> {
        None
    }
}
