//! Semantic merge subsystem: planning, application, resolution, and the
//! working-file writer.

pub mod applier;
pub mod planner;
pub mod resolver;
pub mod writer;

pub use applier::{ApplyStats, MergeApplier};
pub use planner::{FieldConflict, FieldPatch, MergePlan, MergePlanner};
pub use resolver::{ConflictResolver, DeclineResolver};
pub use writer::ContentWriter;
