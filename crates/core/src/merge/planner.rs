//! Field-granularity three-way merge planning.
//!
//! The planner diffs the base snapshot against local and remote and splits
//! the outcome into a [`MergePlan`] of safe changes and a set of
//! [`FieldConflict`]s excluded from the plan because both sides diverged
//! independently. It never looks at the serialized text as a whole, which is
//! what lets independently edited fields on the same record converge without
//! a textual conflict marker.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::bib::record::{BibRecord, ENTRY_TYPE_FIELD};
use crate::bib::snapshot::DatabaseSnapshot;

/// Per-entry field instructions; a `None` value means "clear this field".
pub type FieldPatch = BTreeMap<String, Option<String>>;

/// The safe, automatically applicable part of a merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergePlan {
    /// Entries present only in remote; always safe to add.
    pub new_entries: Vec<BibRecord>,
    /// Safe per-field changes, keyed by citation key.
    pub field_patches: BTreeMap<String, FieldPatch>,
    /// Entries remote removed and local left untouched.
    pub deleted_entry_keys: BTreeSet<String>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.new_entries.is_empty()
            && self.field_patches.is_empty()
            && self.deleted_entry_keys.is_empty()
    }
}

/// One field both sides changed to different values, with all three
/// revisions of the value. Entry-type divergence is reported under the
/// pseudo-field [`ENTRY_TYPE_FIELD`]; a deleting side is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    pub citation_key: String,
    pub field: String,
    pub base: Option<String>,
    pub local: Option<String>,
    pub remote: Option<String>,
}

/// Stateless three-way merge planner.
pub struct MergePlanner;

impl MergePlanner {
    /// Compute the merge plan and conflict set for one revision triple.
    ///
    /// Invariant: a field lands in `field_patches` only if remote changed it
    /// relative to base and local did not independently change it to
    /// something else; the plan and the conflict set are disjoint.
    pub fn plan(
        base: &DatabaseSnapshot,
        local: &DatabaseSnapshot,
        remote: &DatabaseSnapshot,
    ) -> (MergePlan, Vec<FieldConflict>) {
        let keys: BTreeSet<&str> = base
            .keys()
            .chain(local.keys())
            .chain(remote.keys())
            .collect();
        info!(entries = keys.len(), "planning three-way merge");

        let mut plan = MergePlan::default();
        let mut conflicts = Vec::new();

        for key in keys {
            match (base.get(key), local.get(key), remote.get(key)) {
                // Added on remote only: always safe.
                (None, None, Some(r)) => {
                    debug!(citation_key = key, "new remote entry");
                    plan.new_entries.push(r.clone());
                }

                // Added on local only, or deleted everywhere: nothing to do.
                // Key renames fall out here as a local delete plus add.
                (None, Some(_), None) | (Some(_), None, None) | (None, None, None) => {}

                // Both sides added the same key: three-way diff against an
                // empty base entry.
                (None, Some(l), Some(r)) => {
                    diff_fields(key, None, Some(l), Some(r), &mut plan, &mut conflicts);
                }

                // Remote deleted the entry.
                (Some(b), Some(l), None) => {
                    if b == l {
                        debug!(citation_key = key, "remote deleted unmodified entry");
                        plan.deleted_entry_keys.insert(key.to_string());
                    } else {
                        // Local modified what remote deleted: every local
                        // edit becomes a conflict, and no delete is planned.
                        push_side_conflicts(key, b, l, SideKept::Local, &mut conflicts);
                    }
                }

                // Local deleted the entry.
                (Some(b), None, Some(r)) => {
                    if b != r {
                        // Remote modified what local deleted.
                        push_side_conflicts(key, b, r, SideKept::Remote, &mut conflicts);
                    }
                    // Remote unchanged: local's deletion stands.
                }

                // Present everywhere: the regular field-level three-way.
                (Some(b), Some(l), Some(r)) => {
                    diff_fields(key, Some(b), Some(l), Some(r), &mut plan, &mut conflicts);
                }
            }
        }

        info!(
            new_entries = plan.new_entries.len(),
            patched_entries = plan.field_patches.len(),
            deleted_entries = plan.deleted_entry_keys.len(),
            conflicts = conflicts.len(),
            "merge plan computed"
        );
        (plan, conflicts)
    }
}

enum SideKept {
    Local,
    Remote,
}

/// Field-level three-way diff for one entry present (at least) on both
/// surviving sides. The entry type participates as a pseudo-field.
fn diff_fields(
    key: &str,
    base: Option<&BibRecord>,
    local: Option<&BibRecord>,
    remote: Option<&BibRecord>,
    plan: &mut MergePlan,
    conflicts: &mut Vec<FieldConflict>,
) {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.insert(ENTRY_TYPE_FIELD);
    for record in [base, local, remote].into_iter().flatten() {
        names.extend(record.field_names());
    }

    let mut patch = FieldPatch::new();
    for name in names {
        let b = value_of(base, name);
        let l = value_of(local, name);
        let r = value_of(remote, name);

        if r == b {
            // Local's state stands, whether it changed the field or not.
            continue;
        }
        if l == b {
            // Only remote touched it: safe to take (set or clear).
            patch.insert(name.to_string(), r.map(str::to_string));
        } else if l != r {
            conflicts.push(FieldConflict {
                citation_key: key.to_string(),
                field: name.to_string(),
                base: b.map(str::to_string),
                local: l.map(str::to_string),
                remote: r.map(str::to_string),
            });
        }
        // l == r: both sides converged on the same value already.
    }

    if !patch.is_empty() {
        plan.field_patches.insert(key.to_string(), patch);
    }
}

/// Conflicts for an entry one side deleted and the other side modified:
/// one conflict per changed field, with the deleting side's value `None`.
fn push_side_conflicts(
    key: &str,
    base: &BibRecord,
    kept: &BibRecord,
    side: SideKept,
    conflicts: &mut Vec<FieldConflict>,
) {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.insert(ENTRY_TYPE_FIELD);
    names.extend(base.field_names());
    names.extend(kept.field_names());

    for name in names {
        let b = value_of(Some(base), name);
        let k = value_of(Some(kept), name);
        if b == k {
            continue;
        }
        let (local, remote) = match side {
            SideKept::Local => (k.map(str::to_string), None),
            SideKept::Remote => (None, k.map(str::to_string)),
        };
        conflicts.push(FieldConflict {
            citation_key: key.to_string(),
            field: name.to_string(),
            base: b.map(str::to_string),
            local,
            remote,
        });
    }
}

fn value_of<'a>(record: Option<&'a BibRecord>, name: &str) -> Option<&'a str> {
    let record = record?;
    if name == ENTRY_TYPE_FIELD {
        Some(record.entry_type())
    } else {
        record.field(name)
    }
}
