//! Applying a merge plan (or human-resolved records) to the live database.

use serde::Serialize;
use tracing::{debug, warn};

use crate::bib::record::{BibDatabase, BibRecord, ENTRY_TYPE_FIELD};
use crate::merge::planner::MergePlan;

/// What an application pass actually did, for reporting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ApplyStats {
    pub new_entries: usize,
    pub patched_entries: usize,
    pub deleted_entries: usize,
    /// Patches whose target key was already gone from the live database.
    pub skipped_patches: usize,
}

/// Stateless applier; mutates the caller-owned live database in place.
pub struct MergeApplier;

impl MergeApplier {
    /// Apply the safe plan. Best-effort by contract: never fails.
    ///
    /// A patch whose key is missing from the live database means local
    /// already resolved that divergence by deleting the record; the patch is
    /// skipped, with a log event per skip.
    pub fn apply_auto_plan(db: &mut BibDatabase, plan: &MergePlan) -> ApplyStats {
        let mut stats = ApplyStats::default();

        for entry in &plan.new_entries {
            debug!(citation_key = entry.citation_key(), "inserting new entry");
            db.insert(entry.clone());
            stats.new_entries += 1;
        }

        for (key, patch) in &plan.field_patches {
            let Some(record) = db.get_mut(key) else {
                warn!(
                    citation_key = %key,
                    "patch target missing from live database, skipping"
                );
                stats.skipped_patches += 1;
                continue;
            };
            for (field, value) in patch {
                if field.as_str() == ENTRY_TYPE_FIELD {
                    if let Some(entry_type) = value {
                        record.set_entry_type(entry_type.clone());
                    }
                } else {
                    match value {
                        Some(v) => record.set_field(field.clone(), v.clone()),
                        None => record.clear_field(field),
                    }
                }
            }
            stats.patched_entries += 1;
        }

        for key in &plan.deleted_entry_keys {
            if db.remove(key).is_some() {
                debug!(citation_key = %key, "removed entry");
                stats.deleted_entries += 1;
            }
        }

        stats
    }

    /// Apply human-resolved records.
    ///
    /// Contract: each record is a complete final record, not a partial
    /// field-level decision. An existing key is replaced wholesale (type
    /// overwritten, stale fields cleared, all resolved fields set); an
    /// unknown key is inserted as new.
    pub fn apply_resolved(db: &mut BibDatabase, resolved: Vec<BibRecord>) {
        for record in resolved {
            if record.citation_key().is_empty() {
                warn!("skipping resolved record without citation key");
                continue;
            }
            let key = record.citation_key().to_string();
            match db.get_mut(&key) {
                Some(live) => {
                    live.set_entry_type(record.entry_type());
                    let stale: Vec<String> = live
                        .field_names()
                        .filter(|name| record.field(name).is_none())
                        .map(str::to_string)
                        .collect();
                    for name in stale {
                        live.clear_field(&name);
                    }
                    for (name, value) in record.fields() {
                        live.set_field(name.clone(), value.clone());
                    }
                    debug!(citation_key = %key, "replaced entry with resolved record");
                }
                None => {
                    debug!(citation_key = %key, "inserting resolved record as new");
                    db.insert(record);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bib::snapshot::DatabaseSnapshot;
    use crate::merge::planner::MergePlanner;

    fn db_of(text: &str) -> BibDatabase {
        BibDatabase::from_records(crate::bib::codec::parse(text).unwrap())
    }

    fn plan_of(base: &str, local: &str, remote: &str) -> MergePlan {
        let base = DatabaseSnapshot::parse(Some(base)).unwrap();
        let local = DatabaseSnapshot::parse(Some(local)).unwrap();
        let remote = DatabaseSnapshot::parse(Some(remote)).unwrap();
        MergePlanner::plan(&base, &local, &remote).0
    }

    #[test]
    fn test_apply_patch_updates_field() {
        let base = "@article{k1, year = {2020},}";
        let plan = plan_of(base, base, "@article{k1, year = {2021},}");
        let mut db = db_of(base);
        let stats = MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(stats.patched_entries, 1);
        assert_eq!(db.get("k1").unwrap().field("year"), Some("2021"));
    }

    #[test]
    fn test_apply_inserts_new_entries() {
        let plan = plan_of("", "", "@article{k3, author = {remote},}");
        let mut db = db_of("");
        let stats = MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(stats.new_entries, 1);
        assert_eq!(db.get("k3").unwrap().field("author"), Some("remote"));
    }

    #[test]
    fn test_apply_removes_deleted_entries() {
        let base = "@article{k4, author = {base},}";
        let plan = plan_of(base, base, "");
        let mut db = db_of(base);
        let stats = MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(stats.deleted_entries, 1);
        assert!(db.get("k4").is_none());
    }

    #[test]
    fn test_apply_clear_patch_removes_field() {
        let base = "@article{a, author = {base}, year = {2020},}";
        let plan = plan_of(base, base, "@article{a, year = {2020},}");
        let mut db = db_of(base);
        MergeApplier::apply_auto_plan(&mut db, &plan);
        let record = db.get("a").unwrap();
        assert_eq!(record.field("author"), None);
        assert_eq!(record.field("year"), Some("2020"));
    }

    #[test]
    fn test_apply_entry_type_patch() {
        let base = "@article{a, author = {base},}";
        let plan = plan_of(base, base, "@book{a, author = {base},}");
        let mut db = db_of(base);
        MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(db.get("a").unwrap().entry_type(), "book");
    }

    #[test]
    fn test_missing_patch_target_skipped_silently() {
        let base = "@article{a, year = {2020},}";
        let plan = plan_of(base, base, "@article{a, year = {2021},}");
        // Live database no longer has the entry at all.
        let mut db = db_of("@article{other,}");
        let stats = MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(stats.skipped_patches, 1);
        assert_eq!(stats.patched_entries, 0);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_delete_of_already_missing_key_is_noop() {
        let base = "@article{k4, author = {base},}";
        let plan = plan_of(base, base, "");
        let mut db = db_of("");
        let stats = MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(stats.deleted_entries, 0);
    }

    #[test]
    fn test_resolved_record_replaces_existing() {
        let mut db = db_of("@article{a, author = {local}, note = {keep-me-not},}");
        let resolved = BibRecord::new("book", "a").with_field("author", "agreed");
        MergeApplier::apply_resolved(&mut db, vec![resolved]);

        let record = db.get("a").unwrap();
        assert_eq!(record.entry_type(), "book");
        assert_eq!(record.field("author"), Some("agreed"));
        // Field absent from the resolved record is cleared.
        assert_eq!(record.field("note"), None);
    }

    #[test]
    fn test_resolved_record_with_unknown_key_inserted() {
        let mut db = db_of("");
        let resolved = BibRecord::new("article", "fresh").with_field("year", "2030");
        MergeApplier::apply_resolved(&mut db, vec![resolved]);
        assert_eq!(db.get("fresh").unwrap().field("year"), Some("2030"));
    }

    #[test]
    fn test_remote_year_bump_end_to_end() {
        // base K1{year: 2020}; remote K1{year: 2021}; local unchanged.
        let base = "@article{K1, year = {2020},}";
        let plan = plan_of(base, base, "@article{K1, year = {2021},}");
        assert_eq!(
            plan.field_patches.get("K1").unwrap().get("year"),
            Some(&Some("2021".to_string()))
        );
        let mut db = db_of(base);
        MergeApplier::apply_auto_plan(&mut db, &plan);
        assert_eq!(db.get("K1").unwrap().field("year"), Some("2021"));
    }
}
