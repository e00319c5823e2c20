//! The merge-pull pipeline.
//!
//! [`MergeEngine`] orchestrates one merge attempt end to end:
//!
//! 1. Locate the {base, local, remote} revision triple.
//! 2. Read the library file at each revision and parse three snapshots.
//! 3. Plan a field-level three-way merge.
//! 4. Hand unresolved conflicts to the injected resolver; abort before any
//!    file mutation if it declines.
//! 5. Apply the plan (and any resolved records) to the live database parsed
//!    from the working file.
//! 6. Write the file atomically, then record the result in the commit graph.
//!
//! Everything is synchronous and blocking; callers who need a responsive UI
//! run the engine on a background worker. The engine never retries: after
//! any error the whole pipeline can be re-invoked from scratch, because no
//! persistent mutation happens before the final ref update — with the one
//! documented exception of the working file itself, signalled by
//! [`MergeError::CommittedFileUnrecorded`].

use std::path::Path;

use git2::{Repository, Signature};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::bib::codec;
use crate::bib::record::BibDatabase;
use crate::bib::snapshot::DatabaseSnapshot;
use crate::config::AppConfig;
use crate::errors::{BookkeepingError, MergeError, RepositoryStateError};
use crate::git::bookkeeper::{BookkeepingResult, MergeBookkeeper};
use crate::git::locator::{is_ancestor, RevisionLocator, RevisionTriple};
use crate::git::reader::read_at;
use crate::merge::applier::{ApplyStats, MergeApplier};
use crate::merge::planner::{FieldConflict, MergePlan, MergePlanner};
use crate::merge::resolver::{ConflictResolver, DeclineResolver};
use crate::merge::writer::ContentWriter;

/// Outcome summary of one `merge_pull` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PullReport {
    /// Local already contained everything remote has; nothing was done.
    pub up_to_date: bool,
    /// The branch ref was moved to remote without creating a commit.
    pub fast_forwarded: bool,
    /// The new commit, when one was created.
    pub commit_id: Option<String>,
    /// What the auto plan changed in the live database.
    pub stats: ApplyStats,
    /// Number of resolver-supplied records applied on top of the plan.
    pub resolved_entries: usize,
}

impl PullReport {
    fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            fast_forwarded: false,
            commit_id: None,
            stats: ApplyStats::default(),
            resolved_entries: 0,
        }
    }
}

/// Read-only view of what a merge would do, for rendering a three-pane diff.
#[derive(Debug, Clone, Serialize)]
pub struct MergeAnalysis {
    pub local: String,
    pub remote: String,
    pub base: Option<String>,
    pub up_to_date: bool,
    pub plan: MergePlan,
    pub conflicts: Vec<FieldConflict>,
}

/// The semantic merge engine for one repository.
pub struct MergeEngine {
    repo: Repository,
    config: AppConfig,
    resolver: Box<dyn ConflictResolver>,
}

impl MergeEngine {
    /// Open the configured repository. Conflicts are declined by default;
    /// interactive callers install their own resolver via
    /// [`MergeEngine::with_resolver`].
    pub fn open(config: AppConfig) -> Result<Self, MergeError> {
        let repo = Repository::open(&config.repository.path).map_err(|_| {
            RepositoryStateError::RepositoryNotFound(
                config.repository.path.display().to_string(),
            )
        })?;
        info!(path = %config.repository.path.display(), "opened repository");
        Ok(Self {
            repo,
            config,
            resolver: Box::new(DeclineResolver),
        })
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Compute the plan and conflicts for the configured library file
    /// without touching the working tree or the commit graph.
    pub fn analyze(&self, path: &Path) -> Result<MergeAnalysis, MergeError> {
        let triple = RevisionLocator::locate(&self.repo, &self.config.repository.remote)?;
        let up_to_date = self.already_up_to_date(&triple)?;
        let (plan, conflicts) = if up_to_date {
            (MergePlan::default(), Vec::new())
        } else {
            let (base, local, remote) = self.snapshots(&triple, path)?;
            MergePlanner::plan(&base, &local, &remote)
        };
        Ok(MergeAnalysis {
            local: triple.local.to_string(),
            remote: triple.remote.to_string(),
            base: triple.base.map(|b| b.to_string()),
            up_to_date,
            plan,
            conflicts,
        })
    }

    /// Run the whole pipeline for the library file at `path` (relative to
    /// the repository root).
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn merge_pull(&self, path: &Path) -> Result<PullReport, MergeError> {
        let triple = RevisionLocator::locate(&self.repo, &self.config.repository.remote)?;
        if self.already_up_to_date(&triple)? {
            info!("already up to date");
            return Ok(PullReport::up_to_date());
        }

        let (base, local, remote) = self.snapshots(&triple, path)?;
        let (plan, conflicts) = MergePlanner::plan(&base, &local, &remote);

        let resolved = if conflicts.is_empty() {
            None
        } else {
            match self.resolver.resolve(&plan, &conflicts) {
                Some(records) => {
                    info!(records = records.len(), "conflicts resolved externally");
                    Some(records)
                }
                // Abort with nothing on disk touched.
                None => return Err(MergeError::UnresolvedConflicts { conflicts }),
            }
        };
        let resolved_entries = resolved.as_ref().map_or(0, Vec::len);

        let mut live = self.load_live_database(path)?;
        // Anything that can fail cheaply must fail before the writer runs;
        // past that point the working file no longer matches HEAD.
        let signature = Signature::now(&self.config.author.name, &self.config.author.email)
            .map_err(BookkeepingError::Git)
            .map_err(MergeError::Bookkeeping)?;

        let stats = MergeApplier::apply_auto_plan(&mut live, &plan);
        if let Some(records) = resolved {
            MergeApplier::apply_resolved(&mut live, records);
        }

        let absolute = self.workdir()?.join(path);
        ContentWriter::write(&absolute, &live, &self.config.library.encoding)?;

        let result = MergeBookkeeper::commit(&self.repo, path, &triple, &signature)
            .map_err(|source| MergeError::CommittedFileUnrecorded { source })?;

        let report = PullReport {
            up_to_date: false,
            fast_forwarded: matches!(result, BookkeepingResult::FastForward),
            commit_id: match result {
                BookkeepingResult::NewCommit(id) => Some(id.to_string()),
                BookkeepingResult::FastForward => None,
            },
            stats,
            resolved_entries,
        };
        info!(
            fast_forwarded = report.fast_forwarded,
            commit = report.commit_id.as_deref().unwrap_or("-"),
            "merge pull completed"
        );
        Ok(report)
    }

    /// Remote already contained in local: `merge_pull` is a no-op then.
    fn already_up_to_date(&self, triple: &RevisionTriple) -> Result<bool, MergeError> {
        is_ancestor(&self.repo, triple.remote, triple.local)
            .map_err(|e| RepositoryStateError::Git(e).into())
    }

    fn snapshots(
        &self,
        triple: &RevisionTriple,
        path: &Path,
    ) -> Result<(DatabaseSnapshot, DatabaseSnapshot, DatabaseSnapshot), MergeError> {
        let base_content = match triple.base {
            Some(commit) => read_at(&self.repo, commit, path)?,
            None => None,
        };
        let local_content = read_at(&self.repo, triple.local, path)?;
        let remote_content = read_at(&self.repo, triple.remote, path)?;
        debug!(
            base = base_content.is_some(),
            local = local_content.is_some(),
            remote = remote_content.is_some(),
            "retrieved file content at all revisions"
        );
        Ok((
            DatabaseSnapshot::parse(base_content.as_deref())?,
            DatabaseSnapshot::parse(local_content.as_deref())?,
            DatabaseSnapshot::parse(remote_content.as_deref())?,
        ))
    }

    /// The live database is parsed from the working file, which may carry
    /// uncommitted local edits; a missing file is an empty database.
    fn load_live_database(&self, path: &Path) -> Result<BibDatabase, MergeError> {
        let absolute = self.workdir()?.join(path);
        match std::fs::read_to_string(&absolute) {
            Ok(text) => Ok(BibDatabase::from_records(codec::parse(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BibDatabase::new()),
            Err(e) => Err(RepositoryStateError::Io(e).into()),
        }
    }

    fn workdir(&self) -> Result<&Path, MergeError> {
        self.repo.workdir().ok_or_else(|| {
            RepositoryStateError::RepositoryNotFound("bare repository has no working tree".into())
                .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bib::record::BibRecord;
    use crate::config::{AuthorConfig, LibraryConfig, RepositoryConfig};
    use crate::git::testutil::{commit_file, init_repo, rewind_main, write_workfile};
    use git2::Repository;
    use std::path::PathBuf;

    const LIB: &str = "library.bib";

    fn engine_for(repo: &Repository) -> MergeEngine {
        let config = AppConfig {
            repository: RepositoryConfig {
                path: repo.workdir().unwrap().to_path_buf(),
                remote: "origin".into(),
            },
            library: LibraryConfig {
                file: PathBuf::from(LIB),
                encoding: "utf-8".into(),
            },
            author: AuthorConfig {
                name: "Merge Bot".into(),
                email: "bot@example.org".into(),
            },
        };
        MergeEngine::open(config).unwrap()
    }

    fn set_remote(repo: &Repository, commit: crate::git::CommitId) {
        repo.reference("refs/remotes/origin/main", commit.oid(), true, "test")
            .unwrap();
    }

    #[test]
    fn test_pull_fast_forwards_when_strictly_behind() {
        let (_dir, repo) = init_repo();
        let base = "@article{k1,\n  year = {2020},\n}\n";
        let newer = "@article{k1,\n  year = {2021},\n}\n";
        let c0 = commit_file(&repo, LIB, base, "base");
        let c1 = commit_file(&repo, LIB, newer, "remote");
        rewind_main(&repo, c0);
        set_remote(&repo, c1);
        write_workfile(&repo, LIB, base);

        let report = engine_for(&repo).merge_pull(Path::new(LIB)).unwrap();
        assert!(report.fast_forwarded);
        assert!(report.commit_id.is_none());
        assert_eq!(repo.head().unwrap().target().unwrap(), c1.oid());
        let content = std::fs::read_to_string(repo.workdir().unwrap().join(LIB)).unwrap();
        assert_eq!(content, newer);
    }

    #[test]
    fn test_pull_merges_divergent_field_edits_with_two_parents() {
        let (_dir, repo) = init_repo();
        let c0 = commit_file(
            &repo,
            LIB,
            "@article{k1,\n  author = {base},\n  year = {2020},\n}\n",
            "base",
        );
        let c1 = commit_file(
            &repo,
            LIB,
            "@article{k1,\n  author = {base},\n  year = {2021},\n}\n",
            "remote",
        );
        rewind_main(&repo, c0);
        let c2 = commit_file(
            &repo,
            LIB,
            "@article{k1,\n  author = {local},\n  year = {2020},\n}\n",
            "local",
        );
        set_remote(&repo, c1);

        let report = engine_for(&repo).merge_pull(Path::new(LIB)).unwrap();
        assert!(!report.fast_forwarded);
        assert_eq!(report.stats.patched_entries, 1);

        let merged =
            std::fs::read_to_string(repo.workdir().unwrap().join(LIB)).unwrap();
        assert!(merged.contains("author = {local}"));
        assert!(merged.contains("year = {2021}"));

        let commit = repo
            .find_commit(git2::Oid::from_str(report.commit_id.as_deref().unwrap()).unwrap())
            .unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert_eq!(commit.parent_id(0).unwrap(), c2.oid());
        assert_eq!(commit.parent_id(1).unwrap(), c1.oid());
    }

    #[test]
    fn test_pull_aborts_on_conflict_without_touching_the_file() {
        let (_dir, repo) = init_repo();
        let c0 = commit_file(&repo, LIB, "@article{k2,\n  author = {A},\n}\n", "base");
        let c1 = commit_file(&repo, LIB, "@article{k2,\n  author = {C},\n}\n", "remote");
        rewind_main(&repo, c0);
        let local = "@article{k2,\n  author = {B},\n}\n";
        let c2 = commit_file(&repo, LIB, local, "local");
        set_remote(&repo, c1);

        let err = engine_for(&repo).merge_pull(Path::new(LIB)).unwrap_err();
        let MergeError::UnresolvedConflicts { conflicts } = err else {
            panic!("expected unresolved conflicts");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].citation_key, "k2");
        assert_eq!(conflicts[0].base.as_deref(), Some("A"));
        assert_eq!(conflicts[0].local.as_deref(), Some("B"));
        assert_eq!(conflicts[0].remote.as_deref(), Some("C"));

        // Nothing mutated: file and HEAD are exactly as before.
        let content = std::fs::read_to_string(repo.workdir().unwrap().join(LIB)).unwrap();
        assert_eq!(content, local);
        assert_eq!(repo.head().unwrap().target().unwrap(), c2.oid());
    }

    #[test]
    fn test_pull_applies_externally_resolved_records() {
        struct AgreeOnAuthor;
        impl ConflictResolver for AgreeOnAuthor {
            fn resolve(
                &self,
                _plan: &MergePlan,
                conflicts: &[FieldConflict],
            ) -> Option<Vec<BibRecord>> {
                let key = &conflicts[0].citation_key;
                Some(vec![
                    BibRecord::new("article", key.clone()).with_field("author", "agreed")
                ])
            }
        }

        let (_dir, repo) = init_repo();
        let c0 = commit_file(&repo, LIB, "@article{k2,\n  author = {A},\n}\n", "base");
        let c1 = commit_file(&repo, LIB, "@article{k2,\n  author = {C},\n}\n", "remote");
        rewind_main(&repo, c0);
        commit_file(&repo, LIB, "@article{k2,\n  author = {B},\n}\n", "local");
        set_remote(&repo, c1);

        let engine = engine_for(&repo).with_resolver(Box::new(AgreeOnAuthor));
        let report = engine.merge_pull(Path::new(LIB)).unwrap();
        assert_eq!(report.resolved_entries, 1);
        let content = std::fs::read_to_string(repo.workdir().unwrap().join(LIB)).unwrap();
        assert!(content.contains("author = {agreed}"));
    }

    #[test]
    fn test_pull_is_idempotent_when_up_to_date() {
        let (_dir, repo) = init_repo();
        let c0 = commit_file(&repo, LIB, "@article{a,\n  year = {2020},\n}\n", "only");
        set_remote(&repo, c0);

        let engine = engine_for(&repo);
        for _ in 0..2 {
            let report = engine.merge_pull(Path::new(LIB)).unwrap();
            assert!(report.up_to_date);
            assert_eq!(repo.head().unwrap().target().unwrap(), c0.oid());
        }
    }

    #[test]
    fn test_pull_is_noop_when_ahead_of_remote() {
        let (_dir, repo) = init_repo();
        let c0 = commit_file(&repo, LIB, "@article{a,}\n", "base");
        commit_file(&repo, LIB, "@article{a,\n  year = {2020},\n}\n", "local ahead");
        set_remote(&repo, c0);

        let report = engine_for(&repo).merge_pull(Path::new(LIB)).unwrap();
        assert!(report.up_to_date);
    }

    #[test]
    fn test_pull_merges_unrelated_histories() {
        let (_dir, repo) = init_repo();
        let local_text = "@article{a,\n  author = {Alice},\n}\n";
        let c0 = commit_file(&repo, LIB, local_text, "local root");

        // Orphan remote root with a different entry.
        let blob = repo.blob(b"@article{b,\n  author = {Bob},\n}\n").unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder
            .insert(LIB, blob, git2::FileMode::Blob.into())
            .unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let sig = git2::Signature::now("Test", "test@example.org").unwrap();
        let orphan = repo
            .commit(None, &sig, &sig, "remote root", &tree, &[])
            .unwrap();
        set_remote(&repo, orphan.into());

        let report = engine_for(&repo).merge_pull(Path::new(LIB)).unwrap();
        assert_eq!(report.stats.new_entries, 1);

        let merged = std::fs::read_to_string(repo.workdir().unwrap().join(LIB)).unwrap();
        assert!(merged.contains("{Alice}"));
        assert!(merged.contains("{Bob}"));

        let commit = repo
            .find_commit(git2::Oid::from_str(report.commit_id.as_deref().unwrap()).unwrap())
            .unwrap();
        assert_eq!(commit.parent_count(), 2);
        assert_eq!(commit.parent_id(0).unwrap(), c0.oid());
    }

    #[test]
    fn test_analyze_reports_without_mutating() {
        let (_dir, repo) = init_repo();
        let c0 = commit_file(&repo, LIB, "@article{k1,\n  year = {2020},\n}\n", "base");
        let c1 = commit_file(&repo, LIB, "@article{k1,\n  year = {2021},\n}\n", "remote");
        rewind_main(&repo, c0);
        set_remote(&repo, c1);
        write_workfile(&repo, LIB, "@article{k1,\n  year = {2020},\n}\n");

        let analysis = engine_for(&repo).analyze(Path::new(LIB)).unwrap();
        assert!(!analysis.up_to_date);
        assert!(analysis.conflicts.is_empty());
        assert!(analysis.plan.field_patches.contains_key("k1"));
        // Still exactly where we were.
        assert_eq!(repo.head().unwrap().target().unwrap(), c0.oid());
    }
}
