//! Recording a merged library state in the commit graph.
//!
//! The bookkeeper runs strictly after the working file has been rewritten.
//! It stages only the library file, decides the commit topology
//! (fast-forward, single-parent continuation, or two-parent merge) from the
//! ancestry of the revision triple, and moves the branch ref with
//! compare-and-swap semantics. Any failure aborts before the ref update,
//! leaving the reachable commit graph untouched.

use std::path::Path;

use git2::{Oid, Repository, Signature};
use tracing::{debug, info, instrument};

use crate::errors::BookkeepingError;
use crate::git::locator::{is_ancestor, CommitId, RevisionTriple};

/// How the merge result was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookkeepingResult {
    /// The branch ref was moved to `remote`; no commit was created.
    FastForward,
    /// A new commit records the merged state.
    NewCommit(CommitId),
}

/// Commits the current working-tree state of the library file.
pub struct MergeBookkeeper;

impl MergeBookkeeper {
    /// Precondition: the working file at `path` already holds the merged
    /// content and HEAD still equals `triple.local`.
    #[instrument(skip(repo, triple, author), fields(path = %path.display()))]
    pub fn commit(
        repo: &Repository,
        path: &Path,
        triple: &RevisionTriple,
        author: &Signature<'_>,
    ) -> Result<BookkeepingResult, BookkeepingError> {
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(BookkeepingError::NotOnBranch(
                head.name().unwrap_or("HEAD").to_string(),
            ));
        }
        let refname = head
            .name()
            .ok_or_else(|| BookkeepingError::NotOnBranch("HEAD".into()))?
            .to_string();
        let head_oid = head
            .target()
            .ok_or_else(|| BookkeepingError::NotOnBranch(refname.clone()))?;

        // Stale-merge guard: the plan was derived against `local`.
        if head_oid != triple.local.oid() {
            return Err(BookkeepingError::StaleMerge {
                expected: triple.local.to_string(),
                found: head_oid.to_string(),
            });
        }

        // Stage only the library file, never the whole working tree.
        let mut index = repo.index()?;
        index.add_path(path)?;
        index.write()?;
        let staged_blob = index.get_path(path, 0).map(|entry| entry.id);
        let tree_oid = index.write_tree()?;
        debug!(tree = %tree_oid, "built tree from index");

        let behind = is_ancestor(repo, triple.local, triple.remote)?;
        if behind {
            // We were strictly behind before merging. If the written content
            // is byte-identical to remote's, this is a pure fast-forward.
            let remote_blob = blob_at(repo, triple.remote, path)?;
            if staged_blob.is_some() && staged_blob == remote_blob {
                Self::update_ref(repo, &refname, triple.remote.oid(), head_oid)?;
                info!(refname, target = %triple.remote, "fast-forwarded branch");
                return Ok(BookkeepingResult::FastForward);
            }
            // The merged result diverges from plain upstream content:
            // continuation commit with the remote tip as sole parent.
            let commit =
                Self::create_commit(repo, author, tree_oid, &[triple.remote], "Merge remote library changes")?;
            Self::update_ref(repo, &refname, commit.oid(), head_oid)?;
            info!(refname, commit = %commit, "created continuation commit");
            return Ok(BookkeepingResult::NewCommit(commit));
        }

        // True divergence: record a two-parent merge commit.
        let commit = Self::create_commit(
            repo,
            author,
            tree_oid,
            &[triple.local, triple.remote],
            "Merge remote library changes",
        )?;
        Self::update_ref(repo, &refname, commit.oid(), head_oid)?;
        info!(refname, commit = %commit, "created merge commit");
        Ok(BookkeepingResult::NewCommit(commit))
    }

    fn create_commit(
        repo: &Repository,
        author: &Signature<'_>,
        tree_oid: Oid,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId, BookkeepingError> {
        let tree = repo.find_tree(tree_oid)?;
        let parent_commits = parents
            .iter()
            .map(|id| repo.find_commit(id.oid()))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        // The ref is updated separately with compare-and-swap; until then
        // the commit object is unreachable.
        let oid = repo.commit(None, author, author, message, &tree, &parent_refs)?;
        Ok(oid.into())
    }

    /// Compare-and-swap the branch ref against the HEAD value resolved at
    /// entry. A concurrent merge that moved the ref first wins; we lose with
    /// [`BookkeepingError::RefUpdateRejected`] and the caller must restart.
    fn update_ref(
        repo: &Repository,
        refname: &str,
        new: Oid,
        expected_old: Oid,
    ) -> Result<(), BookkeepingError> {
        repo.reference_matching(refname, new, true, expected_old, "bibsync: merge")
            .map_err(|e| BookkeepingError::RefUpdateRejected {
                refname: refname.to_string(),
                detail: e.message().to_string(),
            })?;
        Ok(())
    }
}

fn blob_at(
    repo: &Repository,
    commit: CommitId,
    path: &Path,
) -> Result<Option<Oid>, BookkeepingError> {
    let tree = repo.find_commit(commit.oid())?.tree()?;
    match tree.get_path(path) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(BookkeepingError::Git(e)),
    }
}
