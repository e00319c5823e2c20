//! Resolution of the commit triple a three-way merge runs against.

use std::fmt;

use git2::{ErrorCode, Repository};
use tracing::{debug, instrument};

use crate::errors::RepositoryStateError;

/// Opaque handle to a commit in the graph.
///
/// Supports ancestry queries through the repository; no direct field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(git2::Oid);

impl CommitId {
    pub fn oid(&self) -> git2::Oid {
        self.0
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The {base, local, remote} commits of one merge attempt.
///
/// `local` and `remote` are always resolvable; `base` is absent when the two
/// histories share no common ancestor, which is a legitimate outcome rather
/// than an error.
#[derive(Debug, Clone, Copy)]
pub struct RevisionTriple {
    pub base: Option<CommitId>,
    pub local: CommitId,
    pub remote: CommitId,
}

/// Resolves the revision triple from the repository's current state.
pub struct RevisionLocator;

impl RevisionLocator {
    /// Resolve HEAD and the current branch's remote-tracking ref, then
    /// compute the merge base.
    #[instrument(skip(repo), fields(remote = remote_name))]
    pub fn locate(
        repo: &Repository,
        remote_name: &str,
    ) -> Result<RevisionTriple, RepositoryStateError> {
        let head = repo
            .head()
            .map_err(|e| RepositoryStateError::UnresolvableHead(e.message().to_string()))?;
        if !head.is_branch() {
            return Err(RepositoryStateError::UnresolvableHead(
                "HEAD is detached".into(),
            ));
        }
        let branch = head.shorthand().ok_or_else(|| {
            RepositoryStateError::UnresolvableHead("HEAD has no branch name".into())
        })?;
        let local: CommitId = head
            .peel_to_commit()
            .map_err(|e| RepositoryStateError::UnresolvableHead(e.message().to_string()))?
            .id()
            .into();

        let remote_ref = format!("refs/remotes/{remote_name}/{branch}");
        let remote: CommitId = repo
            .find_reference(&remote_ref)
            .and_then(|r| r.peel_to_commit())
            .map_err(|_| RepositoryStateError::RemoteRefNotFound(remote_ref.clone()))?
            .id()
            .into();

        let base = match repo.merge_base(local.oid(), remote.oid()) {
            Ok(oid) => Some(CommitId::from(oid)),
            // Unrelated histories: a first-class outcome, not an error.
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(RepositoryStateError::Git(e)),
        };

        debug!(
            local = %local,
            remote = %remote,
            base = base.map(|b| b.to_string()).unwrap_or_else(|| "none".into()),
            "located revision triple"
        );
        Ok(RevisionTriple {
            base,
            local,
            remote,
        })
    }
}

/// True when `ancestor` is an ancestor of `commit` (equal commits count).
pub fn is_ancestor(
    repo: &Repository,
    ancestor: CommitId,
    commit: CommitId,
) -> Result<bool, git2::Error> {
    if ancestor == commit {
        return Ok(true);
    }
    repo.graph_descendant_of(commit.oid(), ancestor.oid())
}
