//! Reading the library file's content as it existed at a commit.

use std::path::Path;

use git2::{ErrorCode, Repository};
use tracing::debug;

use crate::errors::RepositoryStateError;
use crate::git::locator::CommitId;

/// Return the file content at `commit`, or `None` if the path did not exist
/// there. "Not found" is never an error; only object-store corruption or
/// access failure is.
pub fn read_at(
    repo: &Repository,
    commit: CommitId,
    path: &Path,
) -> Result<Option<String>, RepositoryStateError> {
    let tree = repo.find_commit(commit.oid())?.tree()?;
    let entry = match tree.get_path(path) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => {
            debug!(path = %path.display(), commit = %commit, "path absent at commit");
            return Ok(None);
        }
        Err(e) => return Err(RepositoryStateError::Git(e)),
    };
    let blob = repo.find_blob(entry.id())?;
    let content =
        std::str::from_utf8(blob.content()).map_err(|_| RepositoryStateError::NotText {
            path: path.display().to_string(),
            commit: commit.to_string(),
        })?;
    debug!(
        path = %path.display(),
        commit = %commit,
        bytes = blob.size(),
        "read file at commit"
    );
    Ok(Some(content.to_string()))
}
