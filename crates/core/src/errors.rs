//! Error types for the BibSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`MergeError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::merge::planner::FieldConflict;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for a full merge attempt.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Repository(#[from] RepositoryStateError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Bookkeeping(#[from] BookkeepingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The plan left conflicts unresolved and no resolver produced final
    /// records. Nothing on disk was touched.
    #[error("{} field conflict(s) need manual resolution", conflicts.len())]
    UnresolvedConflicts { conflicts: Vec<FieldConflict> },

    /// Bookkeeping failed after the working file was already rewritten.
    ///
    /// The file reflects the merged state but no commit records it; the
    /// caller must surface this explicitly because re-running the pipeline
    /// will see the already-changed file.
    #[error("merge was written to the working file but not committed: {source}")]
    CommittedFileUnrecorded {
        #[source]
        source: BookkeepingError,
    },
}

// ---------------------------------------------------------------------------
// Repository state errors
// ---------------------------------------------------------------------------

/// Errors resolving the repository state needed for a merge.
#[derive(Debug, Error)]
pub enum RepositoryStateError {
    /// The path is not inside a git repository.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// HEAD is unborn or detached in a way that prevents a merge.
    #[error("cannot resolve HEAD: {0}")]
    UnresolvableHead(String),

    /// The remote-tracking reference for the current branch is missing.
    #[error("remote-tracking ref not found: {0}")]
    RemoteRefNotFound(String),

    /// A blob at a commit is not valid text.
    #[error("file '{path}' at commit {commit} is not valid UTF-8")]
    NotText { path: String, commit: String },

    /// Underlying git2 failure (object-store corruption, access failure).
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// Errors parsing a database snapshot.
///
/// A corrupt base or remote makes safe planning impossible, so these abort
/// the whole merge instead of attempting partial recovery.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The entry header (`@type{key,`) is malformed.
    #[error("malformed entry header at line {line}: {detail}")]
    BadEntryHeader { line: usize, detail: String },

    /// A field value ran past the end of input without a closing delimiter.
    #[error("unterminated value for field '{field}' starting at line {line}")]
    UnterminatedValue { field: String, line: usize },

    /// An entry body ended without a closing brace.
    #[error("unterminated entry '{key}' starting at line {line}")]
    UnterminatedEntry { key: String, line: usize },

    /// Unexpected character where a field name or delimiter was required.
    #[error("unexpected character '{found}' at line {line}")]
    UnexpectedChar { found: char, line: usize },
}

// ---------------------------------------------------------------------------
// Write errors
// ---------------------------------------------------------------------------

/// Errors from writing the library file back to the working tree.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The target encoding cannot losslessly represent the content.
    /// Raised before any bytes land on disk.
    #[error("encoding '{encoding}' cannot represent the content of '{path}' losslessly")]
    Encoding { encoding: String, path: String },

    /// The configured encoding label is not a known encoding.
    #[error("unknown encoding label '{0}'")]
    UnknownEncoding(String),

    /// The target path has no parent directory to stage the temp file in.
    #[error("invalid target path '{0}'")]
    InvalidPath(String),

    /// Generic I/O wrapper (temp file creation, atomic rename).
    #[error("write I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Bookkeeping errors
// ---------------------------------------------------------------------------

/// Errors recording the merge result in the commit graph.
#[derive(Debug, Error)]
pub enum BookkeepingError {
    /// HEAD no longer points at the `local` commit the plan was derived
    /// from; the whole pipeline must be restarted.
    #[error("HEAD moved since the merge was planned (expected {expected}, found {found})")]
    StaleMerge { expected: String, found: String },

    /// The compare-and-swap ref update was rejected, typically because a
    /// concurrent merge won the race.
    #[error("branch ref update rejected for '{refname}': {detail}")]
    RefUpdateRejected { refname: String, detail: String },

    /// HEAD is not on a branch that can be updated.
    #[error("HEAD is not a branch: {0}")]
    NotOnBranch(String),

    /// Underlying git2 failure.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
