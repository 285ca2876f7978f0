//! This module provides the crate-wide error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::cid::ContentId;

/// A specialized `Result` type for RASL operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by RASL resolution, indexing and locator handling.
///
/// Per-hint lookup failures during a race are never surfaced through this enum:
/// they are local to the attempt, and only the aggregate absence of any success
/// resolves to [`Error::NotFound`]. Likewise, local read failures while the
/// index recomputes an identifier are swallowed to "absent" by design.
#[derive(Debug, Error)]
pub enum Error {
    /// The locator's scheme, identifier grammar or hint segment is malformed.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// Only retrieval (`GET`) and existence-check (`HEAD`) are part of the protocol.
    #[error("method {0} not supported")]
    UnsupportedMethod(reqwest::Method),

    /// The combined hint set was empty, there is no RASL server to try.
    #[error("no hints, cannot find any RASL server to try")]
    NoHints,

    /// No hint server answered the lookup with a success.
    ///
    /// This is the expected miss of a well-formed resolution, distinct from
    /// "the request could not even be formed".
    #[error("content not found on any hint server")]
    NotFound,

    /// The winning server returned bytes that do not hash to the requested identifier.
    #[error("data does not match CID: requested {requested}, computed {computed}")]
    IntegrityMismatch {
        /// The identifier the locator asked for.
        requested: ContentId,
        /// The identifier actually computed from the returned bytes.
        computed: ContentId,
    },

    /// The index root must be an absolute path.
    #[error("path must be absolute: `{}`", .0.display())]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}
