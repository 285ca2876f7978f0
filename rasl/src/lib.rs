//! A crate resolving content-addressed resources over the RASL protocol.
//!
//! A resource is named by a deterministic content identifier derived from its
//! bytes, not its location, and is located by trying a small set of "hint"
//! hosts believed to be able to serve it. Both sides of the protocol live
//! here:
//! - the client-side [`fetch`] resolver races concurrent lookups across hint
//!   hosts, picks the first genuine success, and cryptographically verifies
//!   the returned bytes against the requested identifier;
//! - the server-side [`ContentIndex`] maintains a live identifier↔path
//!   mapping over a watched directory tree, answering "do you have identifier
//!   X" lookups through the [`handler`] contract.
//!
//! A locator packs both halves together in a URL-shaped string:
//!
//! ```text
//!     web+rasl://<cid>[;<hint1>,<hint2>,...]/
//!     ^          ^      ^
//!     scheme     |      percent-encoded hint hosts, declaration order
//!                identifier: sha2-256 of the whole payload as a raw CIDv1,
//!                base32-lower
//! ```
//!
//! Hints must be supplied out of band; this is not a discovery protocol, and
//! there is no chunked or merkle store behind the identifier, whole-object
//! hashing only. It obviously makes use of both synchronous and asynchronous
//! synchronization primitives, favourably racing per-hint lookups as abortable
//! concurrent tasks joined at a barrier that completes on first success or
//! full exhaustion, and funneling filesystem notifications through a
//! _multi-producer single-consumer_ channel into a single-writer index
//! routine.

mod index;
pub use index::*;

pub mod cid;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod locator;
pub mod task;

pub use cid::ContentId;
pub use error::{Error, Result};
pub use fetch::{resolve, RaslRequest, RaslResponse, Resolver};
pub use locator::RaslUrl;
