//! This module provides the resolution handler contract, the narrow seam
//! between the content index and a serving transport layer.
//!
//! The transport layer itself is out of scope; it is expected to route
//! requests matching the well-known lookup path to a [`ResolutionHandler`]
//! and translate the returned [`Resolution`] into a response. The rules it
//! must honor are spelled out on the types below.

use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::cid::ContentId;
use crate::error::Result;
use crate::index::ContentIndex;

/// The protocol segment of the well-known lookup path.
pub const PROTOCOL_NAME: &str = "rasl";

/// The well-known lookup path prefix, shared by outbound per-hint URLs and
/// inbound request routing.
pub const WELL_KNOWN_PREFIX: &str = "/.well-known/rasl/";

/// The opaque binary content type every served payload is reported with.
///
/// Content negotiation is not part of the protocol: the underlying file's
/// actual type never leaks through.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Match a request path against the well-known lookup template.
///
/// Returns the content identifier for `/.well-known/rasl/<cid>` with a
/// grammar-conforming `<cid>`, and `None` otherwise. A `None` path must be
/// passed through untouched by the transport's router, never treated as
/// malformed.
pub fn match_well_known(path: &str) -> Option<ContentId> {
    let token = path.strip_prefix(WELL_KNOWN_PREFIX)?;

    ContentId::parse(token).ok()
}

/// The two protocol methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMethod {
    /// Retrieval; the response may carry a body.
    Retrieve,
    /// Existence-check; the response never carries a body.
    Exists,
}

impl ResolveMethod {
    /// Map an HTTP method name onto a protocol method.
    ///
    /// Anything but `GET`/`HEAD` yields `None` and must be declined or passed
    /// through at the transport boundary, not handled by protocol logic.
    pub fn from_http(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("get") {
            Some(Self::Retrieve)
        } else if method.eq_ignore_ascii_case("head") {
            Some(Self::Exists)
        } else {
            None
        }
    }
}

/// A streamed payload body.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// The outcome of a resolution callback.
pub enum Resolution {
    /// The content exists; no payload is materialized.
    ///
    /// Valid only for [`ResolveMethod::Exists`]; returning it for a retrieval
    /// is a contract violation.
    Present,
    /// The content is not served here.
    Absent,
    /// The content, fully in memory.
    Bytes(Bytes),
    /// The content, as a byte stream.
    Stream(ByteStream),
    /// A location able to serve the content.
    ///
    /// The transport translates this without verifying integrity at this
    /// layer; trust is deferred to whatever resolves the redirect.
    Redirect(Url),
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => f.write_str("Present"),
            Self::Absent => f.write_str("Absent"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Redirect(url) => write!(f, "Redirect({url})"),
        }
    }
}

/// A resolution callback answering "do you have identifier X" lookups.
///
/// Contract for the transport layer driving this:
/// - never materialize a payload body when answering an existence-check;
/// - treat an `Err` as a distinct handler fault, never conflated with
///   [`Resolution::Absent`].
pub trait ResolutionHandler: Send + Sync {
    fn resolve(&self, cid: &ContentId, method: ResolveMethod) -> BoxFuture<'_, Result<Resolution>>;
}

/// A resolution handler backed by a watched directory tree.
///
/// Owns a [`ContentIndex`] over `root` and serves whatever the index
/// currently maps: existence-checks answer [`Resolution::Present`],
/// retrievals stream the file's bytes. A missing mapping, like a mapped file
/// that turns out unreadable, is [`Resolution::Absent`].
pub struct WatchingHandler {
    index: ContentIndex,
}

impl WatchingHandler {
    /// Start watching `root` and resolve once the underlying index is ready.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            index: ContentIndex::start(root).await?,
        })
    }

    /// A view of the underlying index.
    #[inline]
    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    /// Stop the underlying index, idempotent.
    pub async fn stop(&mut self) {
        self.index.stop().await
    }
}

impl ResolutionHandler for WatchingHandler {
    fn resolve(&self, cid: &ContentId, method: ResolveMethod) -> BoxFuture<'_, Result<Resolution>> {
        let path = self.index.lookup(cid);

        async move {
            let Some(path) = path else {
                return Ok(Resolution::Absent);
            };

            match method {
                ResolveMethod::Exists => match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => Ok(Resolution::Present),
                    _ => Ok(Resolution::Absent),
                },
                ResolveMethod::Retrieve => match tokio::fs::File::open(&path).await {
                    Ok(file) => Ok(Resolution::Stream(file_stream(file))),
                    // a stale mapping is indistinguishable from absence here
                    Err(_) => Ok(Resolution::Absent),
                },
            }
        }
        .boxed()
    }
}

/// Stream a file's bytes in fixed-size reads.
fn file_stream(file: tokio::fs::File) -> ByteStream {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        let read = file.read_buf(&mut buf).await?;

        Ok(if read == 0 { None } else { Some((buf.freeze(), file)) })
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::TryStreamExt;

    fn cid(content: &str) -> ContentId {
        ContentId::from_bytes(content)
    }

    #[test]
    fn test_well_known_prefix_embeds_protocol_name() {
        assert_eq!(WELL_KNOWN_PREFIX, format!("/.well-known/{PROTOCOL_NAME}/"));
    }

    #[test]
    fn test_match_well_known() {
        let token = cid("ok");

        assert_eq!(match_well_known(&format!("/.well-known/rasl/{token}")), Some(token));

        // non-matching paths pass through, they are not malformed
        assert_eq!(match_well_known("/index.html"), None);
        assert_eq!(match_well_known("/.well-known/rasl/"), None);
        assert_eq!(match_well_known("/.well-known/rasl/NOTACID"), None);
        assert_eq!(match_well_known("/.well-known/rasl/bfoo2/extra"), None);
        assert_eq!(match_well_known("/.well-known/other/bfoo2"), None);
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(ResolveMethod::from_http("GET"), Some(ResolveMethod::Retrieve));
        assert_eq!(ResolveMethod::from_http("get"), Some(ResolveMethod::Retrieve));
        assert_eq!(ResolveMethod::from_http("HEAD"), Some(ResolveMethod::Exists));

        assert_eq!(ResolveMethod::from_http("POST"), None);
        assert_eq!(ResolveMethod::from_http("DELETE"), None);
    }

    #[tokio::test]
    async fn test_watching_handler() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path().canonicalize().unwrap();

        std::fs::write(root_path.join("a.bin"), "ok").unwrap();

        let mut handler = WatchingHandler::new(root_path).await.unwrap();

        // existence-check: present, no payload materialized
        let outcome = handler.resolve(&cid("ok"), ResolveMethod::Exists).await.unwrap();
        assert!(matches!(outcome, Resolution::Present));

        // retrieval: the payload streams back the file's bytes
        let outcome = handler.resolve(&cid("ok"), ResolveMethod::Retrieve).await.unwrap();
        let Resolution::Stream(stream) = outcome else {
            panic!("expected a stream, got {outcome:?}");
        };
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"ok");

        // unknown identifier: absent, distinct from a handler fault
        let outcome = handler.resolve(&cid("rick"), ResolveMethod::Exists).await.unwrap();
        assert!(matches!(outcome, Resolution::Absent));

        handler.stop().await;
    }
}
