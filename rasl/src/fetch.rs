//! This module provides the client-side resolution algorithm.
//!
//! Resolving a locator races one lookup per hint host, all fully concurrent,
//! each with its own cancellation signal. The race is settled by _first
//! success_, not first completion: a fast failure on one hint never preempts a
//! slower success on another. Once a winner is observed, every other in-flight
//! attempt is aborted, and the winner's body is verified against the requested
//! content identifier unless verification is explicitly skipped.

use std::collections::HashSet;

use bytes::Bytes;
use futures::future::{self, Aborted};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use url::Url;

use crate::cid::ContentId;
use crate::error::{Error, Result};
use crate::handler::{OCTET_STREAM, WELL_KNOWN_PREFIX};
use crate::locator::RaslUrl;

/// Per-call resolution options.
///
/// Defaults to a retrieval (`GET`) with no extra hints and full verification.
#[derive(Debug, Clone, Default)]
pub struct RaslRequest {
    method: Method,
    hints: Vec<String>,
    override_hints: bool,
    skip_verification: bool,
}

impl RaslRequest {
    /// Create a request with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol method, retrieval (`GET`) or existence-check (`HEAD`).
    ///
    /// Any other method fails the resolution with
    /// [`Error::UnsupportedMethod`] before any network activity.
    #[inline]
    pub fn with_method(self, method: Method) -> Self {
        Self { method, ..self }
    }

    /// Supply additional hint hosts, tried alongside the locator's own hints.
    #[inline]
    pub fn with_hints<I, S>(self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hints: hints.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Ignore the locator's hints and race the request hints only.
    #[inline]
    pub fn override_hints(self) -> Self {
        Self {
            override_hints: true,
            ..self
        }
    }

    /// Return the winner's bytes unverified, headers untouched.
    #[inline]
    pub fn skip_verification(self) -> Self {
        Self {
            skip_verification: true,
            ..self
        }
    }
}

/// A resolved response.
///
/// Carries the winning server's status and headers, with the body fully read.
/// Unless verification was skipped, the body hashes to the requested content
/// identifier and the content type is normalized to the opaque binary type.
#[derive(Debug)]
pub struct RaslResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RaslResponse {
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self { status, headers, body })
    }
}

/// The hint-racing resolver.
///
/// Stateless across calls apart from the shared HTTP client; independent
/// [`Resolver::resolve()`] calls carry no shared mutable state.
#[derive(Debug)]
pub struct Resolver {
    client: Client,
    scheme: &'static str,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            client: Client::default(),
            scheme: "https",
        }
    }
}

impl Resolver {
    /// Create a resolver with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver reusing an existing HTTP client.
    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }

    /// Address hint servers over plain `http` instead of `https`.
    ///
    /// Meant for local development setups; verification still applies.
    #[inline]
    pub fn with_insecure_http(self) -> Self {
        Self { scheme: "http", ..self }
    }

    /// Resolve a locator to its verified content.
    ///
    /// A non-RASL locator is passed straight through to the HTTP client as a
    /// generic request. For a RASL locator, the combined hint set is the union
    /// of request hints and locator hints (declaration order, duplicates
    /// collapsed), or the request hints alone under
    /// [`RaslRequest::override_hints()`].
    ///
    /// The call suspends until every attempt has settled, but the winner is
    /// picked incrementally on first success; all other still-pending attempts
    /// are aborted at that point. No attempt ever succeeding resolves to
    /// [`Error::NotFound`], individual hint failures are expected and
    /// non-fatal. No implicit timeout is applied, and dropping the returned
    /// future drops all outstanding attempts with it.
    pub async fn resolve(&self, resource: &str, request: RaslRequest) -> Result<RaslResponse> {
        let locator = RaslUrl::parse(resource)?;

        if !locator.is_rasl() {
            let response = self.client.request(request.method, locator.as_str()).send().await?;

            return RaslResponse::from_response(response).await;
        }

        if request.method != Method::GET && request.method != Method::HEAD {
            return Err(Error::UnsupportedMethod(request.method));
        }

        let Some(cid) = locator.cid() else {
            return Err(Error::InvalidLocator(resource.to_owned()));
        };

        let mut hints = request.hints;
        if !request.override_hints {
            hints.extend(locator.hints());
        }

        let mut seen = HashSet::new();
        hints.retain(|hint| seen.insert(hint.clone()));

        if hints.is_empty() {
            return Err(Error::NoHints);
        }

        let winner = self.race(&hints, &cid, request.method).await;

        let Some(winner) = winner else {
            return Err(Error::NotFound);
        };

        if request.skip_verification {
            return RaslResponse::from_response(winner).await;
        }

        let status = winner.status();
        let mut headers = winner.headers().clone();
        let body = winner.bytes().await?;

        let computed = ContentId::from_bytes(&body);
        if computed != cid {
            return Err(Error::IntegrityMismatch { requested: cid, computed });
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));

        Ok(RaslResponse { status, headers, body })
    }

    /// Race one abortable lookup per hint and return the first success, if any.
    ///
    /// Every attempt is driven to completion (success, failure or abort)
    /// before returning, so no lookup is left dangling past the call.
    async fn race(&self, hints: &[String], cid: &ContentId, method: Method) -> Option<reqwest::Response> {
        let mut aborts = Vec::with_capacity(hints.len());
        let mut attempts = FuturesUnordered::new();

        for (idx, hint) in hints.iter().enumerate() {
            let (attempt, abort_handle) = future::abortable(self.lookup(hint, cid, method.clone()));

            aborts.push(abort_handle);
            attempts.push(async move { (idx, attempt.await) });
        }

        let mut winner = None;

        while let Some((idx, outcome)) = attempts.next().await {
            match outcome {
                Ok(Ok(response)) if winner.is_none() => {
                    tracing::debug!("Hint `{}` won the race for {cid}", hints[idx]);

                    for (i, abort_handle) in aborts.iter().enumerate() {
                        if i != idx {
                            abort_handle.abort();
                        }
                    }

                    winner = Some(response);
                }
                Ok(Ok(_)) => { /* a second success settled before its abort landed */ }
                Ok(Err(err)) => tracing::debug!("Hint `{}` failed: {err}", hints[idx]),
                Err(Aborted) => tracing::trace!("Hint `{}` lookup aborted", hints[idx]),
            }
        }

        winner
    }

    /// Issue a single well-known lookup against one hint host.
    ///
    /// Lookups are read-only by construction: no request body, no forwarded
    /// headers, no credentials. Any non-success status is a local failure.
    async fn lookup(&self, hint: &str, cid: &ContentId, method: Method) -> Result<reqwest::Response> {
        let url = Url::parse(&format!("{}://{hint}{WELL_KNOWN_PREFIX}{cid}", self.scheme))
            .map_err(|err| Error::InvalidLocator(err.to_string()))?;

        tracing::trace!("Trying hint `{url}`...");

        let response = self.client.request(method, url).send().await?;

        response.error_for_status().map_err(Error::from)
    }
}

/// Resolve a locator with a one-off default [`Resolver`].
#[inline]
pub async fn resolve(resource: &str, request: RaslRequest) -> Result<RaslResponse> {
    Resolver::default().resolve(resource, request).await
}
