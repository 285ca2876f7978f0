//! This module provides the `web+rasl:` locator value type.
//!
//! A locator packs a content identifier together with an ordered list of hint
//! hosts into the authority of a URL-shaped string:
//!
//! ```text
//!     web+rasl://<cid>[;<hint1>,<hint2>,...]/
//! ```
//!
//! Each hint is percent-encoded individually so punctuation such as `:` or
//! IPv6 brackets survives the `;`/`,` separators. Only the `web+rasl` scheme
//! exposes identifier/hints semantics; any other scheme explicitly degrades to
//! generic URL behavior, where mutating the identifier is plain host mutation.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::cid::ContentId;
use crate::error::{Error, Result};

/// The custom scheme carrying identifier/hints semantics.
pub const SCHEME: &str = "web+rasl";

/// Everything but unreserved characters gets percent-encoded within a hint,
/// so the `;` and `,` separators can never be forged from hint content.
const HINT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A parsed RASL locator.
///
/// Round-trip law: `RaslUrl::parse(locator.as_str())` reproduces the locator,
/// hints in declaration order, for any well-formed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaslUrl {
    url: Url,
}

impl RaslUrl {
    /// Parse a locator from its textual form.
    ///
    /// Any valid URL parses; identifier and hint grammars are only enforced
    /// when the scheme is [`SCHEME`].
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|err| Error::InvalidLocator(err.to_string()))?;
        let locator = Self { url };

        if locator.is_rasl() {
            let (cid, hints) = locator.split_authority();

            ContentId::parse(cid)?;

            if let Some(hints) = hints {
                if hints.is_empty() {
                    return Err(Error::InvalidLocator("empty hint segment".into()));
                }

                for hint in hints.split(',') {
                    if hint.is_empty() {
                        return Err(Error::InvalidLocator("empty hint".into()));
                    }

                    percent_decode_str(hint)
                        .decode_utf8()
                        .map_err(|_| Error::InvalidLocator(format!("hint `{hint}` is not valid UTF-8")))?;
                }
            }
        }

        Ok(locator)
    }

    /// Whether this locator carries RASL semantics.
    #[inline]
    pub fn is_rasl(&self) -> bool {
        self.url.scheme() == SCHEME
    }

    /// The content identifier, or `None` for non-RASL schemes.
    pub fn cid(&self) -> Option<ContentId> {
        if !self.is_rasl() {
            return None;
        }

        ContentId::parse(self.split_authority().0).ok()
    }

    /// Replace the content identifier, preserving existing hints.
    ///
    /// On a non-RASL locator this is plain host mutation.
    pub fn set_cid(&mut self, cid: &ContentId) -> Result<()> {
        let host = if self.is_rasl() {
            match self.split_authority().1 {
                Some(hints) => format!("{cid};{hints}"),
                None => cid.to_string(),
            }
        } else {
            cid.to_string()
        };

        self.set_host(&host)
    }

    /// The hints in declaration order, percent-decoded.
    ///
    /// Empty when no hint segment is present or the scheme is not RASL.
    pub fn hints(&self) -> Vec<String> {
        if !self.is_rasl() {
            return Vec::new();
        }

        match self.split_authority().1 {
            Some(hints) if !hints.is_empty() => hints
                .split(',')
                .map(|hint| percent_decode_str(hint).decode_utf8_lossy().into_owned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replace the hint list, each hint percent-encoded individually.
    ///
    /// An empty list clears the hint segment entirely. On a non-RASL locator
    /// this is a no-op, there is no hint segment to mutate.
    pub fn set_hints<S: AsRef<str>>(&mut self, hints: &[S]) -> Result<()> {
        if !self.is_rasl() {
            return Ok(());
        }

        let cid = self.split_authority().0.to_owned();

        let host = if hints.is_empty() {
            cid
        } else {
            let hints = hints
                .iter()
                .map(|hint| utf8_percent_encode(hint.as_ref(), HINT_ENCODE_SET).to_string())
                .collect::<Vec<_>>();

            format!("{cid};{}", hints.join(","))
        };

        self.set_host(&host)
    }

    /// The locator's textual form.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// A view of the underlying URL.
    #[inline]
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Split the authority into `(cid, hint segment)` on the first `;`.
    fn split_authority(&self) -> (&str, Option<&str>) {
        let host = self.url.host_str().unwrap_or("");

        match host.split_once(';') {
            Some((cid, hints)) => (cid, Some(hints)),
            None => (host, None),
        }
    }

    fn set_host(&mut self, host: &str) -> Result<()> {
        self.url
            .set_host(Some(host))
            .map_err(|err| Error::InvalidLocator(err.to_string()))
    }
}

impl std::fmt::Display for RaslUrl {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RaslUrl {
    type Err = Error;

    #[inline]
    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

impl From<RaslUrl> for Url {
    #[inline]
    fn from(locator: RaslUrl) -> Url {
        locator.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> ContentId {
        ContentId::from_bytes("ok")
    }

    #[test]
    fn test_parse_without_hints() {
        let locator = RaslUrl::parse(&format!("web+rasl://{}/", cid())).unwrap();

        assert!(locator.is_rasl());
        assert_eq!(locator.cid(), Some(cid()));
        assert!(locator.hints().is_empty());
    }

    #[test]
    fn test_parse_with_hints() {
        let locator = RaslUrl::parse(&format!("web+rasl://{};example.com,mirror.example/", cid())).unwrap();

        assert_eq!(locator.hints(), ["example.com", "mirror.example"]);
    }

    #[test]
    fn test_round_trip_preserves_hint_order_and_punctuation() {
        let hints = ["example.com:8080", "[2001:db8::1]:4443", "mirror.example"];

        let mut locator = RaslUrl::parse(&format!("web+rasl://{}/", cid())).unwrap();
        locator.set_hints(&hints).unwrap();

        let reparsed = RaslUrl::parse(locator.as_str()).unwrap();

        assert_eq!(reparsed, locator);
        assert_eq!(reparsed.cid(), Some(cid()));
        assert_eq!(reparsed.hints(), hints);
    }

    #[test]
    fn test_set_cid_preserves_hints() {
        let mut locator = RaslUrl::parse(&format!("web+rasl://{};example.com/", cid())).unwrap();
        let other = ContentId::from_bytes("rick");

        locator.set_cid(&other).unwrap();

        assert_eq!(locator.cid(), Some(other));
        assert_eq!(locator.hints(), ["example.com"]);
    }

    #[test]
    fn test_set_hints_empty_clears_segment() {
        let mut locator = RaslUrl::parse(&format!("web+rasl://{};example.com/", cid())).unwrap();

        locator.set_hints::<&str>(&[]).unwrap();

        assert!(locator.hints().is_empty());
        assert!(!locator.as_str().contains(';'));
        assert_eq!(locator.cid(), Some(cid()));
    }

    #[test]
    fn test_non_rasl_degrades_to_generic_url() {
        let mut locator = RaslUrl::parse("https://example.com/data").unwrap();

        assert!(!locator.is_rasl());
        assert_eq!(locator.cid(), None);
        assert!(locator.hints().is_empty());

        // identifier mutation becomes plain host mutation
        locator.set_cid(&cid()).unwrap();
        assert_eq!(locator.as_url().host_str(), Some(cid().as_str()));

        locator.set_hints(&["example.com"]).unwrap();
        assert!(locator.hints().is_empty());
    }

    #[test]
    fn test_malformed_locators() {
        for input in [
            "not a url".to_owned(),
            "web+rasl://UPPERCASE/".to_owned(),
            "web+rasl://notacid/".to_owned(),
            format!("web+rasl://{};/", cid()),
            format!("web+rasl://{};a,,b/", cid()),
        ] {
            assert!(
                matches!(RaslUrl::parse(&input), Err(Error::InvalidLocator(_))),
                "`{input}` should not parse"
            );
        }
    }
}
