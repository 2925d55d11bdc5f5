//! IRIs: the identity of every ActivityPub entity.
//!
//! An IRI is an absolute URI. Two IRIs are equal iff their normalized form
//! matches; a *local* IRI is one whose scheme+host prefix equals the
//! instance's configured base URL.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// An absolute IRI.
///
/// Stored as the raw string; parsing into components is done on demand via
/// [`Iri::url`]. Trailing slashes are not significant for equality or
/// containment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iri(String);

impl Iri {
    pub fn new(s: impl Into<String>) -> Self {
        Iri(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse into URL components. Fails on relative or malformed IRIs.
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.0).map_err(|e| Error::InvalidIri(format!("{}: {e}", self.0)))
    }

    /// Append a path segment, normalizing the separator.
    pub fn add_path(&self, seg: &str) -> Iri {
        let base = self.0.trim_end_matches('/');
        let seg = seg.trim_start_matches('/');
        Iri(format!("{base}/{seg}"))
    }

    /// The final path segment, if any.
    pub fn last_segment(&self) -> Option<&str> {
        let trimmed = self.0.trim_end_matches('/');
        let path_start = trimmed.find("://").map(|i| i + 3).unwrap_or(0);
        let rest = &trimmed[path_start..];
        let slash = rest.find('/')?;
        rest[slash + 1..].rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// The IRI with its final path segment removed.
    pub fn parent(&self) -> Option<Iri> {
        let trimmed = self.0.trim_end_matches('/');
        let path_start = trimmed.find("://").map(|i| i + 3)?;
        let cut = trimmed.rfind('/')?;
        if cut <= path_start {
            return None;
        }
        Some(Iri(trimmed[..cut].to_string()))
    }

    /// Whether `other` falls under this IRI.
    ///
    /// With `strict` the scheme must match exactly; otherwise an http/https
    /// mismatch is tolerated. Containment is path-prefix containment on
    /// whole segments: `https://a/b` contains `https://a/b/c` but not
    /// `https://a/bc`.
    pub fn contains(&self, other: &Iri, strict: bool) -> bool {
        let (Ok(a), Ok(b)) = (self.url(), other.url()) else {
            return false;
        };
        if strict && a.scheme() != b.scheme() {
            return false;
        }
        if !strict && !schemes_compatible(a.scheme(), b.scheme()) {
            return false;
        }
        if a.host_str() != b.host_str() {
            return false;
        }
        let ap = a.path().trim_end_matches('/');
        let bp = b.path().trim_end_matches('/');
        bp == ap || ap.is_empty() || bp.starts_with(&format!("{ap}/"))
    }

    /// Equality with an optional strictness knob.
    ///
    /// Strict compares scheme+host+path+query; loose compares scheme+host+path
    /// only and tolerates an http/https mismatch.
    pub fn equals(&self, other: &Iri, strict: bool) -> bool {
        if self.0 == other.0 {
            return true;
        }
        let (Ok(a), Ok(b)) = (self.url(), other.url()) else {
            return false;
        };
        let scheme_ok = if strict {
            a.scheme() == b.scheme()
        } else {
            schemes_compatible(a.scheme(), b.scheme())
        };
        scheme_ok
            && a.host_str() == b.host_str()
            && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
            && (!strict || a.query() == b.query())
    }
}

fn schemes_compatible(a: &str, b: &str) -> bool {
    a == b || (is_http(a) && is_http(b))
}

fn is_http(s: &str) -> bool {
    s == "http" || s == "https"
}

impl std::fmt::Display for Iri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Iri {
    fn from(s: String) -> Self {
        Iri(s)
    }
}

impl From<&str> for Iri {
    fn from(s: &str) -> Self {
        Iri(s.to_string())
    }
}

impl AsRef<str> for Iri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
