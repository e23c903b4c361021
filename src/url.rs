//! Immutable URL value with download-oriented helpers.
//!
//! Wraps [`url::Url`] for RFC-compliant parsing and normalization and adds
//! the accessors the engine needs: reconstructed `full()`/`base()` forms,
//! default ports, and the output filename derived from the path.

use crate::error::{DownloadError, Result};

/// A parsed absolute HTTP(S) URL.
///
/// Immutable after construction. The scheme is lowercased during parsing
/// and a host is mandatory; anything else fails with `invalid_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    inner: url::Url,
}

impl Url {
    /// Parse an absolute URL.
    ///
    /// Relative inputs (no `scheme://`) and URLs without a host are
    /// rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let inner = url::Url::parse(input)
            .map_err(|e| DownloadError::InvalidUrl(format!("{input}: {e}")))?;
        if inner.host_str().is_none_or(str::is_empty) {
            return Err(DownloadError::InvalidUrl(format!("{input}: missing host")));
        }
        Ok(Self { inner })
    }

    /// Lowercased scheme, e.g. `https`.
    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn host(&self) -> &str {
        self.inner.host_str().unwrap_or_default()
    }

    /// Explicit port, if one was written in the URL.
    pub fn port(&self) -> Option<u16> {
        self.inner.port()
    }

    /// Path component, `/` when absent.
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// Query string without the leading `?`, empty when absent.
    pub fn query(&self) -> &str {
        self.inner.query().unwrap_or_default()
    }

    /// Fragment without the leading `#`, empty when absent.
    pub fn fragment(&self) -> &str {
        self.inner.fragment().unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.scheme() == "https"
    }

    /// The well-known port for the scheme, 0 for unknown schemes.
    pub fn default_port(&self) -> u16 {
        match self.scheme() {
            "http" => 80,
            "https" => 443,
            _ => 0,
        }
    }

    /// The full URL reassembled from its components.
    pub fn full(&self) -> String {
        let mut out = self.base();
        out.push_str(self.path());
        if let Some(q) = self.inner.query() {
            out.push('?');
            out.push_str(q);
        }
        if let Some(f) = self.inner.fragment() {
            out.push('#');
            out.push_str(f);
        }
        out
    }

    /// `scheme://host[:port]` without path, query or fragment.
    pub fn base(&self) -> String {
        let mut out = format!("{}://{}", self.scheme(), self.host());
        if let Some(port) = self.port() {
            out.push(':');
            out.push_str(&port.to_string());
        }
        out
    }

    /// Derive an output filename from the path.
    ///
    /// Returns the last non-empty path segment, or `index.html` when the
    /// path is `/` or ends with `/`. Query and fragment never leak in
    /// because they are separate components.
    pub fn filename(&self) -> String {
        let name = self.path().rsplit('/').next().unwrap_or_default();
        if name.is_empty() {
            "index.html".to_string()
        } else {
            name.to_string()
        }
    }

    /// The underlying parsed URL, for handing to the HTTP client.
    pub(crate) fn as_inner(&self) -> &url::Url {
        &self.inner
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full())
    }
}

impl std::str::FromStr for Url {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        Url::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_https_url() {
        let url = Url::parse("https://example.com/file.zip").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.port(), None);
        assert_eq!(url.path(), "/file.zip");
        assert_eq!(url.query(), "");
        assert_eq!(url.fragment(), "");
        assert_eq!(url.filename(), "file.zip");
        assert!(url.is_secure());
    }

    #[test]
    fn parses_explicit_port() {
        let url = Url::parse("http://example.com:8080/path").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "/path");
        assert_eq!(url.filename(), "path");
        assert!(!url.is_secure());
    }

    #[test]
    fn parses_query_and_fragment() {
        let url = Url::parse("https://example.com/file.zip?v=1#sec").unwrap();
        assert_eq!(url.query(), "v=1");
        assert_eq!(url.fragment(), "sec");
        assert_eq!(url.filename(), "file.zip");
    }

    #[test]
    fn trailing_slash_falls_back_to_index() {
        let url = Url::parse("https://example.com/folder/").unwrap();
        assert_eq!(url.path(), "/folder/");
        assert_eq!(url.filename(), "index.html");

        let root = Url::parse("https://example.com").unwrap();
        assert_eq!(root.path(), "/");
        assert_eq!(root.filename(), "index.html");
    }

    #[test]
    fn deep_paths_keep_last_segment() {
        let url = Url::parse("https://cdn.example.com/downloads/v1.2/files/archive.zip").unwrap();
        assert_eq!(url.path(), "/downloads/v1.2/files/archive.zip");
        assert_eq!(url.filename(), "archive.zip");

        let php = Url::parse("https://example.com/download.php?id=123").unwrap();
        assert_eq!(php.filename(), "download.php");
    }

    #[test]
    fn rejects_relative_and_empty_input() {
        let err = Url::parse("example.com/file.zip").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);

        let err = Url::parse("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }

    #[test]
    fn default_ports() {
        assert_eq!(Url::parse("https://example.com").unwrap().default_port(), 443);
        assert_eq!(Url::parse("http://example.com").unwrap().default_port(), 80);
        assert_eq!(Url::parse("ftp://example.com").unwrap().default_port(), 0);
    }

    #[test]
    fn full_and_base_round_trip() {
        let url = Url::parse("https://example.com:8443/a/b.bin?x=1#frag").unwrap();
        assert_eq!(url.base(), "https://example.com:8443");
        assert_eq!(url.full(), "https://example.com:8443/a/b.bin?x=1#frag");
    }
}
