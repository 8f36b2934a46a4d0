//! Error types for calameo2pdf.
//!
//! [`BookError`] covers everything that can go wrong while processing one
//! book. The downloader catches it, logs it against the book URL and moves on
//! to the next book.
//!
//! [`ConfigError`] is fatal: without a usable configuration there is no run.

use std::path::PathBuf;
use thiserror::Error;

/// Per-book failure. Never aborts the whole run.
#[derive(Debug, Error)]
pub enum BookError {
    /// The server answered 404 for the landing page or a page asset.
    #[error("page not found: '{url}'")]
    NotFound { url: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status} while fetching '{url}'")]
    Http { url: String, status: u16 },

    /// The request never produced a status (DNS, TLS, timeout, reset...).
    #[error("request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// Required meta tags are missing or the description does not match the
    /// expected labelled pattern.
    #[error("could not read book metadata: {reason}")]
    MetadataParse { reason: String },

    /// A staged page asset could not be decoded during assembly.
    #[error("page asset '{path}' is unreadable: {detail}")]
    AssetDecode { path: PathBuf, detail: String },

    /// Building or serializing a PDF failed.
    #[error("PDF error: {detail}")]
    Pdf { detail: String },

    /// The written document does not hold the number of pages announced by
    /// the landing page.
    #[error("assembled document has {actual} pages, expected {expected}")]
    PageCountMismatch { expected: usize, actual: usize },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BookError {
    pub(crate) fn metadata(reason: impl Into<String>) -> Self {
        BookError::MetadataParse {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BookError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn pdf(detail: impl std::fmt::Display) -> Self {
        BookError::Pdf {
            detail: detail.to_string(),
        }
    }
}

/// Fatal configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("book_list entry '{url}' is not a valid http(s) URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid HTTP header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("timeout must be zero or a positive number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_mentions_status_and_url() {
        let err = BookError::Http {
            url: "https://example.com/p3.jpg".into(),
            status: 503,
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("p3.jpg"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;
        let err = BookError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(err.source().is_some());
    }
}
