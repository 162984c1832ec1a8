use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::retry::Classify;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to non-successful HTTP call
    Status,
    /// Error related to invalid input or configuration within etoro-client-sdk
    Validation,
    /// Credentials were rejected, or the WebSocket authentication handshake failed or timed out
    Authentication,
    /// The remote side rejected a request because of rate limiting
    RateLimit,
    /// Error related to WebSocket connections
    WebSocket,
    /// An operation did not complete within its deadline
    Timeout,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: u16,
        method: String,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    /// HTTP 401/403 from the REST API.
    pub fn unauthorized<S: Into<String>>(
        status_code: u16,
        method: String,
        path: String,
        message: S,
    ) -> Self {
        Self::with_source(
            Kind::Authentication,
            Status {
                status_code,
                method,
                path,
                message: message.into(),
            },
        )
    }

    #[must_use]
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        RateLimited { retry_after }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl Classify for Error {
    fn is_retryable(&self) -> bool {
        match self.kind {
            Kind::RateLimit => true,
            Kind::Status => self
                .downcast_ref::<Status>()
                .is_some_and(|status| status.status_code >= 500),
            #[cfg(feature = "http")]
            Kind::Internal => self
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_connect() || e.is_timeout()),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.downcast_ref::<RateLimited>()?.retry_after
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: u16,
    pub method: String,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// HTTP 429 from the REST API.
///
/// `retry_after` carries the `Retry-After` header, when the server sent one.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct RateLimited {
    pub retry_after: Option<Duration>,
}

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after {
            Some(wait) => write!(f, "rate limit exceeded, retry after {wait:?}"),
            None => write!(f, "rate limit exceeded"),
        }
    }
}

impl StdError for RateLimited {}

impl From<RateLimited> for Error {
    fn from(err: RateLimited) -> Self {
        Error::with_source(Kind::RateLimit, err)
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

#[cfg(feature = "http")]
impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_should_succeed() {
        let error = Error::status(502, "GET".to_owned(), "/api/v1/x".to_owned(), "bad gateway");

        assert_eq!(error.kind(), Kind::Status);
        assert_eq!(
            error.to_string(),
            "Status: error(502) making GET call to /api/v1/x with bad gateway"
        );
    }

    #[test]
    fn server_errors_are_retryable() {
        let error = Error::status(503, "GET".to_owned(), "/".to_owned(), "");
        assert!(error.is_retryable());

        let error = Error::status(404, "GET".to_owned(), "/".to_owned(), "");
        assert!(!error.is_retryable());
    }

    #[test]
    fn rate_limited_is_retryable_with_suggested_wait() {
        let error = Error::rate_limited(Some(Duration::from_secs(7)));

        assert_eq!(error.kind(), Kind::RateLimit);
        assert!(error.is_retryable());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn unauthorized_is_not_retryable() {
        let error = Error::unauthorized(401, "POST".to_owned(), "/".to_owned(), "nope");

        assert_eq!(error.kind(), Kind::Authentication);
        assert!(!error.is_retryable());
        assert_eq!(error.retry_after(), None);
    }

    #[test]
    fn validation_into_error_should_succeed() {
        let error = Error::validation("api_key must not be empty");

        assert_eq!(error.kind(), Kind::Validation);
        assert!(error.to_string().contains("api_key"));
        assert!(error.downcast_ref::<Validation>().is_some());
    }
}
