#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod config;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod rate_limit;
pub mod retry;
pub(crate) mod serde_helpers;
pub mod types;
#[cfg(feature = "ws")]
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Default REST API base URL
pub const DEFAULT_BASE_URL: &str = "https://public-api.etoro.com";

/// Default streaming endpoint
pub const DEFAULT_WS_URL: &str = "wss://ws.etoro.com/ws";

/// Path prefix shared by every REST endpoint, e.g. `{API_PREFIX}/market-data/instruments`
pub const API_PREFIX: &str = "/api/v1";

/// Trait for converting request types to URL query parameters.
///
/// This trait is automatically implemented for all types that implement [`serde::Serialize`].
/// It uses [`serde_html_form`] to serialize the struct fields into a query string.
/// Arrays are serialized as repeated keys (`key=val1&key=val2`) and `None` fields are skipped.
#[cfg(feature = "http")]
pub trait ToQueryParams: serde::Serialize {
    /// Converts the request to a URL query string.
    ///
    /// Returns an empty string if no parameters are set, otherwise returns
    /// a string starting with `?` followed by URL-encoded key-value pairs.
    fn query_params(&self) -> String {
        let params = serde_html_form::to_string(self)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to convert to URL-encoded string {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_html_form::ser::Error = e;
            })
            .unwrap_or_default();

        if params.is_empty() {
            String::new()
        } else {
            format!("?{params}")
        }
    }
}

#[cfg(feature = "http")]
impl<T: serde::Serialize + ?Sized> ToQueryParams for T {}
