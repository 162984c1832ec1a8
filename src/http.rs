//! Outbound REST request path.
//!
//! Every request passes through the client-side [`RateLimiter`] and is retried on transient
//! failures (5xx, 429, connection errors) with exponential backoff and jitter. A 429 response
//! penalizes the limiter for the server's `Retry-After` so every concurrent caller backs off.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::auth::Credentials;
use crate::config::Config;
use crate::error::Error;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryConfig, retry};
use crate::{Result, ToQueryParams as _, serde_helpers};

/// Authenticated HTTP client for the eToro REST API.
///
/// # Examples
///
/// ```rust,no_run
/// use etoro_client_sdk::API_PREFIX;
/// use etoro_client_sdk::config::Config;
/// use etoro_client_sdk::http::Client;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new(&Config::from_env()?)?;
///
///     let types: Option<serde_json::Value> = client
///         .get(&format!("{API_PREFIX}/market-data/instrument-types"))
///         .await?;
///     println!("{types:?}");
///
///     client.close();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    rate_limiter: Option<RateLimiter>,
    retry: RetryConfig<Error>,
}

impl Client {
    pub fn new(config: &Config) -> Result<Self> {
        Url::parse(&config.base_url)?;

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        let retry = RetryConfig::classified()
            .with_attempts(config.retry_attempts)
            .with_delay(config.retry_delay)
            .with_jitter(true)
            .on_retry(|attempt, wait, error: &Error| {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, ?wait, %error, "Retrying request");
                #[cfg(not(feature = "tracing"))]
                let _ = (attempt, wait, error);
            });

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            credentials: config.credentials.clone(),
            rate_limiter: config.rate_limit.map(RateLimiter::new),
            retry,
        })
    }

    /// Base URL all request paths are appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The client-side rate limiter, when throttling is enabled.
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Issue a request and decode its JSON body.
    ///
    /// `path` is appended to the base URL (e.g. `/api/v1/watchlists`). `query` is encoded with
    /// [`ToQueryParams`](crate::ToQueryParams) and `body` is sent as JSON. Returns `None` for
    /// `204 No Content` and empty bodies.
    pub async fn request<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let query = query.map(|q| q.query_params()).unwrap_or_default();
        let url = Url::parse(&format!("{}{path}{query}", self.base_url))?;
        let body = body.map(serde_json::to_value).transpose()?;

        let (method, url, body) = (&method, &url, body.as_ref());
        retry(
            || async move {
                if let Some(limiter) = &self.rate_limiter {
                    limiter.acquire().await;
                }
                self.execute(method, url, path, body).await
            },
            &self.retry,
        )
        .await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.request::<T, (), ()>(Method::GET, path, None, None).await
    }

    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.request::<T, Q, ()>(Method::GET, path, Some(query), None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, (), B>(Method::POST, path, None, Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, (), B>(Method::PUT, path, None, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.request::<T, (), ()>(Method::DELETE, path, None, None).await
    }

    /// Dispose the rate limiter; callers waiting in it are released immediately.
    pub fn close(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.dispose();
        }
    }

    fn headers(&self, request_id: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_str(request_id)?);

        let mut api_key = HeaderValue::from_str(self.credentials.api_key().expose_secret())?;
        api_key.set_sensitive(true);
        headers.insert("x-api-key", api_key);

        let mut user_key = HeaderValue::from_str(self.credentials.user_key().expose_secret())?;
        user_key.set_sensitive(true);
        headers.insert("x-user-key", user_key);

        Ok(headers)
    }

    /// One attempt: send, then map the status onto the error taxonomy.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip_all,
            fields(method = %method, path = %path, request_id, status_code)
        )
    )]
    async fn execute<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &Url,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<T>> {
        let request_id = Uuid::new_v4().to_string();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .headers(self.headers(&request_id)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        if status_code == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if status_code == StatusCode::UNAUTHORIZED || status_code == StatusCode::FORBIDDEN {
            return Err(Error::unauthorized(
                status_code.as_u16(),
                method.to_string(),
                path.to_owned(),
                format!("Authentication failed ({status_code})"),
            ));
        }

        if status_code == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);

            if let (Some(wait), Some(limiter)) = (retry_after, &self.rate_limiter) {
                limiter.penalize(wait);
            }

            #[cfg(feature = "tracing")]
            tracing::warn!(?retry_after, "Rate limited by API");

            return Err(Error::rate_limited(retry_after));
        }

        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();

            #[cfg(feature = "tracing")]
            tracing::warn!(
                status = %status_code,
                method = %method,
                path = %path,
                message = %message,
                "API request failed"
            );

            return Err(Error::status(
                status_code.as_u16(),
                method.to_string(),
                path.to_owned(),
                message,
            ));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let json_value: Value = serde_json::from_str(&text)?;
        serde_helpers::deserialize_with_warnings(json_value).map(Some)
    }
}

/// `Retry-After` in (possibly fractional) seconds. HTTP dates are not supported.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
