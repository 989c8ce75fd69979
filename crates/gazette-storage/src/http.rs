use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// How long to pause when a remote answers 429.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub default_wait: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(10),
        }
    }
}

impl RateLimitPolicy {
    pub fn wait_for(&self, suggested: Option<Duration>) -> Duration {
        suggested.unwrap_or(self.default_wait)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub rate_limit: RateLimitPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Outcome of one try inside [`retry_while_rate_limited`].
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    RateLimited(Option<Duration>),
}

/// Server-suggested pause from a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs = raw.parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Repeats `attempt` until it stops reporting a rate limit, sleeping the
/// suggested wait in between. There is no retry cap; throttling always ends.
pub async fn retry_while_rate_limited<T, E, F, Fut>(
    policy: RateLimitPolicy,
    label: &str,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, E>>,
{
    loop {
        match attempt().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::RateLimited(suggested) => {
                let wait = policy.wait_for(suggested);
                warn!(target_call = label, wait_secs = wait.as_secs_f64(), "rate limited; backing off");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Thin reqwest wrapper shared by the feed and the sinks.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    rate_limit: RateLimitPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            rate_limit: config.rate_limit,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends the request produced by `build`, rebuilding and resending it for as
    /// long as the server answers 429. Other statuses are returned as-is.
    pub async fn send_rate_limited<F>(
        &self,
        label: &str,
        build: F,
    ) -> Result<reqwest::Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Sync,
    {
        let build = &build;
        let client = &self.client;
        retry_while_rate_limited(self.rate_limit, label, move || async move {
            let resp = build(client).send().await?;
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                return Ok::<_, FetchError>(Attempt::RateLimited(retry_after(resp.headers())));
            }
            Ok(Attempt::Done(resp))
        })
        .await
    }

    /// Single POST; any non-success status is an error.
    pub async fn post_json<B: Serialize + ?Sized + Sync>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<FetchedResponse, FetchError> {
        let resp = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse { status, body })
    }
}
