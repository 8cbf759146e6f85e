//! Page fetching behind a trait so the engine can be driven by a fake in
//! tests and by a headless-browser implementation later.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pricewatch_core::{ExtractionTarget, PipelineConfig};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER, USER_AGENT,
};
use url::Url;

use crate::agents::UserAgentPool;
use crate::error::ScrapeError;
use crate::validate::{is_public_ip, validate_target_url};

/// A fetched page, before any triage.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
}

/// Fetches one product page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Retrieves the target's page. Transport-level failures (DNS, connect,
    /// timeout) are errors; HTTP error statuses are returned as results and
    /// triaged by the caller.
    async fn fetch(&self, target: &ExtractionTarget) -> Result<FetchResult, ScrapeError>;
}

/// Plain HTTP fetcher on a pooled [`reqwest::Client`].
///
/// Every fetch first passes URL safety validation, including a DNS check
/// that the hostname resolves to a public address. Each domain gets a
/// sticky user agent from the pool; block responses rotate it.
///
/// Sends browser-like headers; sites that require script execution need a
/// browser-backed [`PageFetcher`] instead. `wait_hint` is ignored here since
/// there is no render step to wait on.
pub struct HttpFetcher {
    client: reqwest::Client,
    agents: UserAgentPool,
    timeout: Duration,
    allow_private: bool,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns [`ScrapeError::Http`] if the underlying client cannot be built.
    pub fn new(config: &PipelineConfig) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-CA,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.fetch_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            agents: UserAgentPool::new(config.user_agent.clone()),
            timeout: config.fetch_timeout,
            allow_private: config.allow_private_targets,
        })
    }

    /// Resolves the hostname and rejects targets that point into private
    /// address space, so a crafted tracked URL cannot reach internal
    /// services.
    async fn check_resolved_addresses(&self, url: &Url, raw: &str) -> Result<(), ScrapeError> {
        let Some(host) = url.host_str() else {
            return Ok(());
        };
        if url.domain().is_none() {
            // Address literals were already vetted during validation.
            return Ok(());
        }
        let Some(port) = url.port_or_known_default() else {
            return Ok(());
        };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ScrapeError::Dns {
                host: host.to_owned(),
                source: e,
            })?
            .collect();
        if addrs.iter().any(|addr| !is_public_ip(addr.ip())) {
            return Err(ScrapeError::UnroutableAddress {
                url: raw.to_owned(),
                host: host.to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, target: &ExtractionTarget) -> Result<FetchResult, ScrapeError> {
        let url = validate_target_url(&target.url, self.allow_private)?;
        if !self.allow_private {
            self.check_resolved_addresses(&url, &target.url).await?;
        }

        let agent = self.agents.agent_for(&target.domain);
        let mut request = self.client.get(url.clone());
        if let Ok(value) = HeaderValue::from_str(&agent) {
            request = request.header(USER_AGENT, value);
        }
        // Same-origin referer reads as in-site navigation.
        if let Some(host) = url.host_str() {
            let origin = format!("{}://{host}/", url.scheme());
            if let Ok(value) = HeaderValue::from_str(&origin) {
                request = request.header(REFERER, value);
            }
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::FetchTimeout {
                    url: target.url.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                ScrapeError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => self.agents.report_success(&target.domain),
            403 | 429 => self.agents.report_failure(&target.domain),
            _ => {}
        }

        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchResult {
            final_url,
            status,
            body,
            elapsed: started.elapsed(),
        })
    }
}
