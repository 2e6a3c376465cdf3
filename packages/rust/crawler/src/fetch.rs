//! Product page fetching for search enrichment.
//!
//! Fetches are best-effort: any failure is logged and reported as `None` so
//! the caller can fall back to search-provided content.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::{Attempt, Policy};
use scorchbook_shared::{CrawlConfig, Result, ScorchbookError};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::readable::truncate_chars;

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("scorchbook-agent/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per page.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP client for product pages with a per-page timeout, a body cap, and
/// SSRF protection on every hop.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
    max_html_chars: usize,
    allow_private: bool,
}

impl PageFetcher {
    /// Create a fetcher from the `[crawl]` config section.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let allow_private = config.allow_private_hosts;
        let timeout = Duration::from_millis(config.page_timeout_ms);
        Ok(Self {
            client: build_client(allow_private, timeout)?,
            timeout,
            max_html_chars: config.max_html_chars,
            allow_private,
        })
    }

    /// Allow fetching localhost/private IPs (integration tests against mock servers).
    pub fn allow_localhost(mut self) -> Self {
        if let Ok(client) = build_client(true, self.timeout) {
            self.client = client;
            self.allow_private = true;
        }
        self
    }

    /// Fetch a page's HTML, truncated to the configured character cap.
    ///
    /// Returns `None` on invalid or blocked URLs, non-2xx statuses,
    /// timeouts, and transport errors.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_html(&self, url: &str) -> Option<String> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(reason = "invalid_url", url, error = %e, "agent.search.fetch.failed");
                return None;
            }
        };
        if !self.allow_private && is_ssrf_target(&parsed) {
            warn!(reason = "blocked_host", url, "agent.search.fetch.failed");
            return None;
        }

        debug!("fetching page");
        let response = match self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() { "timeout" } else { "network_error" };
                warn!(reason, url, error = %e, "agent.search.fetch.failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), url, "agent.search.fetch.failed");
            return None;
        }

        match response.text().await {
            Ok(body) => Some(truncate_chars(&body, self.max_html_chars).to_string()),
            Err(e) => {
                let reason = if e.is_timeout() { "timeout" } else { "network_error" };
                warn!(reason, url, error = %e, "agent.search.fetch.failed");
                None
            }
        }
    }
}

fn build_client(allow_private: bool, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy(allow_private))
        .timeout(timeout)
        .build()
        .map_err(|e| ScorchbookError::Network(format!("failed to build HTTP client: {e}")))
}

fn redirect_policy(allow_private: bool) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private && is_ssrf_target(attempt.url()) {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}
