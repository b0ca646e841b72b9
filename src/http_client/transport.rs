//! Network seam.
//!
//! [`Transport`] performs exactly one HTTP exchange; retries, proxy choice
//! and classification live in the fetcher above it.

use std::collections::{HashMap, HashSet};
use std::error::Error as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use thiserror::Error;
use tracing::debug;

use super::request::{FetchRequest, HttpMethod};
use super::user_agent::{resolve_user_agent, BROWSER_HEADERS};
use crate::proxy::ProxyEndpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// One HTTP exchange, optionally through a proxy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// The proxy pool was replaced; `current` is the new pool. Transports
    /// holding per-proxy state drop what belongs to removed proxies.
    fn proxies_changed(&self, _current: &[ProxyEndpoint]) {}
}

/// reqwest-backed transport.
///
/// reqwest binds proxies per client, so one client is kept per proxy (and
/// redirect policy). All clients share a cookie jar so search sessions
/// survive a proxy switch.
pub struct ReqwestTransport {
    user_agent: String,
    browser_headers: bool,
    cookies: Arc<Jar>,
    clients: Mutex<HashMap<(Option<String>, bool), Client>>,
}

pub struct ReqwestTransportBuilder {
    user_agent: Option<String>,
    browser_headers: bool,
}

impl ReqwestTransportBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Send Chrome navigation headers (on by default).
    pub fn browser_headers(mut self, enabled: bool) -> Self {
        self.browser_headers = enabled;
        self
    }

    pub fn build(self) -> ReqwestTransport {
        ReqwestTransport {
            user_agent: resolve_user_agent(self.user_agent.as_deref()),
            browser_headers: self.browser_headers,
            cookies: Arc::new(Jar::default()),
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder {
            user_agent: None,
            browser_headers: true,
        }
    }

    fn client(
        &self,
        proxy: Option<&ProxyEndpoint>,
        follow_redirects: bool,
    ) -> Result<Client, TransportError> {
        let key = (proxy.map(ProxyEndpoint::url), follow_redirects);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .cookie_provider(self.cookies.clone())
            .gzip(true)
            .brotli(true)
            .redirect(if follow_redirects {
                Policy::limited(10)
            } else {
                Policy::none()
            });

        if self.browser_headers {
            builder = builder.default_headers(browser_header_map());
        }
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy.url()).map_err(|e| {
                TransportError::Client(format!("invalid proxy {}: {}", proxy.redacted(), e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        debug!(
            "Created HTTP client (proxy: {}, redirects: {})",
            proxy.map(ProxyEndpoint::redacted).unwrap_or_else(|| "direct".into()),
            follow_redirects
        );
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Drop clients bound to proxies outside `current`.
    fn retain_proxies(&self, current: &[ProxyEndpoint]) {
        let current: HashSet<String> = current.iter().map(ProxyEndpoint::url).collect();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|(proxy, _), _| proxy.as_ref().map_or(true, |url| current.contains(url)));
        if clients.len() < before {
            debug!("Dropped {} HTTP client(s) of removed proxies", before - clients.len());
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.client(proxy, request.follow_redirects)?;

        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        }
        .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.encoded_form() {
            builder = builder
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }

    fn proxies_changed(&self, current: &[ProxyEndpoint]) {
        self.retain_proxies(current);
    }
}

fn browser_header_map() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for &(name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}

/// Flatten a reqwest error and its source chain into a transport error.
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout;
    }

    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(src) = source {
        message = format!("{}: {}", message, src);
        source = src.source();
    }

    if e.is_connect() && message.to_ascii_lowercase().contains("refused") {
        TransportError::Refused(message)
    } else {
        TransportError::Network(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_are_cached_per_proxy() {
        let transport = ReqwestTransport::builder().build();
        let proxy = ProxyEndpoint::new("127.0.0.1", 3128);

        transport.client(None, true).unwrap();
        transport.client(Some(&proxy), true).unwrap();
        transport.client(Some(&proxy), true).unwrap();
        transport.client(Some(&proxy), false).unwrap();

        assert_eq!(transport.clients.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_clients_of_removed_proxies_are_dropped() {
        let transport = ReqwestTransport::builder().build();
        let kept = ProxyEndpoint::new("127.0.0.1", 3128);
        let removed = ProxyEndpoint::new("127.0.0.2", 3128);

        transport.client(None, true).unwrap();
        transport.client(Some(&kept), true).unwrap();
        transport.client(Some(&removed), true).unwrap();
        transport.client(Some(&removed), false).unwrap();

        transport.proxies_changed(&[kept.clone()]);
        let clients = transport.clients.lock().unwrap();
        let mut proxies: Vec<_> = clients.keys().map(|(proxy, _)| proxy.clone()).collect();
        proxies.sort();
        assert_eq!(proxies, vec![None, Some(kept.url())]);
    }

    #[test]
    fn test_browser_header_map() {
        let headers = browser_header_map();
        assert_eq!(headers.len(), BROWSER_HEADERS.len());
        assert_eq!(headers["sec-fetch-mode"], "navigate");
    }
}
