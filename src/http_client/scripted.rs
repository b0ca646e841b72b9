//! In-process transport that replays canned responses.
//!
//! Used to drive crawlers offline: responses are registered per method and
//! URL (POSTs may also be keyed by their form body), every request is
//! recorded, and unknown URLs answer 404.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::request::{FetchRequest, HttpMethod};
use super::transport::{Transport, TransportError, TransportResponse};
use crate::proxy::ProxyEndpoint;

/// A canned reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Respond(u16, String),
    Timeout,
    Refused,
}

impl Scripted {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Respond(200, body.into())
    }

    pub fn status(status: u16) -> Self {
        Self::Respond(status, String::new())
    }
}

/// A request as the transport received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub form: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Default)]
struct Script {
    /// Replies consumed in order; the last one repeats.
    routes: HashMap<String, VecDeque<Scripted>>,
    log: Vec<RecordedRequest>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every GET of `url` with `status` and `body`.
    pub fn on_get(&self, url: &str, status: u16, body: impl Into<String>) -> &Self {
        self.sequence(HttpMethod::Get, url, None, vec![Scripted::Respond(status, body.into())])
    }

    /// Answer POSTs of `url` whose form matches `fields` exactly.
    pub fn on_post(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        status: u16,
        body: impl Into<String>,
    ) -> &Self {
        let form = encode(fields.iter().map(|(k, v)| (*k, *v)));
        self.sequence(
            HttpMethod::Post,
            url,
            Some(&form),
            vec![Scripted::Respond(status, body.into())],
        )
    }

    /// Answer a URL with a sequence of replies; the last one repeats.
    pub fn sequence(
        &self,
        method: HttpMethod,
        url: &str,
        form: Option<&str>,
        replies: Vec<Scripted>,
    ) -> &Self {
        let mut script = self.lock();
        script
            .routes
            .insert(route_key(method, url, form), replies.into_iter().collect());
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().log.clone()
    }

    /// Number of requests for a URL (any method).
    pub fn hits(&self, url: &str) -> usize {
        self.lock().log.iter().filter(|r| r.url == url).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyEndpoint>,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let form = request.encoded_form();
        let mut script = self.lock();
        script.log.push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            form: form.clone(),
            proxy: proxy.map(ProxyEndpoint::url),
        });

        let exact = route_key(request.method, &request.url, form.as_deref());
        let loose = route_key(request.method, &request.url, None);
        let key = if script.routes.contains_key(&exact) {
            exact
        } else {
            loose
        };

        let reply = match script.routes.get_mut(&key) {
            Some(replies) if replies.len() > 1 => replies.pop_front(),
            Some(replies) => replies.front().cloned(),
            None => None,
        };

        match reply {
            Some(Scripted::Respond(status, body)) => Ok(TransportResponse { status, body }),
            Some(Scripted::Timeout) => Err(TransportError::Timeout),
            Some(Scripted::Refused) => Err(TransportError::Refused("scripted".into())),
            None => Ok(TransportResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

fn route_key(method: HttpMethod, url: &str, form: Option<&str>) -> String {
    match form {
        Some(form) => format!("{} {}#{}", method, url, form),
        None => format!("{} {}", method, url),
    }
}

fn encode<'a>(fields: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_reply() {
        let transport = ScriptedTransport::new();
        transport.sequence(
            HttpMethod::Get,
            "http://x/a",
            None,
            vec![Scripted::Timeout, Scripted::ok("done")],
        );
        let request = FetchRequest::get("http://x/a");
        let timeout = Duration::from_secs(1);

        assert!(transport.execute(&request, None, timeout).await.is_err());
        for _ in 0..2 {
            let response = transport.execute(&request, None, timeout).await.unwrap();
            assert_eq!(response.body, "done");
        }
        assert_eq!(transport.hits("http://x/a"), 3);
    }

    #[tokio::test]
    async fn test_post_routes_match_form() {
        let transport = ScriptedTransport::new();
        transport.on_post("http://x/search", &[("day", "1")], 200, "one");
        transport.on_post("http://x/search", &[("day", "2")], 200, "two");

        let request = FetchRequest::post_form("http://x/search", [("day", "2")]);
        let response = transport
            .execute(&request, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.body, "two");
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let transport = ScriptedTransport::new();
        let response = transport
            .execute(&FetchRequest::get("http://x/none"), None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }
}
