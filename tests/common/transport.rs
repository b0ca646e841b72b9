//! Canned-response transport for the integration tests.
//!
//! Replies are registered per method and URL; every request is recorded and
//! unknown URLs answer 404.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use orzeczenia::http_client::{
    FetchRequest, HttpMethod, Transport, TransportError, TransportResponse,
};
use orzeczenia::proxy::ProxyEndpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Respond(u16, String),
    Timeout,
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub form: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Default)]
struct Script {
    routes: HashMap<(HttpMethod, String), VecDeque<Scripted>>,
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

    pub fn on_get(&self, url: &str, status: u16, body: impl Into<String>) -> &Self {
        self.sequence(HttpMethod::Get, url, vec![Scripted::Respond(status, body.into())])
    }

    /// Replies consumed in order; the last one repeats.
    pub fn sequence(&self, method: HttpMethod, url: &str, replies: Vec<Scripted>) -> &Self {
        self.lock()
            .routes
            .insert((method, url.to_string()), replies.into_iter().collect());
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().log.clone()
    }

    pub fn hits(&self, url: &str) -> usize {
        self.lock().log.iter().filter(|r| r.url == url).count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
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
        let mut script = self.lock();
        script.log.push(RecordedRequest {
            method: request.method,
            url: request.url.clone(),
            form: request.encoded_form(),
            proxy: proxy.map(ProxyEndpoint::url),
        });

        let reply = match script.routes.get_mut(&(request.method, request.url.clone())) {
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
