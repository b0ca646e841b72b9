//! HTTP layer: transport seam, browser identity, response classification
//! and the retrying fetcher used by every crawler.

mod request;
mod response;
mod retry;
#[cfg(test)]
pub(crate) mod scripted;
mod transport;
mod user_agent;

pub use request::{FetchRequest, HttpMethod};
pub use response::{classify, Classification, FailureKind, FetchOutcome, ANTI_BOT_MARKERS};
pub use retry::{FetchError, FetchPolicy, RetryableFetcher};
pub use transport::{
    ReqwestTransport, ReqwestTransportBuilder, Transport, TransportError, TransportResponse,
};
pub use user_agent::{resolve_user_agent, BROWSER_HEADERS, CHROME_USER_AGENT};
