//! Response classification.

use std::fmt;

use super::transport::TransportResponse;

/// Body markers of challenge and block pages.
pub const ANTI_BOT_MARKERS: &[&str] = &[
    "<title>Połączenie odrzucone</title>",
    "The requested URL was rejected",
    "g-recaptcha",
    "cf-challenge",
    "/cdn-cgi/challenge-platform/",
];

/// Body markers of proxies reporting that the upstream refused the connection.
pub const REFUSED_MARKERS: &[&str] = &["ECONNREFUSED", "Connection refused"];

/// Why an attempt counted as a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-2xx status other than 404.
    Status(u16),
    Timeout,
    Network(String),
    ConnectionRefused,
    /// A challenge or block page; carries the marker that matched.
    AntiBot(&'static str),
    /// 2xx response without the body marker the caller expects.
    UnexpectedBody(String),
}

impl FailureKind {
    pub fn is_anti_bot(&self) -> bool {
        matches!(self, Self::AntiBot(_))
    }

    /// Last HTTP status seen, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "HTTP {}", status),
            Self::Timeout => write!(f, "timeout"),
            Self::Network(message) => write!(f, "network error: {}", message),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::AntiBot(marker) => write!(f, "anti-bot challenge ({})", marker),
            Self::UnexpectedBody(marker) => write!(f, "response body lacks {:?}", marker),
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// 404: the resource does not exist. Not retried.
    NotFound,
    Failure(FailureKind),
}

/// Classify a response. Block pages are detected before the status code is
/// looked at because they are often served with 200.
pub fn classify(response: &TransportResponse, expect_marker: Option<&str>) -> Classification {
    if let Some(marker) = ANTI_BOT_MARKERS
        .iter()
        .find(|marker| response.body.contains(**marker))
    {
        return Classification::Failure(FailureKind::AntiBot(*marker));
    }
    if REFUSED_MARKERS
        .iter()
        .any(|marker| response.body.contains(marker))
    {
        return Classification::Failure(FailureKind::ConnectionRefused);
    }

    match response.status {
        404 => Classification::NotFound,
        200..=299 => match expect_marker {
            Some(marker) if !response.body.contains(marker) => {
                Classification::Failure(FailureKind::UnexpectedBody(marker.to_string()))
            }
            _ => Classification::Success,
        },
        status => Classification::Failure(FailureKind::Status(status)),
    }
}

/// Terminal, non-error outcome of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(TransportResponse),
    NotFound(TransportResponse),
}

impl FetchOutcome {
    pub fn status(&self) -> u16 {
        match self {
            Self::Success(response) | Self::NotFound(response) => response.status,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Body of a successful response.
    pub fn into_body(self) -> Option<String> {
        match self {
            Self::Success(response) => Some(response.body),
            Self::NotFound(_) => None,
        }
    }
}
