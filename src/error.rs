use std::net::SocketAddr;

use thiserror::Error;

/// Datagram socket failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("send to {dest} failed: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
    #[error("transport closed")]
    Closed,
}

/// Wire text that is neither a statement nor a registered token.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty message part")]
    Empty,
    #[error("unknown token: {0:?}")]
    UnknownToken(String),
    #[error("malformed statement {text:?}: {reason}")]
    MalformedStatement { text: String, reason: &'static str },
    #[error("invalid truth value {0:?}")]
    InvalidTruth(String),
    #[error("expected a judgment, got token {0:?}")]
    NotAJudgment(String),
}

/// Agent-side cycle failure.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("perception decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Bar source failures (HTTP, cache file, stream).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid symbol {symbol}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },
    #[error("API key and secret key are required")]
    MissingCredentials,
    #[error("stream error: {0}")]
    Stream(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            FetchError::Status { status, .. } => is_retryable_http_status(*status),
            _ => false,
        }
    }
}

/// Categorize HTTP status codes for retry decisions
pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(status,
        408 |   // Request Timeout
        429 |   // Too Many Requests
        500 |   // Internal Server Error
        502 |   // Bad Gateway
        503 |   // Service Unavailable
        504     // Gateway Timeout
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_http_status(429));
        assert!(is_retryable_http_status(503));
        assert!(!is_retryable_http_status(404));
        assert!(!is_retryable_http_status(401));
    }

    #[test]
    fn decode_error_is_wrapped_by_channel_error() {
        let err: ChannelError = DecodeError::Empty.into();
        assert!(matches!(err, ChannelError::Decode(DecodeError::Empty)));
    }
}
