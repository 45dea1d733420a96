use http::Method;
use thiserror::Error;

use crate::classify::classify;

/// Transport-level failure codes reported by a [`Transport`](crate::Transport)
/// implementation. The orchestrator never interprets these directly; it maps
/// them through [`classify`](crate::classify::classify) to an HTTP-like status
/// and a retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorCode {
    /// The transport rejected the request URL outright.
    MalformedUrl,
    /// A raw transport option override was not recognized or had an invalid
    /// value. Fatal for the attempt that carried it.
    BadOption,
    /// Redirect chain exceeded the transport's limit.
    TooManyRedirects,
    /// The attempt did not complete within its time budget.
    TimedOut,
    /// TCP-level connection could not be established.
    ConnectFailed,
    /// The peer asked the client to back off.
    Throttled,
    /// TLS handshake or certificate verification failure.
    TlsFailed,
    /// The transport terminated without delivering a terminal event.
    Interrupted,
    /// Malformed wire data from the peer.
    Protocol,
    /// Socket-level read/write failure.
    Io,
    Other,
}

impl std::fmt::Display for TransportErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::MalformedUrl => "malformed_url",
            Self::BadOption => "bad_option",
            Self::TooManyRedirects => "too_many_redirects",
            Self::TimedOut => "timed_out",
            Self::ConnectFailed => "connect_failed",
            Self::Throttled => "throttled",
            Self::TlsFailed => "tls_failed",
            Self::Interrupted => "interrupted",
            Self::Protocol => "protocol",
            Self::Io => "io",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable machine-readable identifier for each [`Error`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    BadUrl,
    BadMethod,
    SerializeJson,
    SerializeForm,
    Transport,
    Aborted,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadUrl => "bad_url",
            Self::BadMethod => "bad_method",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::Transport => "transport",
            Self::Aborted => "aborted",
        }
    }
}

/// Terminal error for a logical request. Exactly one of these (or a
/// [`Response`](crate::Response)) reaches the completion callback, no matter
/// how many attempts were spent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url: {url:?}")]
    BadUrl { url: String },
    #[error("invalid request method: {method:?}")]
    BadMethod { method: String },
    #[error("failed to serialize request json payload: {message}")]
    Serialize { message: String },
    #[error("failed to serialize request form payload: {message}")]
    SerializeForm { message: String },
    #[error("transport error ({code}) for {method} {url}: {message}")]
    Transport {
        code: TransportErrorCode,
        status: u16,
        method: Method,
        url: String,
        message: String,
    },
    #[error("request aborted by client")]
    Aborted,
}

impl Error {
    pub(crate) fn transport(
        code: TransportErrorCode,
        method: &Method,
        url: &url::Url,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            code,
            status: classify(code).status,
            method: method.clone(),
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BadUrl { .. } => ErrorCode::BadUrl,
            Self::BadMethod { .. } => ErrorCode::BadMethod,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Aborted => ErrorCode::Aborted,
        }
    }

    /// HTTP-like status describing this error: 400 for configuration errors,
    /// 499 for client aborts, and the classified status for transport
    /// failures.
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadUrl { .. }
            | Self::BadMethod { .. }
            | Self::Serialize { .. }
            | Self::SerializeForm { .. } => 400,
            Self::Transport { status, .. } => *status,
            Self::Aborted => 499,
        }
    }

    /// The transport failure code, when this error came out of an attempt.
    pub const fn transport_code(&self) -> Option<TransportErrorCode> {
        match self {
            Self::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { code, .. } => classify(*code).retriable,
            _ => false,
        }
    }
}
