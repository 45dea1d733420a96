//! The consumed transport capability. A [`Transport`] performs exactly one
//! physical attempt per [`start`](Transport::start) call and reports progress
//! as a stream of [`TransportEvent`]s. The orchestrator owns sequencing,
//! retries, and timers; the transport owns sockets, TLS, and redirects.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportErrorCode;

/// A caller-supplied raw transport option override, forwarded opaquely. The
/// transport validates these; an unknown or invalid option must be reported
/// as an immediate terminal [`TransportEvent::Error`] with
/// [`TransportErrorCode::BadOption`].
#[derive(Clone, Debug, PartialEq)]
pub enum RawOptionValue {
    Text(String),
    Number(i64),
    Flag(bool),
}

/// Fully-resolved wire-level request for one attempt. Built fresh by the
/// attempt runner; a transport must never observe two attempts of the same
/// logical request concurrently.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub url: Url,
    pub method: Method,
    /// Ordered header list, already merged and host-injected.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Per-attempt time budget. The orchestrator enforces it too; transports
    /// that can abort earlier (e.g. on connect) should honor it themselves.
    pub timeout: Duration,
    pub follow_redirect: bool,
    pub max_redirects: u32,
    pub proxy: Option<String>,
    pub reject_unauthorized: bool,
    pub reject_unauthorized_proxy: bool,
    pub keep_alive: bool,
    pub no_store: bool,
    pub raw_options: BTreeMap<String, RawOptionValue>,
}

/// Events emitted by a transport for one attempt. At most one terminal event
/// (`Success` xor `Error`) may be sent per handle; the attempt runner guards
/// against violations by ignoring everything after the first terminal.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// One raw response header frame, as received off the wire.
    Header(Bytes),
    /// One chunk of response body data.
    Data(Bytes),
    Success {
        status: u16,
        body: Bytes,
        headers: Vec<(String, String)>,
    },
    Error {
        code: TransportErrorCode,
        message: String,
    },
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle to one in-flight attempt: an event receiver plus a cancel hook.
/// Dropping the handle cancels the attempt.
pub struct TransportHandle {
    events: mpsc::Receiver<TransportEvent>,
    cancel: Option<CancelFn>,
}

impl TransportHandle {
    pub fn new(events: mpsc::Receiver<TransportEvent>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with no cancel hook, for transports whose attempt task exits
    /// on its own when the receiver is dropped.
    pub fn detached(events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            events,
            cancel: None,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.events.close();
    }

    pub(crate) async fn event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// One physical attempt per `start` call. Implementations deliver zero or
/// more `Header`/`Data` events followed by exactly one terminal event, and
/// stop promptly when the handle is cancelled or dropped.
pub trait Transport: Send + Sync {
    fn start(&self, request: TransportRequest) -> TransportHandle;
}
