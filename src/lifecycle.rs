//! The request lifecycle state machine: attempt sequencing, the overall
//! deadline and retry backoff timers, abort semantics, and the exactly-once
//! completion guarantee for the whole logical request.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::Method;
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::attempt::{AttemptObservers, run_attempt};
use crate::config::RequestConfig;
use crate::error::Error;
use crate::response::Response;
use crate::sink::{BodySink, SinkFanOut};
use crate::transport::Transport;
use crate::util::lock_unpoisoned;

type CompletionCallback = Box<dyn FnOnce(Result<Response, Error>) + Send + 'static>;

/// Take-once latch around the completion callback. The first `settle` wins;
/// every later signal (timer fire, transport terminal, repeated abort) is a
/// no-op. The callback is invoked outside the lock, so settling again from
/// inside the callback is safe.
struct CompletionSlot {
    callback: Mutex<Option<CompletionCallback>>,
}

impl CompletionSlot {
    fn new(callback: CompletionCallback) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(Some(callback)),
        })
    }

    fn settle(&self, outcome: Result<Response, Error>) -> bool {
        let callback = lock_unpoisoned(&self.callback).take();
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    fn is_settled(&self) -> bool {
        lock_unpoisoned(&self.callback).is_none()
    }
}

/// Everything the driver task needs; held by the handle until `send`.
struct PendingRequest {
    config: RequestConfig,
    url: Url,
    method: Method,
    transport: Arc<dyn Transport>,
    observers: AttemptObservers,
    fan_out: SinkFanOut,
}

struct HandleShared {
    completion: Arc<CompletionSlot>,
    abort: watch::Sender<bool>,
    sent: AtomicBool,
    pending: Mutex<Option<PendingRequest>>,
}

/// Entry point for logical requests over a pluggable [`Transport`].
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Starts one logical request. The callback fires exactly once, always:
    /// on terminal success (including a "bad" status, delivered unchanged),
    /// on the final attempt's error after retries are exhausted, on abort
    /// (status 499), or immediately-asynchronously on invalid configuration.
    ///
    /// Unless the config requested `wait`, the request is sent before this
    /// returns; with `wait`, register sinks and observers on the handle and
    /// then call [`RequestHandle::send`]. Must be called within a tokio
    /// runtime.
    pub fn request(
        &self,
        mut config: RequestConfig,
        callback: impl FnOnce(Result<Response, Error>) + Send + 'static,
    ) -> RequestHandle {
        let completion = CompletionSlot::new(Box::new(callback));

        let mut fan_out = SinkFanOut::default();
        for sink in config.sinks.drain(..) {
            fan_out.register(sink);
        }

        let url = if config.url.trim().is_empty() {
            Err(Error::BadUrl {
                url: config.url.clone(),
            })
        } else {
            Url::parse(config.url.trim()).map_err(|_| Error::BadUrl {
                url: config.url.clone(),
            })
        };
        let url = match url {
            Ok(url) => url,
            Err(error) => return RequestHandle::invalid(completion, error, fan_out),
        };

        // Normalize the method to uppercase before parsing.
        let method_text = config.method.trim().to_ascii_uppercase();
        let method = match Method::from_bytes(method_text.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return RequestHandle::invalid(
                    completion,
                    Error::BadMethod {
                        method: config.method.clone(),
                    },
                    fan_out,
                );
            }
        };

        let wait = config.wait;
        let handle = RequestHandle {
            inner: Arc::new(HandleShared {
                completion,
                abort: watch::Sender::new(false),
                sent: AtomicBool::new(false),
                pending: Mutex::new(Some(PendingRequest {
                    config,
                    url,
                    method,
                    transport: Arc::clone(&self.transport),
                    observers: AttemptObservers::none(),
                    fan_out,
                })),
            }),
        };
        if !wait {
            handle.send();
        }
        handle
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Caller-facing handle to one logical request.
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleShared>,
}

impl RequestHandle {
    /// Handle for a request that failed validation: registered sinks are
    /// destroyed, the terminal callback is scheduled asynchronously, and no
    /// transport attempt ever starts.
    fn invalid(completion: Arc<CompletionSlot>, error: Error, mut fan_out: SinkFanOut) -> Self {
        fan_out.destroy_all(&error);
        let slot = Arc::clone(&completion);
        tokio::spawn(async move {
            slot.settle(Err(error));
        });
        Self {
            inner: Arc::new(HandleShared {
                completion,
                abort: watch::Sender::new(false),
                sent: AtomicBool::new(true),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Registers a consumer sink. Sinks must be registered before the
    /// request is sent; later registrations are ignored.
    pub fn pipe(&self, sink: impl BodySink + 'static) -> &Self {
        match lock_unpoisoned(&self.inner.pending).as_mut() {
            Some(pending) => pending.fan_out.register(Box::new(sink)),
            None => warn!("ignoring sink registered after the request was sent"),
        }
        self
    }

    /// Observer for response body chunks, invoked before sink fan-out.
    pub fn on_data(&self, observer: impl FnMut(&Bytes) + Send + 'static) -> &Self {
        match lock_unpoisoned(&self.inner.pending).as_mut() {
            Some(pending) => pending.observers.on_data = Some(Box::new(observer)),
            None => warn!("ignoring data observer registered after the request was sent"),
        }
        self
    }

    /// Observer for raw response header frames.
    pub fn on_header(&self, observer: impl FnMut(&Bytes) + Send + 'static) -> &Self {
        match lock_unpoisoned(&self.inner.pending).as_mut() {
            Some(pending) => pending.observers.on_header = Some(Box::new(observer)),
            None => warn!("ignoring header observer registered after the request was sent"),
        }
        self
    }

    /// Starts the attempt sequence. Idempotent: a second call is a no-op
    /// returning the same handle.
    pub fn send(&self) -> &Self {
        if self.inner.sent.swap(true, Ordering::SeqCst) {
            return self;
        }
        let Some(pending) = lock_unpoisoned(&self.inner.pending).take() else {
            return self;
        };
        let completion = Arc::clone(&self.inner.completion);
        let abort_rx = self.inner.abort.subscribe();
        tokio::spawn(drive(pending, completion, abort_rx));
        self
    }

    /// Aborts the logical request. Idempotent and callable at any time:
    /// before `send`, after completion, or from within the completion
    /// callback. If the request has not finished, the callback fires with
    /// [`Error::Aborted`] (status 499); any in-flight attempt is cancelled
    /// and registered sinks are destroyed.
    pub fn abort(&self) {
        self.inner.abort.send_replace(true);
        // Not yet sent: the sinks are still ours to tear down.
        if let Some(mut pending) = lock_unpoisoned(&self.inner.pending).take() {
            pending.fan_out.destroy_all(&Error::Aborted);
        }
        if self.inner.completion.settle(Err(Error::Aborted)) {
            debug!("request aborted before completion");
        }
    }

    /// True once the completion callback has fired (or been taken by abort).
    pub fn is_finished(&self) -> bool {
        self.inner.completion.is_settled()
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestHandle")
            .field("sent", &self.inner.sent.load(Ordering::SeqCst))
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Resolves once an abort has been requested; pends forever if the handle
/// (and with it the abort channel) is gone.
async fn wait_for_abort(abort_rx: &mut watch::Receiver<bool>) {
    if abort_rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Whether this attempt outcome may be retried, before the retry budget is
/// consulted. Transport errors retry on their classification alone; a
/// completed transport with a bad status retries only while more than one
/// retry remains; the last retry is reserved for hard transport errors.
fn retry_eligible(
    outcome: &Result<Response, Error>,
    remaining_retries: usize,
    config: &RequestConfig,
) -> bool {
    match outcome {
        Err(error) => error.is_retriable(),
        Ok(response) => {
            let status = response.status_code();
            (config.check_bad_status(status) || status >= 500) && remaining_retries > 1
        }
    }
}

/// The driver task for one logical request. Owns the lifecycle state: the
/// overall deadline, the backoff timer, the remaining-retry count, and the
/// in-flight attempt. Attempts are strictly sequential; every exit path
/// settles the completion slot (first settle wins) and drops both timers.
async fn drive(
    pending: PendingRequest,
    completion: Arc<CompletionSlot>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let PendingRequest {
        config,
        url,
        method,
        transport,
        mut observers,
        mut fan_out,
    } = pending;

    let deadline = tokio::time::sleep(config.overall_deadline());
    tokio::pin!(deadline);

    let mut remaining_retries = config.effective_retries();
    let max_attempts = remaining_retries + 1;
    let mut attempt = 1_usize;

    enum Step {
        Outcome(Result<Response, Error>),
        Halt,
    }

    loop {
        let span = info_span!(
            "reqflow.request",
            method = %method,
            url = %url,
            attempt,
            max_attempts,
            debug = config.debug,
        );

        let step = {
            let attempt_future = run_attempt(
                transport.as_ref(),
                &config,
                &url,
                &method,
                &mut observers,
                &mut fan_out,
            )
            .instrument(span);
            tokio::pin!(attempt_future);
            tokio::select! {
                _ = wait_for_abort(&mut abort_rx) => Step::Halt,
                _ = &mut deadline => {
                    debug!(method = %method, url = %url, "overall deadline exceeded; aborting request");
                    Step::Halt
                }
                outcome = &mut attempt_future => Step::Outcome(outcome),
            }
        };

        let outcome = match step {
            Step::Halt => {
                fan_out.destroy_all(&Error::Aborted);
                completion.settle(Err(Error::Aborted));
                return;
            }
            Step::Outcome(outcome) => outcome,
        };

        if retry_eligible(&outcome, remaining_retries, &config) && remaining_retries > 0 {
            remaining_retries -= 1;
            attempt += 1;
            debug!(
                method = %method,
                url = %url,
                delay_ms = config.retry_delay.as_millis() as u64,
                remaining_retries,
                "attempt failed; scheduling retry"
            );
            let halted = tokio::select! {
                _ = wait_for_abort(&mut abort_rx) => true,
                _ = &mut deadline => true,
                _ = tokio::time::sleep(config.retry_delay) => false,
            };
            if halted {
                fan_out.destroy_all(&Error::Aborted);
                completion.settle(Err(Error::Aborted));
                return;
            }
            continue;
        }

        if completion.settle(outcome) {
            debug!(method = %method, url = %url, attempt, "request finished");
        }
        return;
    }
}
