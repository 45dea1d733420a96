//! Scripted transport for integration tests: each `start` call pops the next
//! script and plays it back as transport events, recording the request it was
//! given.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqflow::{Transport, TransportErrorCode, TransportEvent, TransportHandle, TransportRequest};
use tokio::sync::mpsc;

#[derive(Clone)]
#[allow(dead_code)]
pub enum Step {
    /// Wait before the next event.
    Delay(Duration),
    Header(Bytes),
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
    /// Never deliver a terminal event; hold the channel open until the
    /// attempt is cancelled.
    Stall,
}

#[allow(dead_code)]
pub fn success(status: u16, body: &'static [u8]) -> Vec<Step> {
    vec![Step::Success {
        status,
        body: Bytes::from_static(body),
        headers: vec![("Content-Type".to_owned(), "text/plain".to_owned())],
    }]
}

#[allow(dead_code)]
pub fn failure(code: TransportErrorCode) -> Vec<Step> {
    vec![Step::Error {
        code,
        message: "scripted failure".to_owned(),
    }]
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<TransportRequest>>,
    attempts: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(scripts: impl IntoIterator<Item = Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, request: TransportRequest) -> TransportHandle {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        let steps = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| vec![Step::Stall]);

        let (events, handle_events) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Delay(delay) => tokio::time::sleep(delay).await,
                    Step::Header(frame) => {
                        if events.send(TransportEvent::Header(frame)).await.is_err() {
                            return;
                        }
                    }
                    Step::Data(chunk) => {
                        if events.send(TransportEvent::Data(chunk)).await.is_err() {
                            return;
                        }
                    }
                    Step::Success {
                        status,
                        body,
                        headers,
                    } => {
                        let _ = events
                            .send(TransportEvent::Success {
                                status,
                                body,
                                headers,
                            })
                            .await;
                        return;
                    }
                    Step::Error { code, message } => {
                        let _ = events.send(TransportEvent::Error { code, message }).await;
                        return;
                    }
                    Step::Stall => {
                        events.closed().await;
                        return;
                    }
                }
            }
            // Script ran out without a terminal event; hold the attempt open
            // until it is cancelled.
            events.closed().await;
        });
        TransportHandle::detached(handle_events)
    }
}
