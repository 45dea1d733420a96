//! One physical attempt, end to end: payload serialization, wire request
//! construction, transport event consumption, observer dispatch, and stream
//! fan-out. Produces exactly one outcome per run; the lifecycle decides what
//! to do with it.

use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::{Payload, RequestConfig};
use crate::error::{Error, TransportErrorCode};
use crate::response::Response;
use crate::sink::SinkFanOut;
use crate::transport::{Transport, TransportEvent, TransportRequest};
use crate::util::{has_header, host_header_value, normalize_headers, set_header};

pub(crate) struct AttemptObservers {
    pub(crate) on_header: Option<Box<dyn FnMut(&Bytes) + Send>>,
    pub(crate) on_data: Option<Box<dyn FnMut(&Bytes) + Send>>,
}

impl AttemptObservers {
    pub(crate) fn none() -> Self {
        Self {
            on_header: None,
            on_data: None,
        }
    }
}

/// Serialized payload plus the content type to inject when the caller has
/// not set one explicitly.
fn serialize_payload(payload: &Payload) -> Result<Option<(Bytes, &'static str)>, Error> {
    match payload {
        Payload::None => Ok(None),
        Payload::Json(value) => {
            let body = serde_json::to_vec(value).map_err(|source| Error::Serialize {
                message: source.to_string(),
            })?;
            Ok(Some((Bytes::from(body), "application/json")))
        }
        Payload::InvalidJson(message) => Err(Error::Serialize {
            message: message.clone(),
        }),
        Payload::Form(pairs) => {
            let body =
                serde_urlencoded::to_string(pairs).map_err(|source| Error::SerializeForm {
                    message: source.to_string(),
                })?;
            Ok(Some((
                Bytes::from(body),
                "application/x-www-form-urlencoded",
            )))
        }
        Payload::Raw { content_type: _, body } => {
            // Raw payloads carry their own content type (handled below) and
            // default to urlencoded like form payloads when they don't.
            Ok(Some((body.clone(), "application/x-www-form-urlencoded")))
        }
    }
}

/// Builds the fully-resolved wire request for one attempt: `Host` derived
/// from the URL, caller headers applied, `Content-Type`/`Content-Length`
/// injected for payloads unless explicitly set, and transport settings
/// passed through.
fn build_transport_request(
    config: &RequestConfig,
    url: &Url,
    method: &Method,
) -> Result<TransportRequest, Error> {
    let payload = serialize_payload(&config.payload)?;

    let mut headers = config.headers.clone();
    if !has_header(&headers, "host") {
        if let Some(host) = host_header_value(url) {
            set_header(&mut headers, "Host", host);
        }
    }

    let body = match payload {
        Some((body, default_content_type)) => {
            if !has_header(&headers, "content-type") {
                let content_type = match &config.payload {
                    Payload::Raw {
                        content_type: Some(explicit),
                        ..
                    } => explicit.clone(),
                    _ => default_content_type.to_owned(),
                };
                set_header(&mut headers, "Content-Type", content_type);
            }
            if !has_header(&headers, "content-length") {
                set_header(&mut headers, "Content-Length", body.len().to_string());
            }
            Some(body)
        }
        None => None,
    };

    Ok(TransportRequest {
        url: url.clone(),
        method: method.clone(),
        headers,
        body,
        timeout: config.timeout,
        follow_redirect: config.follow_redirect,
        max_redirects: config.max_redirects,
        proxy: config.proxy.clone(),
        reject_unauthorized: config.reject_unauthorized,
        reject_unauthorized_proxy: config.reject_unauthorized_proxy,
        keep_alive: config.keep_alive,
        no_store: config.no_store,
        raw_options: config.raw_options.clone(),
    })
}

/// Runs one attempt against the transport. A fresh transport handle is
/// started per call and never reused; dropping it (on any exit path) cancels
/// the underlying attempt, so a new attempt can never overlap a previous one.
///
/// The per-attempt timer bounds the transport phase only. Once the terminal
/// success event has arrived, sink completion is bounded by the lifecycle's
/// overall deadline instead.
pub(crate) async fn run_attempt(
    transport: &dyn Transport,
    config: &RequestConfig,
    url: &Url,
    method: &Method,
    observers: &mut AttemptObservers,
    fan_out: &mut SinkFanOut,
) -> Result<Response, Error> {
    // Serialization failures never reach the transport.
    let request = match build_transport_request(config, url, method) {
        Ok(request) => request,
        Err(error) => {
            fan_out.destroy_all(&error);
            return Err(error);
        }
    };

    let mut handle = transport.start(request);
    let attempt_timeout = tokio::time::sleep(config.timeout);
    tokio::pin!(attempt_timeout);

    let (status, body, raw_headers) = loop {
        tokio::select! {
            _ = &mut attempt_timeout => {
                handle.cancel();
                let error = Error::transport(
                    TransportErrorCode::TimedOut,
                    method,
                    url,
                    format!("attempt exceeded {}ms", config.timeout.as_millis()),
                );
                fan_out.destroy_all(&error);
                return Err(error);
            }
            event = handle.event() => match event {
                Some(TransportEvent::Header(frame)) => {
                    if let Some(observer) = observers.on_header.as_mut() {
                        observer(&frame);
                    }
                }
                Some(TransportEvent::Data(chunk)) => {
                    if let Some(observer) = observers.on_data.as_mut() {
                        observer(&chunk);
                    }
                    fan_out.write(&chunk).await;
                }
                Some(TransportEvent::Success { status, body, headers }) => {
                    break (status, body, headers);
                }
                Some(TransportEvent::Error { code, message }) => {
                    let error = Error::transport(code, method, url, message);
                    fan_out.destroy_all(&error);
                    return Err(error);
                }
                None => {
                    // Channel closed without a terminal event.
                    let error = Error::transport(
                        TransportErrorCode::Interrupted,
                        method,
                        url,
                        "transport ended without a terminal event",
                    );
                    fan_out.destroy_all(&error);
                    return Err(error);
                }
            }
        }
    };

    let Ok(status) = StatusCode::from_u16(status) else {
        let error = Error::transport(
            TransportErrorCode::Protocol,
            method,
            url,
            format!("invalid response status code {status}"),
        );
        fan_out.destroy_all(&error);
        return Err(error);
    };

    if !fan_out.is_empty() {
        debug!(status = status.as_u16(), "draining sinks before completion");
    }
    fan_out.finish().await;

    Ok(Response::new(status, normalize_headers(raw_headers), body))
}
