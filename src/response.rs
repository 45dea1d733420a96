use std::collections::BTreeMap;

use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

/// Terminal result of a successful logical request. A "bad" status is still
/// delivered here, unchanged; the orchestrator never synthesizes an error
/// from a status code alone.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: BTreeMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Normalized response headers: lowercased names, empty values dropped.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}
