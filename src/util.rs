use std::collections::BTreeMap;
use std::sync::Mutex;

use url::Url;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `Host` header value for a request URL: host, plus the port when the URL
/// carries a non-default one.
pub(crate) fn host_header_value(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

pub(crate) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers
        .iter()
        .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
}

/// Case-insensitive last-write-wins insert, preserving first-seen position.
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    for (existing, existing_value) in headers.iter_mut() {
        if existing.eq_ignore_ascii_case(name) {
            *existing_value = value;
            return;
        }
    }
    headers.push((name.to_owned(), value));
}

/// Response header normalization: keys lowercased, empty values dropped,
/// duplicates last-write-wins.
pub(crate) fn normalize_headers(raw: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut normalized = BTreeMap::new();
    for (name, value) in raw {
        if value.is_empty() {
            continue;
        }
        normalized.insert(name.to_ascii_lowercase(), value);
    }
    normalized
}
