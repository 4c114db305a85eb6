//! HTTP request-line and Host-header extraction.

/// Inspect at most this many payload bytes.
const MAX_PAYLOAD: usize = 8192;
/// Ceiling for an extracted Host header value.
const MAX_HOST_LEN: usize = 255;

const METHODS: &[&[u8]] = &[
    b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ",
];
const HOST_HEADER: &[u8] = b"\r\nHost: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub host: String,
    pub uri: String,
}

/// Extract method, request target, and Host from an HTTP request payload.
///
/// Only the canonical verb set is accepted; a null byte in the first 256
/// bytes marks the payload as binary and rejects it outright.
pub fn parse_request(payload: &[u8]) -> Option<HttpRequest> {
    if payload.is_empty() {
        return None;
    }
    let payload = &payload[..payload.len().min(MAX_PAYLOAD)];

    let probe = &payload[..payload.len().min(256)];
    if probe.contains(&0) {
        return None;
    }

    let method = METHODS
        .iter()
        .find(|m| payload.starts_with(m))
        .map(|m| std::str::from_utf8(&m[..m.len() - 1]).unwrap_or_default())?;

    // Request target: second token of the request line.
    let line_end = find(payload, b"\r\n").unwrap_or(payload.len());
    let uri = payload[method.len() + 1..line_end]
        .split(|&b| b == b' ')
        .next()
        .and_then(|t| std::str::from_utf8(t).ok())
        .unwrap_or_default();

    let mut host = String::new();
    if let Some(start) = find(payload, HOST_HEADER) {
        let value_start = start + HOST_HEADER.len();
        if let Some(rel_end) = payload[value_start..].iter().position(|&b| b == b'\r') {
            if rel_end <= MAX_HOST_LEN {
                let value = &payload[value_start..value_start + rel_end];
                if let Ok(text) = std::str::from_utf8(value) {
                    if !has_control_bytes(value) {
                        host = text.to_string();
                    }
                }
            }
        }
    }

    Some(HttpRequest {
        method: method.to_string(),
        host,
        uri: uri.to_string(),
    })
}

/// ASCII control characters other than HTAB disqualify a header value.
fn has_control_bytes(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| (b < 32 && b != 9) || b == 127)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
