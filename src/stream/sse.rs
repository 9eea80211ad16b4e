//! Server-sent event framing.

use std::time::Duration;

/// Media type of an event stream.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Cache-Control value for an event stream response.
pub const CACHE_CONTROL: &str = "no-cache";

const KEEP_ALIVE: &[u8] = b": keep-alive\n\n";

/// `retry: <ms>\n\n`, telling the peer how soon to reconnect.
pub fn retry_frame(retry: Duration) -> Vec<u8> {
    format!("retry: {}\n\n", retry.as_millis()).into_bytes()
}

/// One message carrying `payload`.
///
/// Each line of the payload gets its own `data:` field so that embedded
/// newlines survive the framing.
pub fn data_frame(payload: &str) -> Vec<u8> {
    let mut frame = String::with_capacity(payload.len() + 8);
    for line in payload.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    frame.into_bytes()
}

/// Comment frame, ignored by peers, that keeps idle connections open.
pub fn keep_alive_frame() -> &'static [u8] {
    KEEP_ALIVE
}
