//! Request parser for the hand-built HTTP/1.1 subset.
//!
//! Reads exactly one request from a buffered stream:
//!
//! ```text
//! METHOD SP PATH SP VERSION CRLF
//! (Key: Value CRLF)*
//! CRLF
//! <Content-Length bytes of body>
//! ```
//!
//! Nothing past the body is consumed, so the caller can loop on the same
//! reader for keep-alive. Bare `\n` line endings are accepted.

use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on a single request or header line.
pub const MAX_LINE_BYTES: usize = 8 * 1024;
/// Upper bound on the number of header lines in one request.
pub const MAX_HEADERS: usize = 100;
/// Default upper bound on a request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("body of {len} bytes exceeds limit of {limit}")]
    BodyTooLarge { len: usize, limit: usize },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// One parsed request. Immutable once returned by [`read_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: String,
    /// Request target with any `?query` removed.
    pub path: String,
    /// Protocol token from the request line, if one was sent.
    pub version: Option<String>,
    /// Keys are lowercase; values are trimmed.
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl IncomingRequest {
    /// Look up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body bytes, or an empty slice when none was sent.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// True when the client asked for the connection to be closed after
    /// this exchange (`Connection: close`, or an HTTP/1.0 request without
    /// `Connection: keep-alive`).
    pub fn wants_close(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => true,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => false,
            _ => self.version.as_deref() == Some("HTTP/1.0"),
        }
    }
}

/// Read one request from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream before sending a
/// request line (the normal end of a keep-alive loop).
pub async fn read_request<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<IncomingRequest>, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(request_line) = read_line(reader).await? else {
        return Ok(None);
    };

    let mut tokens = request_line.split_whitespace();
    let (method, target) = match (tokens.next(), tokens.next()) {
        (Some(m), Some(t)) => (m.to_owned(), t),
        _ => {
            return Err(ParseError::Malformed(format!(
                "request line '{}' needs METHOD and PATH",
                request_line
            )));
        }
    };
    let version = tokens.next().map(str::to_owned);
    let path = match target.split_once('?') {
        Some((p, _query)) => p.to_owned(),
        None => target.to_owned(),
    };

    let mut headers = HashMap::new();
    let mut count = 0usize;
    // EOF inside the header block ends it; a missing body then surfaces as IO.
    while let Some(line) = read_line(reader).await? {
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(ParseError::Malformed(format!(
                "more than {} header lines",
                MAX_HEADERS
            )));
        }
        match line.find(':') {
            Some(colon) if colon > 0 => {
                let key = line[..colon].trim().to_ascii_lowercase();
                let value = line[colon + 1..].trim().to_owned();
                headers.insert(key, value);
            }
            _ => {}
        }
    }

    let content_length = match headers.get("content-length") {
        Some(raw) => parse_content_length(raw, max_body_bytes)?,
        None => 0,
    };

    let body = if content_length > 0 {
        if content_length > max_body_bytes {
            return Err(ParseError::BodyTooLarge {
                len: content_length,
                limit: max_body_bytes,
            });
        }
        let mut buf = vec![0u8; content_length];
        reader.read_exact(&mut buf).await?;
        Some(buf)
    } else {
        None
    };

    Ok(Some(IncomingRequest {
        method,
        path,
        version,
        headers,
        body,
    }))
}

/// Digits only. A length too big for `usize` is over any limit.
fn parse_content_length(raw: &str, max_body_bytes: usize) -> Result<usize, ParseError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::Malformed(format!(
            "invalid Content-Length '{}'",
            raw
        )));
    }
    raw.parse::<usize>().map_err(|_| ParseError::BodyTooLarge {
        len: usize::MAX,
        limit: max_body_bytes,
    })
}

/// Read one line without its terminator. `None` on EOF before any byte.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n >= MAX_LINE_BYTES {
        return Err(ParseError::Malformed(format!(
            "line exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| ParseError::Malformed("line is not valid UTF-8".to_owned()))
}
