use kt_protocol::ErrorBody;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A response under construction. Serialized once by [`OutgoingResponse::to_bytes`].
///
/// `Content-Length` is always derived from the body; a caller-supplied value
/// is dropped at serialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    status: u16,
    reason: Cow<'static, str>,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

pub type HttpResponse = OutgoingResponse;
pub type HttpResult<T = HttpResponse> = Result<T, HttpResponse>;

impl OutgoingResponse {
    pub fn new(status: u16) -> Self {
        OutgoingResponse {
            status,
            reason: Cow::Borrowed(reason_phrase(status)),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set a header, replacing any existing header of the same name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_owned(), value)),
        }
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// `STATUS-LINE CRLF (header CRLF)* Content-Length CRLF CRLF BODY`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

        let mut out = head.into_bytes();
        out.extend_from_slice(body);
        out
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Serialize `value` as the JSON body of a `status` response.
pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => OutgoingResponse::new(status)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .body(body),
        Err(e) => internal_error(e),
    }
}

pub fn empty(status: u16) -> HttpResponse {
    OutgoingResponse::new(status)
}

pub fn json_error(status: u16, message: impl Into<String>) -> HttpResponse {
    let envelope = ErrorBody {
        error: message.into(),
    };
    // ErrorBody is a single string field; encoding cannot fail.
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    OutgoingResponse::new(status)
        .header("Content-Type", JSON_CONTENT_TYPE)
        .body(body)
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(500, err.to_string())
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(400, message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(401, message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(403, message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(404, message)
}

pub fn method_not_allowed() -> HttpResponse {
    json_error(405, "Método no permitido")
}
