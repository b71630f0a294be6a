use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Write `request` to a fresh connection and collect every byte the peer
/// sends back until it closes the connection.
///
/// A reset from the peer is treated as end of stream: the server under test
/// is allowed to drop a connection abruptly after a protocol error.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request).await?;

    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Builder for a single `Connection: close` request.
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl TestRequest {
    pub fn new(method: &str, path: &str) -> Self {
        TestRequest {
            method: method.to_owned(),
            path: path.to_owned(),
            headers: vec![("Host".to_owned(), "localhost".to_owned())],
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::new("POST", path)
    }

    pub fn put(path: &str) -> Self {
        Self::new("PUT", path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new("DELETE", path)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {}", token);
        self.header("Authorization", &value)
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_owned());
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(&value.to_string())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        out.push_str("Connection: close\r\n\r\n");
        if let Some(body) = &self.body {
            out.push_str(body);
        }
        out.into_bytes()
    }

    /// Send the request and parse the response.
    ///
    /// Panics when the server closes without a parseable response, which is
    /// what a test wants for every request it expects to be answered.
    pub async fn send(&self, addr: SocketAddr) -> RawResponse {
        let bytes = send_raw(addr, &self.to_bytes())
            .await
            .expect("request failed");
        RawResponse::parse(&bytes).unwrap_or_else(|| {
            panic!(
                "unparseable response to {} {}: {:?}",
                self.method,
                self.path,
                String::from_utf8_lossy(&bytes)
            )
        })
    }
}

/// A response as seen on the wire.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let split = text.find("\r\n\r\n")?;
        let head = &text[..split];
        let body = &text[split + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines.next()?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next()?;
        let status = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or("").to_owned();

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_owned(), value.trim().to_owned()))
            })
            .collect();

        Some(RawResponse {
            status,
            reason,
            headers,
            body: body.to_owned(),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of headers with this name (case-insensitive).
    pub fn header_count(&self, name: &str) -> usize {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .count()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("body is not json ({}): {:?}", e, self.body))
    }
}

pub const TEST_PASSWORD: &str = "secret123";

/// Register `username` through the public auth routes and log in.
/// Returns `(user_id, token)`.
pub async fn register_and_login(addr: SocketAddr, username: &str) -> (i64, String) {
    let register = TestRequest::post("/api/auth/register")
        .json(&serde_json::json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": TEST_PASSWORD,
            "firstName": username,
        }))
        .send(addr)
        .await;
    assert_eq!(register.status, 201, "register {}: {}", username, register.body);

    let login = TestRequest::post("/api/auth/login")
        .json(&serde_json::json!({ "username": username, "password": TEST_PASSWORD }))
        .send(addr)
        .await;
    assert_eq!(login.status, 200, "login {}: {}", username, login.body);
    let body = login.json();
    let user_id = body["userId"].as_i64().expect("userId in login response");
    let token = body["token"]
        .as_str()
        .expect("token in login response")
        .to_owned();
    (user_id, token)
}
