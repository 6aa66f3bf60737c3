#![allow(dead_code)]

//! Loopback mock that stands in for judges, the liveness page, the IP echo
//! endpoint and the proxy itself.
//!
//! One listener answers plain HTTP requests (origin-form), HTTP proxy
//! requests (absolute-form) and, when enabled, SOCKS4 or SOCKS5 handshakes
//! followed by HTTP. Disabled proxy modes drop the connection unanswered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct Route {
    status: u16,
    body: String,
}

struct State {
    routes: HashMap<String, Route>,
    http_proxy: bool,
    socks4: bool,
    socks5: bool,
    hits: Mutex<HashMap<String, usize>>,
}

pub struct MockServerBuilder {
    routes: HashMap<String, Route>,
    http_proxy: bool,
    socks4: bool,
    socks5: bool,
}

impl MockServerBuilder {
    pub fn route(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Serve absolute-form requests; on by default
    pub fn http_proxy(mut self, enabled: bool) -> Self {
        self.http_proxy = enabled;
        self
    }

    pub fn socks4(mut self, enabled: bool) -> Self {
        self.socks4 = enabled;
        self
    }

    pub fn socks5(mut self, enabled: bool) -> Self {
        self.socks5 = enabled;
        self
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let state = Arc::new(State {
            routes: self.routes,
            http_proxy: self.http_proxy,
            socks4: self.socks4,
            socks5: self.socks5,
            hits: Mutex::new(HashMap::new()),
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        MockServer { addr, state, task }
    }
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            routes: HashMap::new(),
            http_proxy: true,
            socks4: false,
            socks5: false,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// The mock used as a proxy candidate, `127.0.0.1:<port>`
    pub fn candidate(&self) -> String {
        self.addr.to_string()
    }

    /// Requests served for `path`, direct or proxied
    pub fn hits(&self, path: &str) -> usize {
        self.state
            .hits
            .lock()
            .expect("hits poisoned")
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Address nothing listens on
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind unused port");
    listener.local_addr().expect("unused port address")
}

/// Listener that accepts at the kernel level but never answers
pub async fn silent_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind silent listener");
    let addr = listener.local_addr().expect("silent listener address");
    (listener, addr)
}

async fn handle_connection(mut stream: TcpStream, state: Arc<State>) -> std::io::Result<()> {
    let mut first = [0u8; 1];
    if stream.peek(&mut first).await? == 0 {
        return Ok(());
    }

    match first[0] {
        0x04 if state.socks4 => socks4_handshake(&mut stream).await?,
        0x05 if state.socks5 => socks5_handshake(&mut stream).await?,
        0x04 | 0x05 => return Ok(()),
        _ => {}
    }

    serve_http(stream, &state).await
}

async fn read_nul_terminated(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == 0 {
            return Ok(());
        }
    }
}

async fn socks4_handshake(stream: &mut TcpStream) -> std::io::Result<()> {
    // VN CD DSTPORT DSTIP
    let mut request = [0u8; 8];
    stream.read_exact(&mut request).await?;
    read_nul_terminated(stream).await?;
    // SOCKS4a: 0.0.0.x followed by the host name
    if request[4..7] == [0, 0, 0] && request[7] != 0 {
        read_nul_terminated(stream).await?;
    }

    stream.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).await
}

async fn socks5_handshake(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[0x05, 0x00]).await?;

    // VER CMD RSV ATYP
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let addr_len = match request[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad address type",
            ))
        }
    };
    let mut addr_and_port = vec![0u8; addr_len + 2];
    stream.read_exact(&mut addr_and_port).await?;

    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
}

async fn serve_http(stream: TcpStream, state: &State) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    loop {
        let mut header = String::new();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    if !state.http_proxy && !target.starts_with('/') {
        return Ok(());
    }
    let path = path_of(target).to_string();

    *state
        .hits
        .lock()
        .expect("hits poisoned")
        .entry(path.clone())
        .or_default() += 1;

    let route = state.routes.get(&path).cloned().unwrap_or(Route {
        status: 404,
        body: "not found".to_string(),
    });

    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        route.body.len(),
        route.body
    );

    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Path of an origin-form or absolute-form request target
fn path_of(target: &str) -> &str {
    let Some(rest) = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    else {
        return target;
    };
    rest.find('/').map_or("/", |idx| &rest[idx..])
}
