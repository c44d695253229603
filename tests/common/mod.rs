//! Shared utilities for integration testing.
#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_gateway::client::Transport;
use resilient_gateway::load_balancer::Endpoint;
use resilient_gateway::CallError;

/// Start a simple mock backend that answers every request with `response`
/// and echoes the request line in `x-echo-request-line`.
pub async fn start_mock_backend(response: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. Returns its address and a hit counter.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let f = Arc::new(f);

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let head = String::from_utf8_lossy(&buf[..n]);
                        let request_line = head.lines().next().unwrap_or_default().to_string();
                        counter.fetch_add(1, Ordering::SeqCst);

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nx-echo-request-line: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            request_line,
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, hits)
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

type Handler = Arc<dyn Fn(&Endpoint, &str) -> Result<String, CallError> + Send + Sync>;

/// In-memory transport over string requests. Records every call.
pub struct MockTransport {
    handler: Handler,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Endpoint, String)>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Endpoint, &str) -> Result<String, CallError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Echoes `reply:<request>`, except `fail*` requests which fail.
    pub fn echo() -> Self {
        Self::new(|_, request| {
            if request.starts_with("fail") {
                Err(CallError::transport("connection reset"))
            } else {
                Ok(format!("reply:{}", request))
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(Endpoint, String)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    type Request = String;
    type Response = String;

    fn call<'a>(&'a self, endpoint: &'a Endpoint, request: &'a String) -> BoxFuture<'a, Result<String, CallError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((endpoint.clone(), request.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.handler)(endpoint, request)
        })
    }
}
