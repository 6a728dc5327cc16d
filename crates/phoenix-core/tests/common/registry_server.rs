//! Minimal HTTP/1.1 server standing in for the model registries.
//!
//! Routes are exact paths (query strings are ignored). Unknown paths get 404.
//! Every request is counted so tests can assert on network use.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
struct Route {
    status: u16,
    content_type: &'static str,
    body: Arc<Vec<u8>>,
}

#[derive(Clone)]
pub struct RegistryServer {
    base: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<AtomicUsize>,
}

impl RegistryServer {
    /// Bind to an ephemeral port and serve on a background thread until the
    /// process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let server = RegistryServer {
            base: format!("http://127.0.0.1:{}", port),
            routes: Arc::new(Mutex::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
        };
        server.route("/", 200, "text/plain", b"ok".to_vec());
        let shared = server.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let s = shared.clone();
                thread::spawn(move || s.handle(stream));
            }
        });
        server
    }

    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn route(&self, path: &str, status: u16, content_type: &'static str, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                content_type,
                body: Arc::new(body),
            },
        );
    }

    pub fn json(&self, path: &str, value: serde_json::Value) {
        self.route(path, 200, "application/json", value.to_string().into_bytes());
    }

    pub fn file(&self, path: &str, body: Vec<u8>) {
        self.route(path, 200, "application/octet-stream", body);
    }

    fn handle(&self, mut stream: TcpStream) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        self.hits.fetch_add(1, Ordering::SeqCst);
        let request = String::from_utf8_lossy(&buf);
        let mut first = request.lines().next().unwrap_or("").split_whitespace();
        let method = first.next().unwrap_or("");
        let target = first.next().unwrap_or("/");
        let path = target.split('?').next().unwrap_or("/");

        let route = self.routes.lock().unwrap().get(path).cloned();
        let route = route.unwrap_or(Route {
            status: 404,
            content_type: "text/plain",
            body: Arc::new(b"not found".to_vec()),
        });
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            route.status,
            reason(route.status),
            route.content_type,
            route.body.len()
        );
        let _ = stream.write_all(head.as_bytes());
        if !method.eq_ignore_ascii_case("HEAD") {
            let _ = stream.write_all(&route.body);
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
