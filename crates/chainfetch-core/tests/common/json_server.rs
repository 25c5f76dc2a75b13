//! Minimal HTTP/1.1 server speaking the upstream's JSON API for integration tests.
//!
//! `GET /partitions` returns the configured listing; `GET /records?partition=K`
//! replays the replies configured for `K` in order, repeating the last one.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            status: 429,
            headers: vec![("Retry-After".into(), retry_after_secs.to_string())],
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Routes {
    pub partitions: Reply,
    pub records: HashMap<String, Vec<Reply>>,
}

impl Routes {
    pub fn new(partitions: &[&str]) -> Self {
        let listing = serde_json::to_string(partitions).unwrap();
        Self {
            partitions: Reply::json(listing),
            records: HashMap::new(),
        }
    }

    pub fn records(mut self, partition: &str, replies: Vec<Reply>) -> Self {
        self.records.insert(partition.to_string(), replies);
        self
    }
}

pub struct JsonServer {
    pub base_url: String,
    /// Request targets in arrival order, e.g. `/records?partition=...`.
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl JsonServer {
    pub fn hits(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.contains(needle))
            .count()
    }
}

/// Starts a server in a background thread. It runs until the process exits.
pub fn start(routes: Routes) -> JsonServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let served: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let routes = Arc::new(routes);
    {
        let requests = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let routes = Arc::clone(&routes);
                let requests = Arc::clone(&requests);
                let served = Arc::clone(&served);
                thread::spawn(move || handle(stream, &routes, &requests, &served));
            }
        });
    }
    JsonServer {
        base_url: format!("http://127.0.0.1:{}/", port),
        requests,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    routes: &Routes,
    requests: &Mutex<Vec<String>>,
    served: &Mutex<HashMap<String, usize>>,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut first = request.lines().next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let target = first.next().unwrap_or("/").to_string();
    requests.lock().unwrap().push(target.clone());

    if !method.eq_ignore_ascii_case("GET") {
        write_reply(&mut stream, &Reply::status(405, ""));
        return;
    }
    let url = match url::Url::parse(&format!("http://localhost{}", target)) {
        Ok(u) => u,
        Err(_) => {
            write_reply(&mut stream, &Reply::status(400, "bad target"));
            return;
        }
    };
    let reply = match url.path() {
        "/partitions" => routes.partitions.clone(),
        "/records" => {
            let partition = url
                .query_pairs()
                .find(|(k, _)| k == "partition")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            match routes.records.get(&partition) {
                Some(replies) if !replies.is_empty() => {
                    let mut served = served.lock().unwrap();
                    let n = served.entry(partition).or_insert(0);
                    let reply = replies[(*n).min(replies.len() - 1)].clone();
                    *n += 1;
                    reply
                }
                _ => Reply::status(404, "unknown partition"),
            }
        }
        _ => Reply::status(404, "not found"),
    };
    write_reply(&mut stream, &reply);
}

fn write_reply(stream: &mut std::net::TcpStream, reply: &Reply) {
    let reason = match reply.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(reply.body.as_bytes());
}
