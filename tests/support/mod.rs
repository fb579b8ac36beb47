//! Local HTTP server and page fixtures for integration tests.
//!
//! Routes are keyed by request target (path plus query). Each route holds a
//! queue of responses; the last one repeats once the queue is drained.
//! Unrouted targets get a 404.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Value};

type Routes = Arc<Mutex<HashMap<String, Vec<(u16, String)>>>>;

pub struct TestServer {
    pub base_url: String,
    routes: Routes,
    log: Arc<Mutex<Vec<String>>>,
    shutdown_tx: mpsc::Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
        listener.set_nonblocking(true).expect("set nonblocking");
        let addr = listener.local_addr().expect("local addr");

        let routes: Routes = Arc::default();
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_routes = Arc::clone(&routes);
        let thread_log = Arc::clone(&log);
        let join_handle = std::thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let routes = Arc::clone(&thread_routes);
                    let log = Arc::clone(&thread_log);
                    std::thread::spawn(move || handle(stream, &routes, &log));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            routes,
            log,
            shutdown_tx,
            join_handle: Some(join_handle),
        }
    }

    pub fn url(&self, target: &str) -> String {
        format!("{}{target}", self.base_url)
    }

    /// Queue a response for `target` (path plus query).
    pub fn route(&self, target: &str, status: u16, body: impl Into<String>) -> &Self {
        self.routes
            .lock()
            .expect("lock routes")
            .entry(target.to_string())
            .or_default()
            .push((status, body.into()));
        self
    }

    pub fn hits(&self, target: &str) -> usize {
        self.log
            .lock()
            .expect("lock log")
            .iter()
            .filter(|t| t.as_str() == target)
            .count()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle(mut stream: TcpStream, routes: &Routes, log: &Mutex<Vec<String>>) {
    let Ok(head) = read_head(&mut stream) else {
        return;
    };
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    log.lock().expect("lock log").push(target.clone());

    let (status, body) = {
        let mut routes = routes.lock().expect("lock routes");
        match routes.get_mut(&target) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (404, "not found".to_string()),
        }
    };
    let _ = write_response(&mut stream, status, &body, method == "HEAD");
}

fn read_head(stream: &mut TcpStream) -> std::io::Result<String> {
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let mut buf = [0_u8; 1024];
    let mut data = Vec::new();
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                data.extend_from_slice(&buf[..read]);
                if data.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn write_response(stream: &mut TcpStream, status: u16, body: &str, head_only: bool) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Status",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    if !head_only {
        stream.write_all(body.as_bytes())?;
    }
    stream.flush()
}

// ─── Page fixtures ───────────────────────────────────────────────────────────

pub fn query(tvid: &str, tm: u64) -> String {
    format!("tvid={tvid}&bid=600&vid=v{tvid}&tm={tm}")
}

/// Request target the resolver sends to the local manifest endpoint.
pub fn dash_target(tvid: &str, tm: u64) -> String {
    format!("/dash?{}", query(tvid, tm))
}

pub fn html(payload: &Value) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>iQ</title></head><body><script id="__NEXT_DATA__" type="application/json">{payload}</script></body></html>"#
    )
}

/// Episode page; `playlist` optionally embeds a series list.
pub fn episode_page(tvid: &str, tm: u64, title: &str, order: u32, playlist: Option<Value>) -> String {
    html(&json!({"props": {
        "initialProps": {"pageProps": {"prePlayerData": {
            "ssrlog": format!("[ssr] GET https://cache.video.iqiyi.com/dash?{} 200 9ms", query(tvid, tm))
        }}},
        "initialState": {"play": {
            "curVideoInfo": {"name": title, "order": order, "albumName": "Test Show"},
            "cachePlayList": {"1": playlist.unwrap_or(Value::Null)}
        }}
    }}))
}

pub fn dash_ok(playlist: &str) -> String {
    json!({"code": "A00000", "data": {
        "dm": "http://meta.video.iqiyi.com",
        "program": {
            "video": [{"bid": 600, "_selected": true, "m3u8": playlist}],
            "stl": [{"_name": "English", "lid": 3, "srt": "/20241113/en.srt", "webvtt": "/20241113/en.vtt"}]
        }
    }})
    .to_string()
}

pub fn dash_expired() -> String {
    json!({"code": "A00020", "msg": "signature expired"}).to_string()
}

pub fn config_toml(server: &TestServer) -> String {
    format!(
        "manifest_endpoint = \"{}/dash\"\nbackoff_base_ms = 10\nrate_limit_delay_ms = 50\nrequest_timeout_secs = 5\n",
        server.base_url
    )
}
