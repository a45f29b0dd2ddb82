use crate::record::Record;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Rejected(u16),
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// At-most-once handoff of a finished record. Implementations must return
/// within a bounded time and must not panic on transport errors.
pub trait Deliver {
    fn send(&self, record: &Record) -> DeliveryOutcome;
}

pub struct HttpDelivery {
    port: u16,
    client: Option<Client>,
}

impl HttpDelivery {
    pub fn new(port: u16, timeout: Duration) -> Self {
        let client = build_client(timeout)
            .map_err(|e| debug!(error = %e, "http client unavailable, records will be dropped"))
            .ok();
        Self { port, client }
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/update", self.port)
    }
}

impl Deliver for HttpDelivery {
    fn send(&self, record: &Record) -> DeliveryOutcome {
        let Some(client) = &self.client else {
            return DeliveryOutcome::Failed("no http client".to_string());
        };
        let outcome = match client.post(self.endpoint()).json(record).send() {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered,
            Ok(response) => DeliveryOutcome::Rejected(response.status().as_u16()),
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        };
        debug!(port = self.port, outcome = ?outcome, "record handed off");
        outcome
    }
}

/// Ask the coaching service whether it is up (`GET /healthz`).
pub fn probe_health(port: u16, timeout: Duration) -> bool {
    let Ok(client) = build_client(timeout) else {
        return false;
    };
    match client.get(format!("http://127.0.0.1:{port}/healthz")).send() {
        Ok(response) => response.status() == StatusCode::OK,
        Err(e) => {
            debug!(port, error = %e, "health probe failed");
            false
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .no_proxy()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Instant;

    fn sample() -> Record {
        Record {
            cwd: "/work".to_string(),
            last_command: "false".to_string(),
            exit_code: 1,
            error_tail: String::new(),
        }
    }

    /// Reads one HTTP request and returns (request line, body).
    fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            if header == "\r\n" || header.is_empty() {
                break;
            }
            let lower = header.to_ascii_lowercase();
            if let Some(value) = lower.strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();
        (request_line.trim_end().to_string(), String::from_utf8(body).unwrap())
    }

    fn serve_once(status_line: &'static str) -> (u16, thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (port, handle)
    }

    #[test]
    fn posts_record_as_json() {
        let (port, server) = serve_once("HTTP/1.1 200 OK");
        let outcome = HttpDelivery::new(port, Duration::from_secs(5)).send(&sample());
        let (request_line, body) = server.join().unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(request_line, "POST /update HTTP/1.1");
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"cwd": "/work", "last_cmd": "false", "exit_code": 1, "stderr": ""})
        );
    }

    #[test]
    fn non_success_status_is_rejected() {
        let (port, server) = serve_once("HTTP/1.1 400 Bad Request");
        let outcome = HttpDelivery::new(port, Duration::from_secs(5)).send(&sample());
        server.join().unwrap();
        assert_eq!(outcome, DeliveryOutcome::Rejected(400));
    }

    #[test]
    fn closed_port_fails_quietly() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let outcome = HttpDelivery::new(port, Duration::from_millis(300)).send(&sample());
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
    }

    #[test]
    fn hung_service_is_bounded_by_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            // Accept and hold the connection without ever answering.
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(1500));
            drop(stream);
        });

        let started = Instant::now();
        let outcome = HttpDelivery::new(port, Duration::from_millis(200)).send(&sample());
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert!(started.elapsed() < Duration::from_millis(1200));
        server.join().unwrap();
    }

    #[test]
    fn health_probe_reports_service_state() {
        let (port, server) = serve_once("HTTP/1.1 200 OK");
        assert!(probe_health(port, Duration::from_secs(5)));
        let (request_line, _) = server.join().unwrap();
        assert_eq!(request_line, "GET /healthz HTTP/1.1");

        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!probe_health(closed, Duration::from_millis(300)));
    }
}
