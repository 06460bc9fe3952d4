use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use chrono::{Duration, Utc};
use epoxy_extension_protocol::{ExtensionRequest, V1};

pub const TEST_HOSTNAME: &str = "mlab1-foo01.mlab-oti.measurement-lab.org";
pub const TEST_JOIN_COMMAND: &str = "kubeadm join api.example.com:6443 --token 012345.abcdefghijklmnop --discovery-token-ca-cert-hash sha256:hash";

/// An extension request for `hostname` whose machine booted `boot_age_minutes` ago.
pub fn envelope(hostname: &str, boot_age_minutes: i64, raw_query: &str) -> ExtensionRequest {
    ExtensionRequest::new(V1 {
        hostname: hostname.to_string(),
        ipv4_address: "192.168.1.1".to_string(),
        ipv6_address: String::new(),
        last_boot: Utc::now() - Duration::minutes(boot_age_minutes),
        raw_query: raw_query.to_string(),
    })
}

/// Encoded body of a freshly booted machine's request.
pub fn fresh_body(hostname: &str) -> String {
    envelope(hostname, 5, "").encode()
}

#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Spawn a mock HTTP server that accepts a single request, captures it,
/// and answers with the given status line and JSON body. Returns the base URL
/// and a receiver that yields the captured request.
pub fn spawn_one_shot_server(
    status_line: &str,
    response_body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();
    let status_line = status_line.to_string();
    let response_body = response_body.to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept mock request");
        let req = read_http_request(&mut stream);
        tx.send(req).expect("send captured request");

        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            response_body.len(),
            response_body
        );
        stream
            .write_all(response.as_bytes())
            .expect("write mock response");
    });

    (format!("http://{addr}"), rx)
}

fn read_http_request(stream: &mut std::net::TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut header_end = None;
    let mut content_length = 0usize;

    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).expect("read request bytes");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if header_end.is_none() {
            header_end = buf
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|idx| idx + 4);
            if let Some(end) = header_end {
                content_length = parse_content_length(&String::from_utf8_lossy(&buf[..end]));
            }
        }
        if let Some(end) = header_end {
            if buf.len() >= end + content_length {
                break;
            }
        }
    }

    let end = header_end.expect("request headers must be present");
    let headers_raw = String::from_utf8_lossy(&buf[..end]);
    let mut lines = headers_raw.lines();
    let request_line = lines.next().expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().expect("method").to_string();
    let path = parts.next().expect("path").to_string();
    let headers = lines
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let body = String::from_utf8(buf[end..end + content_length].to_vec()).expect("utf8 body");

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

fn parse_content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
