use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
    stall: Option<Duration>,
}

impl Reply {
    fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.to_string(),
            stall: None,
        }
    }

    /// Reads the request, then holds the connection open without answering.
    fn stall(duration: Duration) -> Self {
        Self {
            stall: Some(duration),
            ..Self::status(200)
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: "unavailable".to_string(),
            stall: None,
        }
    }

    fn json(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
            stall: None,
        }
    }
}

/// Answers one connection per queued reply, in order, and forwards each raw request.
struct Server {
    url: String,
    requests: Receiver<String>,
}

fn serve(replies: Vec<Reply>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let request = read_request(&mut stream);
            let _ = tx.send(request);
            if let Some(duration) = reply.stall {
                thread::sleep(duration);
                continue;
            }
            let reason = match reply.status {
                200 => "OK",
                500 => "Internal Server Error",
                503 => "Service Unavailable",
                _ => "Status",
            };
            let response = format!(
                "HTTP/1.1 {} {reason}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                reply.status,
                reply.content_type,
                reply.body.len(),
                reply.body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    Server {
        url: format!("http://{addr}/"),
        requests: rx,
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/emails")
}

fn pagewatch(url: &str, notify_endpoint: &str, state_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pagewatch"));
    cmd.env_clear()
        .env("WATCH_URL", url)
        .env("RESEND_API_KEY", "re_test")
        .env("TO_EMAIL", "ops@example.com")
        .env("FROM_EMAIL", "Alerts <alerts@example.com>")
        .env("STATE_DIR", state_dir)
        .env("REQUEST_TIMEOUT", "5")
        .env("RESEND_ENDPOINT", notify_endpoint);
    cmd
}

fn run(cmd: &mut Command) -> Output {
    let output = cmd.output().expect("run CLI");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn state_bytes(dir: &Path) -> Vec<u8> {
    let files = state_files(dir);
    assert_eq!(files.len(), 1, "files: {files:?}");
    std::fs::read(dir.join(&files[0])).expect("read state file")
}

fn state_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn missing_configuration_exits_with_two() {
    let output = Command::new(env!("CARGO_BIN_EXE_pagewatch"))
        .env_clear()
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("WATCH_URL"));
    assert!(output.stdout.is_empty());
}

#[test]
fn first_run_seeds_and_second_run_is_silent() {
    let page = "<html><body><p>Hello world</p></body></html>";
    let server = serve(vec![Reply::html(page), Reply::html(page)]);
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");
    let notify = closed_port_url();

    let first = run(&mut pagewatch(&server.url, &notify, &state_dir));
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains("Initialized state for"), "stdout: {stdout}");
    let files = state_files(&state_dir);
    assert_eq!(files.len(), 1, "files: {files:?}");
    assert!(files[0].ends_with(".json"));

    let second = run(&mut pagewatch(&server.url, &notify, &state_dir));
    assert!(second.stdout.is_empty());
    assert_eq!(state_files(&state_dir), files);

    let request = server.requests.recv().unwrap().to_ascii_lowercase();
    assert!(request.starts_with("get / http/1.1"));
    assert!(request.contains("user-agent: pagewatch/"));
}

#[test]
fn change_is_emailed_with_a_diff() {
    let server = serve(vec![
        Reply::html("<p>Hello world</p>"),
        Reply::html("<p>Hello brave world</p>"),
    ]);
    let mail = serve(vec![Reply::json(r#"{"id":"email_123"}"#)]);
    let dir = tempfile::tempdir().unwrap();
    let mail_endpoint = format!("{}emails", mail.url);

    run(&mut pagewatch(&server.url, &mail_endpoint, dir.path()));
    let second = run(&mut pagewatch(&server.url, &mail_endpoint, dir.path()));

    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(
        stdout.contains("1 added, 1 removed"),
        "stdout: {stdout}"
    );
    assert!(stdout.contains("email_123"), "stdout: {stdout}");

    let request = mail
        .requests
        .recv_timeout(Duration::from_secs(5))
        .expect("alert request");
    let lowered = request.to_ascii_lowercase();
    assert!(lowered.starts_with("post /emails http/1.1"));
    assert!(lowered.contains("authorization: bearer re_test"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let json: serde_json::Value = serde_json::from_str(body).expect("json body");
    assert_eq!(json["to"], serde_json::json!(["ops@example.com"]));
    assert_eq!(json["from"], "Alerts <alerts@example.com>");
    let text = json["text"].as_str().unwrap();
    assert!(text.contains("-Hello world"));
    assert!(text.contains("+Hello brave world"));
}

#[test]
fn failed_delivery_still_advances_state() {
    let server = serve(vec![
        Reply::html("<p>Hello world</p>"),
        Reply::html("<p>Hello brave world</p>"),
    ]);
    let mail = serve(vec![Reply::status(500)]);
    let dir = tempfile::tempdir().unwrap();
    let mail_endpoint = format!("{}emails", mail.url);

    run(&mut pagewatch(&server.url, &mail_endpoint, dir.path()));
    let seeded = state_bytes(dir.path());
    let second = run(&mut pagewatch(&server.url, &mail_endpoint, dir.path()));

    let stdout = String::from_utf8_lossy(&second.stdout);
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stdout.contains("Change detected on"), "stdout: {stdout}");
    assert!(stderr.contains("WARNING: failed to send alert"), "stderr: {stderr}");
    assert!(stderr.contains("500"), "stderr: {stderr}");

    let advanced = state_bytes(dir.path());
    assert_ne!(advanced, seeded);
    assert!(String::from_utf8_lossy(&advanced).contains("Hello brave world"));
}

#[test]
fn server_error_leaves_seeded_state_untouched() {
    let server = serve(vec![Reply::html("<p>Hello world</p>"), Reply::status(503)]);
    let dir = tempfile::tempdir().unwrap();
    let notify = closed_port_url();

    run(&mut pagewatch(&server.url, &notify, dir.path()));
    let seeded = state_bytes(dir.path());

    let output = pagewatch(&server.url, &notify, dir.path())
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("503"));
    assert!(output.stdout.is_empty());
    assert_eq!(state_bytes(dir.path()), seeded);
}

#[test]
fn fetch_timeout_exits_with_one_and_keeps_state() {
    let server = serve(vec![
        Reply::html("<p>Hello world</p>"),
        Reply::stall(Duration::from_secs(4)),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let notify = closed_port_url();

    run(&mut pagewatch(&server.url, &notify, dir.path()));
    let seeded = state_bytes(dir.path());

    let output = pagewatch(&server.url, &notify, dir.path())
        .env("REQUEST_TIMEOUT", "1")
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("timed out"), "stderr: {stderr}");
    assert_eq!(state_bytes(dir.path()), seeded);
}

#[test]
fn server_error_on_first_run_writes_nothing() {
    let server = serve(vec![Reply::status(503)]);
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().join("state");

    let output = pagewatch(&server.url, &closed_port_url(), &state_dir)
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(1));
    assert!(!state_dir.exists());
}

#[test]
fn invalid_api_key_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = pagewatch(&closed_port_url(), &closed_port_url(), dir.path())
        .env("RESEND_API_KEY", "re_\u{7f}bad")
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("RESEND_API_KEY"));
}

#[test]
fn unreachable_page_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let output = pagewatch(&closed_port_url(), &closed_port_url(), dir.path())
        .output()
        .expect("run CLI");

    assert_eq!(output.status.code(), Some(1));
    assert!(state_files(dir.path()).is_empty());
}
