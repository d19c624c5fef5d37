use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use terminal_web::admission::{AdmissionController, Rejection};
use terminal_web::audit::AuditLog;
use terminal_web::document::{BindingTable, PageLibrary};
use terminal_web::server::{
    ClientChannel, ConnectionInfo, SessionDeps, SessionEnd, SessionIo, SessionLimits,
    SessionOrchestrator, WindowSize,
};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn records(&self) -> Vec<Value> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn events(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| record["event"].as_str().unwrap().to_string())
            .collect()
    }
}

#[derive(Default)]
struct RecordingClient {
    sent: Mutex<Vec<u8>>,
    exits: Mutex<Vec<u32>>,
}

impl RecordingClient {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.sent.lock()).into_owned()
    }
}

#[async_trait]
impl ClientChannel for RecordingClient {
    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.sent.lock().extend_from_slice(bytes);
        Ok(())
    }

    async fn exit(&self, status: u32) {
        self.exits.lock().push(status);
    }
}

struct Harness {
    _docs: tempfile::TempDir,
    audit: Capture,
    admission: Arc<AdmissionController>,
    orchestrator: SessionOrchestrator,
}

fn harness(rate_limit: usize, max_active: usize, limits: SessionLimits) -> Harness {
    let docs = tempfile::tempdir().unwrap();
    fs::write(
        docs.path().join("index.toml"),
        r#"
title = "Home"

[[section]]
title = "About"
items = [{ text = "hello" }]

[[section]]
title = "More"
link = "other"
items = [{ text = "see the other page" }]
"#,
    )
    .unwrap();
    fs::write(
        docs.path().join("other.toml"),
        r#"
title = "Other"

[[section]]
title = "Elsewhere"
items = [{ text = "elsewhere" }]
"#,
    )
    .unwrap();

    let library = Arc::new(PageLibrary::open(docs.path(), "index.toml").unwrap());
    let audit = Capture::default();
    let admission = Arc::new(AdmissionController::new(rate_limit, max_active));
    let orchestrator = SessionOrchestrator::new(SessionDeps {
        home: library.home_index(),
        library,
        bindings: Arc::new(BindingTable::default()),
        admission: Arc::clone(&admission),
        audit: Arc::new(AuditLog::from_writer(audit.clone())),
        limits,
    });
    Harness {
        _docs: docs,
        audit,
        admission,
        orchestrator,
    }
}

fn long_limits() -> SessionLimits {
    SessionLimits {
        max_duration: Duration::from_secs(60),
        idle_timeout: Duration::from_secs(60),
    }
}

fn connection(window: Option<WindowSize>) -> ConnectionInfo {
    ConnectionInfo {
        ip: "203.0.113.7".to_string(),
        fingerprint: Some("SHA256:test".to_string()),
        username: Some("guest".to_string()),
        window,
    }
}

/// Session io plus the senders that keep it open.
fn session_io() -> (SessionIo, mpsc::Sender<Vec<u8>>, mpsc::Sender<WindowSize>) {
    let (input_tx, input) = mpsc::channel(16);
    let (resize_tx, resizes) = mpsc::channel(16);
    (SessionIo { input, resizes }, input_tx, resize_tx)
}

#[test_timeout::tokio_timeout_test(20)]
async fn eleventh_connection_in_a_minute_is_rate_limited() {
    let h = harness(10, 30, long_limits());
    for _ in 0..10 {
        h.admission.admit("203.0.113.7").unwrap();
    }

    let client = Arc::new(RecordingClient::default());
    let (io, _input, _resize) = session_io();
    let end = h
        .orchestrator
        .run(connection(Some(WindowSize::new(80, 24))), client.clone(), io)
        .await;

    assert_eq!(end, SessionEnd::Rejected(Rejection::RateLimited));
    assert_eq!(h.admission.active(), 10, "the refused connection takes no slot");
    assert_eq!(
        client.text(),
        "Rate limit exceeded. Maximum 10 connections per minute.\r\n"
    );
    assert_eq!(*client.exits.lock(), vec![1]);
    assert_eq!(h.audit.events(), vec!["RATE_LIMIT"]);
}

#[test_timeout::tokio_timeout_test(20)]
async fn full_server_refuses_new_sessions() {
    let h = harness(10, 1, long_limits());
    h.admission.increment();

    let client = Arc::new(RecordingClient::default());
    let (io, _input, _resize) = session_io();
    let end = h.orchestrator.run(connection(None), client.clone(), io).await;

    assert_eq!(end, SessionEnd::Rejected(Rejection::AtCapacity));
    assert_eq!(h.admission.active(), 1);
    assert!(client.text().starts_with("Server is at maximum capacity"));
    assert_eq!(*client.exits.lock(), vec![1]);
    let records = h.audit.records();
    assert_eq!(records[0]["event"], "MAX_CONNECTIONS");
    assert_eq!(records[0]["active_connections"], 1);
}

#[test_timeout::tokio_timeout_test(20)]
async fn shell_without_pty_is_refused_and_released() {
    let h = harness(10, 30, long_limits());
    let client = Arc::new(RecordingClient::default());
    let (io, _input, _resize) = session_io();
    let end = h.orchestrator.run(connection(None), client.clone(), io).await;

    assert_eq!(end, SessionEnd::PtyRequired);
    assert_eq!(client.text(), "PTY is required for this application\r\n");
    assert_eq!(*client.exits.lock(), vec![1]);
    assert_eq!(h.admission.active(), 0);
    assert_eq!(
        h.audit.events(),
        vec!["CONNECT", "SESSION_START", "ERROR", "SESSION_END", "DISCONNECT"]
    );
    let records = h.audit.records();
    assert_eq!(records[0]["key_fingerprint"], "SHA256:test");
    assert_eq!(records[0]["session_id"], records[4]["session_id"]);
}

#[test_timeout::tokio_timeout_test(20)]
async fn quitting_ends_with_status_zero() {
    let h = harness(10, 30, long_limits());
    let client = Arc::new(RecordingClient::default());
    let (io, input, _resize) = session_io();
    input.send(b"q".to_vec()).await.unwrap();

    let end = h
        .orchestrator
        .run(connection(Some(WindowSize::new(80, 24))), client.clone(), io)
        .await;

    assert_eq!(end, SessionEnd::Completed);
    assert_eq!(*client.exits.lock(), vec![0]);
    assert_eq!(h.admission.active(), 0);
    let events = h.audit.events();
    assert!(!events.contains(&"SESSION_TIMEOUT".to_string()));
    assert_eq!(&events[events.len() - 2..], ["SESSION_END", "DISCONNECT"]);
    assert!(client.text().contains("\x1b[?1049h"), "program output reaches the client");
}

#[test_timeout::tokio_timeout_test(20)]
async fn max_duration_times_out_once() {
    let h = harness(
        10,
        30,
        SessionLimits {
            max_duration: Duration::from_millis(300),
            idle_timeout: Duration::from_secs(60),
        },
    );
    let client = Arc::new(RecordingClient::default());
    let (io, _input, _resize) = session_io();
    let end = h
        .orchestrator
        .run(connection(Some(WindowSize::new(80, 24))), client.clone(), io)
        .await;

    assert_eq!(end, SessionEnd::MaxDuration);
    assert_eq!(*client.exits.lock(), vec![0]);
    assert!(client
        .text()
        .ends_with("Session timeout: Maximum duration reached.\r\n"));
    let events = h.audit.events();
    assert_eq!(
        events.iter().filter(|event| *event == "SESSION_TIMEOUT").count(),
        1
    );
    assert_eq!(&events[events.len() - 3..], ["SESSION_TIMEOUT", "SESSION_END", "DISCONNECT"]);
    assert_eq!(h.admission.active(), 0);
}

#[test_timeout::tokio_timeout_test(20)]
async fn idle_sessions_time_out() {
    let h = harness(
        10,
        30,
        SessionLimits {
            max_duration: Duration::from_secs(30),
            idle_timeout: Duration::from_millis(300),
        },
    );
    let client = Arc::new(RecordingClient::default());
    let (io, _input, _resize) = session_io();
    let end = h
        .orchestrator
        .run(connection(Some(WindowSize::new(80, 24))), client.clone(), io)
        .await;

    assert_eq!(end, SessionEnd::IdleTimeout);
    assert!(client.text().ends_with("Session timeout: Idle limit reached.\r\n"));
    let records = h.audit.records();
    let timeout = records
        .iter()
        .find(|record| record["event"] == "SESSION_TIMEOUT")
        .unwrap();
    assert_eq!(timeout["message"], "Idle timeout reached");
}

#[test_timeout::tokio_timeout_test(20)]
async fn client_disconnect_tears_down_without_timeout() {
    let h = harness(10, 30, long_limits());
    let client = Arc::new(RecordingClient::default());
    let (io, input, resize) = session_io();
    resize.send(WindowSize::new(100, 30)).await.unwrap();
    drop(input);

    let end = h
        .orchestrator
        .run(connection(Some(WindowSize::new(80, 24))), client.clone(), io)
        .await;

    assert_eq!(end, SessionEnd::Disconnected);
    assert!(client.exits.lock().is_empty());
    assert_eq!(h.admission.active(), 0);
    let events = h.audit.events();
    assert!(!events.contains(&"SESSION_TIMEOUT".to_string()));
    assert_eq!(&events[events.len() - 2..], ["SESSION_END", "DISCONNECT"]);
}
