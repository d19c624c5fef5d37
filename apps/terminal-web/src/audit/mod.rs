//! Append-only JSON-lines audit trail of connection and session events.

use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to open audit log {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    Connect,
    Disconnect,
    SessionStart,
    SessionEnd,
    SessionTimeout,
    RateLimit,
    MaxConnections,
    AuthKey,
    AuthFailure,
    Error,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::Connect => "CONNECT",
            AuditEvent::Disconnect => "DISCONNECT",
            AuditEvent::SessionStart => "SESSION_START",
            AuditEvent::SessionEnd => "SESSION_END",
            AuditEvent::SessionTimeout => "SESSION_TIMEOUT",
            AuditEvent::RateLimit => "RATE_LIMIT",
            AuditEvent::MaxConnections => "MAX_CONNECTIONS",
            AuditEvent::AuthKey => "AUTH_KEY",
            AuditEvent::AuthFailure => "AUTH_FAILURE",
            AuditEvent::Error => "ERROR",
        }
    }
}

/// One line of the audit log.
#[derive(Clone, Debug, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub level: Level,
    pub event: AuditEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditRecord {
    pub fn new(level: Level, event: AuditEvent, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_rfc3339(),
            level,
            event,
            ip: None,
            key_fingerprint: None,
            duration: None,
            message: message.into(),
            active_connections: None,
            username: None,
            session_id: None,
        }
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn fingerprint(mut self, fingerprint: Option<&str>) -> Self {
        self.key_fingerprint = fingerprint.map(str::to_string);
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration = Some(format!("{:.3}s", elapsed.as_secs_f64()));
        self
    }

    pub fn active(mut self, active: usize) -> Self {
        self.active_connections = Some(active);
        self
    }

    pub fn username(mut self, username: Option<&str>) -> Self {
        self.username = username.filter(|u| !u.is_empty()).map(str::to_string);
        self
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    fn fallback_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.timestamp,
            self.level.as_str(),
            self.event.as_str(),
            self.message
        )
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// Who a session-scoped record is about.
#[derive(Clone, Copy, Debug)]
pub struct Subject<'a> {
    pub ip: &'a str,
    pub fingerprint: Option<&'a str>,
    pub username: Option<&'a str>,
    pub session_id: &'a str,
}

impl Subject<'_> {
    fn stamp(&self, record: AuditRecord) -> AuditRecord {
        record
            .ip(self.ip)
            .fingerprint(self.fingerprint)
            .username(self.username)
            .session(self.session_id)
    }
}

pub struct AuditLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AuditLog {
    /// Opens `path` for appending, creating it and its parent directories.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let open_err = |source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let file = options.open(path).map_err(open_err)?;
        Ok(Self::from_writer(file))
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
        }
    }

    /// Appends one record. Write failures are reported to tracing, never returned.
    pub fn record(&self, record: AuditRecord) {
        let line = serde_json::to_string(&record).unwrap_or_else(|err| {
            tracing::warn!(target: "terminal_web::audit", error = %err, "audit record serialization failed");
            record.fallback_line()
        });
        tracing::debug!(target: "terminal_web::audit", event = record.event.as_str(), "{}", record.message);

        let mut sink = self.sink.lock();
        if let Err(err) = writeln!(sink, "{line}").and_then(|_| sink.flush()) {
            tracing::warn!(target: "terminal_web::audit", error = %err, "failed to append audit record");
        }
    }

    pub fn auth_key(&self, ip: &str, username: &str, fingerprint: &str) {
        self.record(
            AuditRecord::new(Level::Info, AuditEvent::AuthKey, "SSH key authentication accepted")
                .ip(ip)
                .username(Some(username))
                .fingerprint(Some(fingerprint)),
        );
    }

    pub fn auth_failure(&self, ip: &str, username: &str, reason: &str) {
        self.record(
            AuditRecord::new(Level::Warn, AuditEvent::AuthFailure, reason)
                .ip(ip)
                .username(Some(username)),
        );
    }

    pub fn rate_limited(&self, ip: &str, rate_limit: usize) {
        self.record(
            AuditRecord::new(
                Level::Warn,
                AuditEvent::RateLimit,
                format!("Rate limit exceeded ({rate_limit} connections per minute)"),
            )
            .ip(ip),
        );
    }

    pub fn at_capacity(&self, ip: &str, active: usize) {
        self.record(
            AuditRecord::new(
                Level::Warn,
                AuditEvent::MaxConnections,
                "Maximum concurrent sessions reached",
            )
            .ip(ip)
            .active(active),
        );
    }

    pub fn connect(&self, subject: Subject<'_>) {
        self.record(subject.stamp(AuditRecord::new(
            Level::Info,
            AuditEvent::Connect,
            "Client connected",
        )));
    }

    pub fn session_start(&self, subject: Subject<'_>, active: usize, max_active: usize) {
        self.record(
            subject
                .stamp(AuditRecord::new(
                    Level::Info,
                    AuditEvent::SessionStart,
                    format!("Session started ({active}/{max_active} active)"),
                ))
                .active(active),
        );
    }

    pub fn session_end(&self, subject: Subject<'_>, elapsed: Duration, active: usize) {
        self.record(
            subject
                .stamp(AuditRecord::new(Level::Info, AuditEvent::SessionEnd, "Session ended"))
                .duration(elapsed)
                .active(active),
        );
    }

    pub fn disconnect(&self, subject: Subject<'_>, elapsed: Duration) {
        self.record(
            subject
                .stamp(AuditRecord::new(
                    Level::Info,
                    AuditEvent::Disconnect,
                    "Client disconnected",
                ))
                .duration(elapsed),
        );
    }

    pub fn session_timeout(&self, subject: Subject<'_>, elapsed: Duration, reason: &str) {
        self.record(
            subject
                .stamp(AuditRecord::new(Level::Info, AuditEvent::SessionTimeout, reason))
                .duration(elapsed),
        );
    }

    pub fn error(&self, ip: Option<&str>, session_id: Option<&str>, op: &str, err: &dyn std::fmt::Display) {
        let mut record = AuditRecord::new(Level::Error, AuditEvent::Error, format!("{op}: {err}"));
        record.ip = ip.map(str::to_string);
        record.session_id = session_id.map(str::to_string);
        self.record(record);
    }
}
