use super::pty::{PtySession, WindowSize};
use crate::admission::{AdmissionController, AdmissionPermit, Rejection};
use crate::audit::{AuditLog, Subject};
use crate::document::{BindingTable, PageLoader};
use crate::navigation::Navigator;
use crate::program::{self, pty::PtyEvents};
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PTY_REQUIRED: &str = "PTY is required for this application";
const MAX_DURATION_NOTICE: &str = "\r\nSession timeout: Maximum duration reached.\r\n";
const IDLE_NOTICE: &str = "\r\nSession timeout: Idle limit reached.\r\n";
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);
const OUTPUT_CHUNK: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_duration: Duration,
    pub idle_timeout: Duration,
}

/// Everything a session needs from the process, passed in explicitly.
pub struct SessionDeps {
    pub library: Arc<dyn PageLoader>,
    pub home: usize,
    pub bindings: Arc<BindingTable>,
    pub admission: Arc<AdmissionController>,
    pub audit: Arc<AuditLog>,
    pub limits: SessionLimits,
}

/// What the transport learned about the client before the shell started.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub ip: String,
    pub fingerprint: Option<String>,
    pub username: Option<String>,
    pub window: Option<WindowSize>,
}

/// The client's end of the session channel.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    async fn send(&self, bytes: &[u8]) -> io::Result<()>;
    async fn exit(&self, status: u32);
}

/// Client keystrokes and window-size changes. The session treats the end of
/// `input` as a disconnect.
pub struct SessionIo {
    pub input: mpsc::Receiver<Vec<u8>>,
    pub resizes: mpsc::Receiver<WindowSize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Rejected(Rejection),
    PtyRequired,
    Failed,
    Completed,
    MaxDuration,
    IdleTimeout,
    Disconnected,
}

impl SessionEnd {
    /// Exit status reported to the client, if it is still there to receive one.
    pub fn exit_status(self) -> Option<u32> {
        match self {
            SessionEnd::Rejected(_) | SessionEnd::PtyRequired | SessionEnd::Failed => Some(1),
            SessionEnd::Completed | SessionEnd::MaxDuration | SessionEnd::IdleTimeout => Some(0),
            SessionEnd::Disconnected => None,
        }
    }
}

/// Identity and cancellation handle of one admitted session.
pub struct SessionContext {
    pub id: String,
    pub ip: String,
    pub fingerprint: Option<String>,
    pub username: Option<String>,
    pub started: Instant,
    pub cancel: CancellationToken,
}

impl SessionContext {
    fn new(conn: &ConnectionInfo) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ip: conn.ip.clone(),
            fingerprint: conn.fingerprint.clone(),
            username: conn.username.clone(),
            started: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn subject(&self) -> Subject<'_> {
        Subject {
            ip: &self.ip,
            fingerprint: self.fingerprint.as_deref(),
            username: self.username.as_deref(),
            session_id: &self.id,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Releases the session slot and writes the closing records when dropped.
struct SessionGuard {
    ctx: SessionContext,
    permit: Option<AdmissionPermit>,
    audit: Arc<AuditLog>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
        let active = self.permit.take().map_or(0, AdmissionPermit::release);
        let elapsed = self.ctx.elapsed();
        self.audit.session_end(self.ctx.subject(), elapsed, active);
        self.audit.disconnect(self.ctx.subject(), elapsed);
        info!(
            target: "terminal_web::session",
            session_id = %self.ctx.id,
            ip = %self.ctx.ip,
            elapsed_ms = elapsed.as_millis() as u64,
            active,
            "session closed"
        );
    }
}

pub struct SessionOrchestrator {
    deps: SessionDeps,
}

impl SessionOrchestrator {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.deps.admission
    }

    pub fn audit(&self) -> &AuditLog {
        &self.deps.audit
    }

    /// Drives one shell request from admission to exit status.
    pub async fn run(
        &self,
        conn: ConnectionInfo,
        client: Arc<dyn ClientChannel>,
        io: SessionIo,
    ) -> SessionEnd {
        let end = self.serve(&conn, &client, io).await;
        if let Some(status) = end.exit_status() {
            client.exit(status).await;
        }
        end
    }

    async fn serve(
        &self,
        conn: &ConnectionInfo,
        client: &Arc<dyn ClientChannel>,
        io: SessionIo,
    ) -> SessionEnd {
        let deps = &self.deps;
        let permit = match deps.admission.acquire(&conn.ip) {
            Ok(permit) => permit,
            Err(rejection) => return self.refuse(&conn.ip, client, rejection).await,
        };

        let ctx = SessionContext::new(conn);
        let active = permit.active();
        deps.audit.connect(ctx.subject());
        deps.audit
            .session_start(ctx.subject(), active, deps.admission.max_active());
        info!(
            target: "terminal_web::session",
            session_id = %ctx.id,
            ip = %ctx.ip,
            active,
            "session started"
        );
        let guard = SessionGuard {
            ctx,
            permit: Some(permit),
            audit: Arc::clone(&deps.audit),
        };

        let Some(window) = conn.window else {
            self.report(&guard.ctx, "pty_request", &PTY_REQUIRED);
            let _ = client.send(format!("{PTY_REQUIRED}\r\n").as_bytes()).await;
            return SessionEnd::PtyRequired;
        };
        self.attach(&guard.ctx, client, io, window).await
    }

    async fn refuse(
        &self,
        ip: &str,
        client: &Arc<dyn ClientChannel>,
        rejection: Rejection,
    ) -> SessionEnd {
        let admission = &self.deps.admission;
        match rejection {
            Rejection::RateLimited => self.deps.audit.rate_limited(ip, admission.rate_limit()),
            Rejection::AtCapacity => self.deps.audit.at_capacity(ip, admission.active()),
        }
        info!(target: "terminal_web::session", %ip, %rejection, "connection refused");
        let message = rejection.client_message(admission.rate_limit());
        let _ = client.send(format!("{message}\r\n").as_bytes()).await;
        SessionEnd::Rejected(rejection)
    }

    async fn attach(
        &self,
        ctx: &SessionContext,
        client: &Arc<dyn ClientChannel>,
        io: SessionIo,
        window: WindowSize,
    ) -> SessionEnd {
        let deps = &self.deps;
        let mut pty = match PtySession::open(window) {
            Ok(pty) => pty,
            Err(err) => {
                self.report(ctx, "pty_open", &err);
                let _ = client.send(b"Failed to allocate a terminal\r\n").await;
                return SessionEnd::Failed;
            }
        };
        let handles = pty.program_terminal().and_then(|terminal| {
            Ok((terminal, pty.output_reader()?, pty.input_writer()?))
        });
        let ((program_in, program_out), output_reader, input_writer) = match handles {
            Ok(handles) => handles,
            Err(err) => {
                self.report(ctx, "pty_open", &err);
                let _ = client.send(b"Failed to allocate a terminal\r\n").await;
                return SessionEnd::Failed;
            }
        };
        let navigator = match Navigator::new(
            Arc::clone(&deps.library),
            deps.bindings.controllers().to_vec(),
            deps.home,
            window.cols,
            window.rows,
        ) {
            Ok(navigator) => navigator,
            Err(err) => {
                self.report(ctx, "page_load", &err);
                let _ = client.send(b"Document unavailable\r\n").await;
                return SessionEnd::Failed;
            }
        };

        let SessionIo {
            input: mut client_input,
            resizes: mut client_resizes,
        } = io;

        let resizer = pty.resizer();
        let resize_task = tokio::spawn(async move {
            while let Some(size) = client_resizes.recv().await {
                if let Err(err) = resizer.resize(size) {
                    warn!(target: "terminal_web::session", error = %err, "resize failed");
                }
            }
        });

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
        std::thread::spawn(move || pump_output(output_reader, output_tx));
        let forward_client = Arc::clone(client);
        let mut forwarder = tokio::spawn(async move {
            while let Some(chunk) = output_rx.recv().await {
                if forward_client.send(&chunk).await.is_err() {
                    break;
                }
            }
        });

        // The writer stays open until the program is joined; dropping it
        // injects an end-of-file sequence into the terminal.
        let (keys_tx, keys_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        std::thread::spawn(move || pump_input(input_writer, keys_rx));
        let activity = Arc::new(Notify::new());
        let disconnected = CancellationToken::new();
        let input_task = tokio::spawn({
            let keys_tx = keys_tx.clone();
            let activity = Arc::clone(&activity);
            let disconnected = disconnected.clone();
            async move {
                while let Some(chunk) = client_input.recv().await {
                    activity.notify_one();
                    if keys_tx.send(chunk).is_err() {
                        break;
                    }
                }
                disconnected.cancel();
            }
        });

        let mut program = tokio::task::spawn_blocking({
            let cancel = ctx.cancel.clone();
            let audit = Arc::clone(&deps.audit);
            let ip = ctx.ip.clone();
            let session_id = ctx.id.clone();
            move || {
                let mut events = PtyEvents::new(program_in);
                program::run(navigator, &mut events, program_out, &cancel, |err| {
                    audit.error(Some(ip.as_str()), Some(session_id.as_str()), "page_load", err)
                })
            }
        });

        let limits = deps.limits;
        let deadline = tokio::time::sleep(limits.max_duration);
        tokio::pin!(deadline);
        let idle = tokio::time::sleep(limits.idle_timeout);
        tokio::pin!(idle);
        let mut joined = false;
        let end = loop {
            tokio::select! {
                biased;
                result = &mut program => {
                    joined = true;
                    break match result {
                        Ok(Ok(exit)) => {
                            debug!(target: "terminal_web::session", session_id = %ctx.id, ?exit, "program exited");
                            SessionEnd::Completed
                        }
                        Ok(Err(err)) => {
                            self.report(ctx, "program", &err);
                            SessionEnd::Failed
                        }
                        Err(err) => {
                            self.report(ctx, "program", &err);
                            SessionEnd::Failed
                        }
                    };
                }
                _ = disconnected.cancelled() => break SessionEnd::Disconnected,
                _ = &mut deadline => break SessionEnd::MaxDuration,
                _ = &mut idle => break SessionEnd::IdleTimeout,
                _ = activity.notified() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + limits.idle_timeout);
                }
            }
        };

        ctx.cancel.cancel();
        if !joined {
            if let Err(err) = program.await {
                warn!(target: "terminal_web::session", error = %err, "program task failed during teardown");
            }
        }
        pty.close_secondary();
        drop(keys_tx);
        input_task.abort();
        resize_task.abort();
        if tokio::time::timeout(OUTPUT_DRAIN, &mut forwarder).await.is_err() {
            forwarder.abort();
        }

        let (reason, notice) = match end {
            SessionEnd::MaxDuration => ("Maximum session duration reached", MAX_DURATION_NOTICE),
            SessionEnd::IdleTimeout => ("Idle timeout reached", IDLE_NOTICE),
            _ => return end,
        };
        deps.audit.session_timeout(ctx.subject(), ctx.elapsed(), reason);
        info!(target: "terminal_web::session", session_id = %ctx.id, reason, "session timed out");
        let _ = client.send(notice.as_bytes()).await;
        end
    }

    fn report(&self, ctx: &SessionContext, op: &str, err: &dyn std::fmt::Display) {
        warn!(target: "terminal_web::session", session_id = %ctx.id, op, error = %err, "session error");
        self.deps.audit.error(Some(ctx.ip.as_str()), Some(ctx.id.as_str()), op, err);
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; OUTPUT_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                if tx.blocking_send(buf[..read].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // EIO once every secondary handle is closed.
                debug!(target: "terminal_web::session", error = %err, "pty output closed");
                break;
            }
        }
    }
}

fn pump_input(mut writer: Box<dyn Write + Send>, rx: crossbeam_channel::Receiver<Vec<u8>>) {
    while let Ok(chunk) = rx.recv() {
        if let Err(err) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
            debug!(target: "terminal_web::session", error = %err, "pty input closed");
            break;
        }
    }
}
