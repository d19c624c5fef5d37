use super::pty::WindowSize;
use super::session::{ClientChannel, ConnectionInfo, SessionIo, SessionOrchestrator};
use crate::audit::AuditLog;
use async_trait::async_trait;
use russh::keys::{HashAlg, PrivateKey, PublicKey};
use russh::server::{self, Auth, Handle, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const INPUT_QUEUE: usize = 64;
const AUTH_REJECTION_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("failed to load host key {path:?}: {reason}")]
    HostKey { path: PathBuf, reason: String },
    #[error("ssh listener failed on {addr}: {source}")]
    Listen { addr: String, source: io::Error },
}

pub fn load_host_key(path: &Path) -> Result<PrivateKey, SshError> {
    russh::keys::load_secret_key(path, None).map_err(|err| SshError::HostKey {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Accepts SSH connections and hands each shell request to the orchestrator.
#[derive(Clone)]
pub struct SshServer {
    orchestrator: Arc<SessionOrchestrator>,
    audit: Arc<AuditLog>,
}

impl SshServer {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, audit: Arc<AuditLog>) -> Self {
        Self {
            orchestrator,
            audit,
        }
    }

    /// Listens on `host:port` until the listener fails.
    pub async fn serve(mut self, host_key: PrivateKey, host: &str, port: u16) -> Result<(), SshError> {
        let config = server::Config {
            keys: vec![host_key],
            auth_rejection_time: AUTH_REJECTION_DELAY,
            auth_rejection_time_initial: Some(Duration::ZERO),
            ..Default::default()
        };
        info!(target: "terminal_web::ssh", host, port, "ssh server listening");
        self.run_on_address(Arc::new(config), (host, port))
            .await
            .map_err(|source| SshError::Listen {
                addr: format!("{host}:{port}"),
                source,
            })
    }
}

impl server::Server for SshServer {
    type Handler = SshConnection;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> SshConnection {
        let ip = peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        debug!(target: "terminal_web::ssh", %ip, "connection accepted");
        SshConnection::new(ip, Arc::clone(&self.orchestrator), Arc::clone(&self.audit))
    }

    fn handle_session_error(&mut self, error: anyhow::Error) {
        warn!(target: "terminal_web::ssh", error = %error, "ssh session error");
        self.audit.error(None, None, "ssh_session", &error);
    }
}

/// State for one SSH connection. Only the first session channel is served.
pub struct SshConnection {
    orchestrator: Arc<SessionOrchestrator>,
    audit: Arc<AuditLog>,
    ip: String,
    fingerprint: Option<String>,
    username: Option<String>,
    channel: Option<ChannelId>,
    window: Option<WindowSize>,
    started: bool,
    input_tx: Option<mpsc::Sender<Vec<u8>>>,
    resize_tx: Option<mpsc::Sender<WindowSize>>,
}

impl SshConnection {
    fn new(ip: String, orchestrator: Arc<SessionOrchestrator>, audit: Arc<AuditLog>) -> Self {
        Self {
            orchestrator,
            audit,
            ip,
            fingerprint: None,
            username: None,
            channel: None,
            window: None,
            started: false,
            input_tx: None,
            resize_tx: None,
        }
    }

    fn start(&mut self, channel: ChannelId, session: &mut Session) {
        if self.started || self.channel != Some(channel) {
            return;
        }
        self.started = true;

        let (input_tx, input) = mpsc::channel(INPUT_QUEUE);
        let (resize_tx, resizes) = mpsc::channel(INPUT_QUEUE);
        self.input_tx = Some(input_tx);
        self.resize_tx = Some(resize_tx);

        let conn = ConnectionInfo {
            ip: self.ip.clone(),
            fingerprint: self.fingerprint.clone(),
            username: self.username.clone(),
            window: self.window,
        };
        let client: Arc<dyn ClientChannel> = Arc::new(SshClient {
            handle: session.handle(),
            channel,
        });
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            let end = orchestrator
                .run(conn, client, SessionIo { input, resizes })
                .await;
            debug!(target: "terminal_web::ssh", ?end, "session finished");
        });
    }
}

impl server::Handler for SshConnection {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        self.audit
            .auth_failure(&self.ip, user, "Password authentication disabled");
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn auth_publickey_offered(
        &mut self,
        _user: &str,
        _key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        self.audit.auth_key(&self.ip, user, &fingerprint);
        info!(target: "terminal_web::ssh", ip = %self.ip, user, %fingerprint, "public key accepted");
        self.fingerprint = Some(fingerprint);
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            debug!(target: "terminal_web::ssh", ip = %self.ip, "extra session channel refused");
            return Ok(false);
        }
        self.channel = Some(channel.id());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let window = window_size(col_width, row_height);
        debug!(target: "terminal_web::ssh", term, cols = window.cols, rows = window.rows, "pty requested");
        self.window = Some(window);
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        self.start(channel, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            target: "terminal_web::ssh",
            command = %String::from_utf8_lossy(data),
            "exec request served as a shell"
        );
        let _ = session.channel_success(channel);
        self.start(channel, session);
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = &self.input_tx {
            if tx.send(data.to_vec()).await.is_err() {
                self.input_tx = None;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let window = window_size(col_width, row_height);
        self.window = Some(window);
        if let Some(tx) = &self.resize_tx {
            let _ = tx.send(window).await;
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.input_tx = None;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.input_tx = None;
        self.resize_tx = None;
        Ok(())
    }
}

fn window_size(cols: u32, rows: u32) -> WindowSize {
    let clamp = |value: u32| u16::try_from(value).unwrap_or(u16::MAX);
    WindowSize::new(clamp(cols), clamp(rows))
}

struct SshClient {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl ClientChannel for SshClient {
    async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ssh channel closed"))
    }

    async fn exit(&self, status: u32) {
        let _ = self.handle.exit_status_request(self.channel, status).await;
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }
}
