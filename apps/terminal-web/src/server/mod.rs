//! Per-connection session lifecycle behind the SSH transport.

pub mod pty;
pub mod session;
pub mod ssh;

pub use pty::{PtyError, PtyResizer, PtySession, WindowSize};
pub use session::{
    ClientChannel, ConnectionInfo, SessionContext, SessionDeps, SessionEnd, SessionIo,
    SessionLimits, SessionOrchestrator,
};
pub use ssh::{SshError, SshServer, load_host_key};
