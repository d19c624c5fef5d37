use crate::program::pty::make_raw;
use parking_lot::Mutex;
use portable_pty::{MasterPty, PtySize, SlavePty, native_pty_system};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Open(String),
    #[error("pseudo-terminal has no secondary device path")]
    NoDevicePath,
    #[error("failed to open secondary device {path:?}: {source}")]
    Secondary {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pseudo-terminal io failed: {0}")]
    Io(String),
    #[error("pseudo-terminal already closed")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Applies window-size changes to a pseudo-terminal from another task.
#[derive(Clone)]
pub struct PtyResizer {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
}

impl PtyResizer {
    pub fn resize(&self, size: WindowSize) -> Result<(), PtyError> {
        self.master
            .lock()
            .resize(size.to_pty_size())
            .map_err(|err| PtyError::Io(format!("{err:#}")))
    }
}

/// A pseudo-terminal pair hosting an in-process program. The primary side
/// is proxied to the client; the secondary side is in raw mode and handed to
/// the program as its terminal.
pub struct PtySession {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    slave_handle: Option<Box<dyn SlavePty + Send>>,
    secondary: Option<File>,
}

impl PtySession {
    pub fn open(size: WindowSize) -> Result<Self, PtyError> {
        let pair = native_pty_system()
            .openpty(size.to_pty_size())
            .map_err(|err| PtyError::Open(format!("{err:#}")))?;

        let path = pair
            .master
            .as_raw_fd()
            .and_then(secondary_path)
            .ok_or(PtyError::NoDevicePath)?;
        let secondary = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| PtyError::Secondary {
                path: path.clone(),
                source,
            })?;
        make_raw(std::os::fd::AsRawFd::as_raw_fd(&secondary)).map_err(|source| {
            PtyError::Secondary {
                path: path.clone(),
                source,
            }
        })?;

        Ok(Self {
            master: Arc::new(Mutex::new(pair.master)),
            slave_handle: Some(pair.slave),
            secondary: Some(secondary),
        })
    }

    pub fn resizer(&self) -> PtyResizer {
        PtyResizer {
            master: Arc::clone(&self.master),
        }
    }

    pub fn resize(&self, size: WindowSize) -> Result<(), PtyError> {
        self.resizer().resize(size)
    }

    /// Bytes the program writes to its terminal.
    pub fn output_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master
            .lock()
            .try_clone_reader()
            .map_err(|err| PtyError::Io(format!("{err:#}")))
    }

    /// Where client keystrokes go. Can be taken once.
    pub fn input_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master
            .lock()
            .take_writer()
            .map_err(|err| PtyError::Io(format!("{err:#}")))
    }

    /// Independent read and write handles on the secondary side for the program.
    pub fn program_terminal(&self) -> Result<(File, File), PtyError> {
        let secondary = self.secondary.as_ref().ok_or(PtyError::Closed)?;
        let dup = || {
            secondary
                .try_clone()
                .map_err(|err| PtyError::Io(err.to_string()))
        };
        Ok((dup()?, dup()?))
    }

    /// Drops this session's secondary handles. Once the program's handles are
    /// also gone, reads on the primary side return end-of-file.
    pub fn close_secondary(&mut self) {
        self.secondary.take();
        self.slave_handle.take();
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close_secondary();
    }
}

#[cfg(target_os = "linux")]
fn secondary_path(master_fd: std::os::fd::RawFd) -> Option<PathBuf> {
    let mut buf = [0 as libc::c_char; 128];
    let rc = unsafe { libc::ptsname_r(master_fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    Some(PathBuf::from(name.to_string_lossy().into_owned()))
}

#[cfg(not(target_os = "linux"))]
fn secondary_path(_master_fd: std::os::fd::RawFd) -> Option<PathBuf> {
    None
}
