use super::input::KeyDecoder;
use super::{Event, EventSource, ProgramError};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tracing::trace;

/// Reads key presses and window-size changes from the secondary side of a
/// pseudo-terminal. The size is re-read on every poll since no signal is
/// delivered to an in-process reader.
pub struct PtyEvents {
    input: File,
    decoder: KeyDecoder,
    queued: VecDeque<Event>,
    size: (u16, u16),
}

impl PtyEvents {
    pub fn new(input: File) -> Self {
        let size = window_size(input.as_raw_fd()).unwrap_or((80, 24));
        Self {
            input,
            decoder: KeyDecoder::new(),
            queued: VecDeque::new(),
            size,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    fn check_resize(&mut self) {
        if let Ok(size) = window_size(self.input.as_raw_fd()) {
            if size != self.size && size.0 > 0 && size.1 > 0 {
                self.size = size;
                self.queued.push_back(Event::Resize(size.0, size.1));
            }
        }
    }
}

impl EventSource for PtyEvents {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>, ProgramError> {
        if let Some(event) = self.queued.pop_front() {
            return Ok(Some(event));
        }
        self.check_resize();
        if let Some(event) = self.queued.pop_front() {
            return Ok(Some(event));
        }
        if !wait_readable(self.input.as_raw_fd(), timeout)? {
            self.queued
                .extend(self.decoder.flush().into_iter().map(Event::Key));
            return Ok(self.queued.pop_front());
        }

        let mut buf = [0u8; 1024];
        let read = match self.input.read(&mut buf) {
            Ok(0) => return Err(ProgramError::InputClosed),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(err) if err.raw_os_error() == Some(libc::EIO) => {
                return Err(ProgramError::InputClosed);
            }
            Err(err) => return Err(err.into()),
        };
        trace!(target: "terminal_web::program", bytes = read, "pty input");
        self.queued
            .extend(self.decoder.decode(&buf[..read]).into_iter().map(Event::Key));
        Ok(self.queued.pop_front())
    }
}

fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool, ProgramError> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err.into());
    }
    if rc == 0 {
        return Ok(false);
    }
    if pollfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
        && pollfd.revents & libc::POLLIN == 0
    {
        return Err(ProgramError::InputClosed);
    }
    Ok(true)
}

/// Columns and rows as the kernel currently reports them for `fd`.
pub fn window_size(fd: RawFd) -> io::Result<(u16, u16)> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws as *mut libc::winsize) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((ws.ws_col, ws.ws_row))
}

/// Puts the terminal behind `fd` into raw mode.
pub fn make_raw(fd: RawFd) -> io::Result<()> {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };
    unsafe { libc::cfmakeraw(&mut termios) };
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
