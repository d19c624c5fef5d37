//! The event loop that binds a [`Navigator`] to a terminal.

pub mod input;
#[cfg(unix)]
pub mod pty;

use crate::document::PageLoadError;
use crate::navigation::{Navigator, Step, view};
use crossterm::event::{self as term_event, Event as TermEvent, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{cursor, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::{Terminal, TerminalOptions, Viewport};
use std::io::{self, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("terminal io error: {0}")]
    Io(#[from] io::Error),
    #[error("terminal input closed")]
    InputClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Key(KeyEvent),
    Resize(u16, u16),
}

pub trait EventSource {
    /// Waits up to `timeout` for the next event. `Ok(None)` means nothing arrived.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>, ProgramError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Quit,
    Cancelled,
    InputClosed,
}

/// Runs until the navigator quits, `cancel` fires, or input ends. The
/// terminal is restored on every exit path. Failed page loads are passed to
/// `on_load_error` and browsing continues.
pub fn run<S, W, F>(
    mut navigator: Navigator,
    source: &mut S,
    output: W,
    cancel: &CancellationToken,
    mut on_load_error: F,
) -> Result<Exit, ProgramError>
where
    S: EventSource,
    W: Write,
    F: FnMut(&PageLoadError),
{
    let (width, height) = navigator.size();
    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(output),
        TerminalOptions {
            viewport: Viewport::Fixed(Rect::new(0, 0, width, height)),
        },
    )?;
    execute!(terminal.backend_mut(), EnterAlternateScreen, cursor::Hide)?;

    let outcome = event_loop(&mut navigator, &mut terminal, source, cancel, &mut on_load_error);

    let restored = terminal
        .show_cursor()
        .and_then(|_| execute!(terminal.backend_mut(), LeaveAlternateScreen));
    if let Err(err) = &restored {
        warn!(target: "terminal_web::program", error = %err, "failed to restore terminal");
    }
    let exit = outcome?;
    restored?;
    debug!(target: "terminal_web::program", ?exit, "program finished");
    Ok(exit)
}

fn event_loop<S, W, F>(
    navigator: &mut Navigator,
    terminal: &mut Terminal<CrosstermBackend<W>>,
    source: &mut S,
    cancel: &CancellationToken,
    on_load_error: &mut F,
) -> Result<Exit, ProgramError>
where
    S: EventSource,
    W: Write,
    F: FnMut(&PageLoadError),
{
    terminal.clear()?;
    terminal.draw(|frame| view::render(frame, navigator))?;
    loop {
        if cancel.is_cancelled() {
            return Ok(Exit::Cancelled);
        }
        let event = match source.next_event(TICK) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(ProgramError::InputClosed) => return Ok(Exit::InputClosed),
            Err(err) => return Err(err),
        };
        match event {
            Event::Key(key) => match navigator.handle_key(key) {
                Step::Quit => return Ok(Exit::Quit),
                Step::LoadFailed(err) => on_load_error(&err),
                Step::Continue => {}
            },
            Event::Resize(width, height) => {
                terminal.resize(Rect::new(0, 0, width, height))?;
                navigator.resize(width, height);
            }
        }
        terminal.draw(|frame| view::render(frame, navigator))?;
    }
}

/// Keyboard and resize events from the process's own terminal.
pub struct CrosstermEvents;

impl EventSource for CrosstermEvents {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>, ProgramError> {
        if !term_event::poll(timeout)? {
            return Ok(None);
        }
        Ok(match term_event::read()? {
            TermEvent::Key(key) if key.kind == KeyEventKind::Press => Some(Event::Key(key)),
            TermEvent::Resize(width, height) => Some(Event::Resize(width, height)),
            _ => None,
        })
    }
}

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if !enable {
            return Self(false);
        }
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                warn!(target: "terminal_web::program", error = %err, "failed to enable raw mode");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ContentItem, PageContent, PageLoader, PageMeta, Section};
    use crossterm::event::{KeyCode, KeyModifiers};
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct OnePage(Vec<PageMeta>);

    impl PageLoader for OnePage {
        fn pages(&self) -> &[PageMeta] {
            &self.0
        }

        fn load(&self, id: &str) -> Result<PageContent, PageLoadError> {
            Ok(PageContent {
                meta: self.0[0].clone(),
                sections: vec![Section {
                    title: format!("{id} intro"),
                    items: vec![ContentItem::Text("hello-from-the-page".to_string())],
                    link: None,
                }],
                controllers: Vec::new(),
            })
        }
    }

    struct Scripted(VecDeque<Result<Option<Event>, ProgramError>>);

    impl EventSource for Scripted {
        fn next_event(&mut self, _timeout: Duration) -> Result<Option<Event>, ProgramError> {
            self.0.pop_front().unwrap_or(Err(ProgramError::InputClosed))
        }
    }

    fn navigator() -> Navigator {
        let meta = PageMeta {
            id: "home".to_string(),
            title: "Home".to_string(),
            description: None,
            order: None,
        };
        Navigator::new(Arc::new(OnePage(vec![meta])), Vec::new(), 0, 60, 16).unwrap()
    }

    fn key(c: char) -> Result<Option<Event>, ProgramError> {
        Ok(Some(Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))))
    }

    #[test_timeout::timeout]
    fn quits_and_restores_terminal() {
        let mut source = Scripted(VecDeque::from([
            Ok(None),
            key('j'),
            Ok(Some(Event::Resize(70, 20))),
            key('q'),
        ]));
        let mut output = Vec::new();
        let exit = run(navigator(), &mut source, &mut output, &CancellationToken::new(), |_| {})
            .unwrap();
        assert_eq!(exit, Exit::Quit);

        let text = String::from_utf8_lossy(&output);
        assert!(text.starts_with("\x1b[?1049h"), "enters the alternate screen first");
        assert!(text.contains("hello-from-the-page"));
        assert!(text.ends_with("\x1b[?1049l"), "leaves the alternate screen last");
    }

    #[test_timeout::timeout]
    fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = Scripted(VecDeque::from([key('j')]));
        let exit = run(navigator(), &mut source, io::sink(), &cancel, |_| {}).unwrap();
        assert_eq!(exit, Exit::Cancelled);
    }

    #[test_timeout::timeout]
    fn closed_input_ends_quietly() {
        let mut source = Scripted(VecDeque::new());
        let exit = run(navigator(), &mut source, io::sink(), &CancellationToken::new(), |_| {})
            .unwrap();
        assert_eq!(exit, Exit::InputClosed);
    }
}
