//! Keystroke-driven navigation over a paged document.
//!
//! The navigator is a plain state machine: it owns no terminal and performs
//! no timing. [`crate::program`] feeds it one key at a time and draws
//! [`view::render`] after each transition.

pub mod keys;
pub mod view;

use crate::document::{ControlEvent, Controller, PageContent, PageLoadError, PageLoader, Section};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::Arc;
use tracing::debug;

/// Rows taken by the header, the content frame and padding, and the footer.
pub const CHROME_ROWS: u16 = 6;
pub const MIN_WIDTH: u16 = 20;
pub const MIN_HEIGHT: u16 = 10;
pub const NOTICE_TICKS: u8 = 3;

const NOT_SWITCHED: &str = "Not switched";
const LOAD_FAILED: &str = "Error loading page";

/// What the caller should do after a key has been applied.
#[derive(Debug)]
pub enum Step {
    Continue,
    /// A page load failed; state is unchanged apart from the inline notice.
    LoadFailed(PageLoadError),
    Quit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub target: usize,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub remaining: u8,
}

pub struct Navigator {
    loader: Arc<dyn PageLoader>,
    extra_controllers: Vec<Controller>,
    current_page: usize,
    page: PageContent,
    history: Vec<usize>,
    section: usize,
    scroll: usize,
    digits: String,
    prompt: Option<Prompt>,
    after_tab: bool,
    notice: Option<Notice>,
    width: u16,
    height: u16,
    quitting: bool,
}

impl Navigator {
    /// Loads page `start` and begins browsing it. `extra_controllers` are
    /// consulted after the page's own bindings.
    pub fn new(
        loader: Arc<dyn PageLoader>,
        extra_controllers: Vec<Controller>,
        start: usize,
        width: u16,
        height: u16,
    ) -> Result<Self, PageLoadError> {
        let id = loader
            .pages()
            .get(start)
            .map(|meta| meta.id.clone())
            .ok_or_else(|| PageLoadError::NotFound(format!("#{start}")))?;
        let page = loader.load(&id)?;
        Ok(Self {
            loader,
            extra_controllers,
            current_page: start,
            page,
            history: Vec::new(),
            section: 0,
            scroll: 0,
            digits: String::new(),
            prompt: None,
            after_tab: false,
            notice: None,
            width,
            height,
            quitting: false,
        })
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page(&self) -> &PageContent {
        &self.page
    }

    pub fn history(&self) -> &[usize] {
        &self.history
    }

    pub fn section(&self) -> usize {
        self.section
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn pending_digits(&self) -> &str {
        &self.digits
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn viewport_height(&self) -> usize {
        usize::from(self.height.saturating_sub(CHROME_ROWS))
    }

    pub fn page_title(&self, index: usize) -> Option<&str> {
        self.loader.pages().get(index).map(|meta| meta.title.as_str())
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.page.sections.get(self.section)
    }

    pub fn max_scroll(&self) -> usize {
        let content = self.current_section().map_or(0, Section::line_count);
        content.saturating_sub(self.viewport_height())
    }

    /// Page-level bindings first, then the shared script table.
    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.page.controllers.iter().chain(self.extra_controllers.iter())
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.scroll = self.scroll.min(self.max_scroll());
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Step {
        if key.kind != KeyEventKind::Press || self.quitting {
            return Step::Continue;
        }
        self.tick_notice();
        let after_tab = std::mem::take(&mut self.after_tab);

        if let KeyCode::Char(digit @ '0'..='9') = key.code {
            if keys::is_plain(&key) && self.prompt.is_none() {
                self.digits.push(digit);
                return Step::Continue;
            }
        }

        if key.code == KeyCode::Esc {
            self.digits.clear();
            if self.prompt.is_some() {
                self.decline_prompt();
            }
            return Step::Continue;
        }

        if self.prompt.is_some() {
            return match key.code {
                KeyCode::Enter | KeyCode::Char('y') => self.accept_prompt(),
                KeyCode::Char('n') => {
                    self.decline_prompt();
                    Step::Continue
                }
                _ => Step::Continue,
            };
        }

        if key.code == KeyCode::Enter && after_tab {
            if let Some(link) = self.current_section().and_then(|section| section.link.clone()) {
                match self.loader.index_of(&link.target) {
                    Some(target) => {
                        self.prompt = Some(Prompt {
                            target,
                            message: link.section_title,
                        });
                    }
                    None => debug!(
                        target: "terminal_web::navigation",
                        link = %link.target,
                        "link target is not a known page"
                    ),
                }
                return Step::Continue;
            }
        }

        let shift_tab = key.code == KeyCode::BackTab
            || (key.code == KeyCode::Tab && key.modifiers.contains(KeyModifiers::SHIFT));

        if key.code == KeyCode::Tab && !shift_tab {
            if self.digits.is_empty() {
                self.next_section();
            } else {
                self.jump_to_pending_section();
            }
            self.scroll = 0;
            self.after_tab = true;
            return Step::Continue;
        }

        if shift_tab {
            self.previous_section();
            self.scroll = 0;
            self.digits.clear();
            return Step::Continue;
        }

        match key.code {
            KeyCode::Char('j') | KeyCode::Down if keys::is_plain(&key) => {
                if self.max_scroll() > 0 {
                    self.scroll = (self.scroll + 1).min(self.max_scroll());
                }
                self.digits.clear();
                return Step::Continue;
            }
            KeyCode::Char('k') | KeyCode::Up if keys::is_plain(&key) => {
                self.scroll = self.scroll.saturating_sub(1);
                self.digits.clear();
                return Step::Continue;
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quitting = true;
                return Step::Quit;
            }
            KeyCode::Char('q') if keys::is_plain(&key) => {
                self.quitting = true;
                return Step::Quit;
            }
            _ => {}
        }

        let event = self
            .controllers()
            .find(|controller| controller.binding.matches(&key))
            .map(|controller| controller.event.clone());
        match event {
            Some(event) => self.dispatch(event),
            None => Step::Continue,
        }
    }

    fn dispatch(&mut self, event: ControlEvent) -> Step {
        match event {
            ControlEvent::Exit => {
                self.quitting = true;
                Step::Quit
            }
            ControlEvent::SwitchSections => {
                self.next_section();
                self.scroll = 0;
                Step::Continue
            }
            ControlEvent::Back => self.go_back(),
            ControlEvent::Custom(name) => {
                debug!(target: "terminal_web::navigation", action = %name, "custom action has no handler");
                Step::Continue
            }
        }
    }

    fn section_count(&self) -> usize {
        self.page.sections.len()
    }

    fn next_section(&mut self) {
        let count = self.section_count();
        self.section = if count == 0 { 0 } else { (self.section + 1) % count };
    }

    fn previous_section(&mut self) {
        let count = self.section_count();
        self.section = match (count, self.section) {
            (0, _) => 0,
            (_, 0) => count - 1,
            (_, current) => current - 1,
        };
    }

    fn jump_to_pending_section(&mut self) {
        let requested = std::mem::take(&mut self.digits).parse::<usize>().unwrap_or(0);
        let count = self.section_count();
        if requested == 0 || count == 0 {
            return;
        }
        self.section = (requested - 1).min(count - 1);
    }

    fn decline_prompt(&mut self) {
        self.prompt = None;
        self.next_section();
        self.scroll = 0;
        self.show_notice(NOT_SWITCHED);
    }

    fn accept_prompt(&mut self) -> Step {
        let Some(prompt) = self.prompt.take() else {
            return Step::Continue;
        };
        match self.load_page(prompt.target) {
            Ok(()) => {
                self.history.push(std::mem::replace(&mut self.current_page, prompt.target));
                Step::Continue
            }
            Err(err) => Step::LoadFailed(err),
        }
    }

    fn go_back(&mut self) -> Step {
        let Some(previous) = self.history.pop() else {
            return Step::Continue;
        };
        match self.load_page(previous) {
            Ok(()) => {
                self.current_page = previous;
                Step::Continue
            }
            Err(err) => {
                self.history.push(previous);
                Step::LoadFailed(err)
            }
        }
    }

    /// Replaces the page wholesale on success; on failure only the notice changes.
    fn load_page(&mut self, index: usize) -> Result<(), PageLoadError> {
        let loaded = self
            .loader
            .pages()
            .get(index)
            .ok_or_else(|| PageLoadError::NotFound(format!("#{index}")))
            .and_then(|meta| self.loader.load(&meta.id));
        match loaded {
            Ok(page) => {
                self.page = page;
                self.section = 0;
                self.scroll = 0;
                self.digits.clear();
                self.notice = None;
                Ok(())
            }
            Err(err) => {
                self.show_notice(LOAD_FAILED);
                Err(err)
            }
        }
    }

    fn show_notice(&mut self, text: &str) {
        self.notice = Some(Notice {
            text: text.to_string(),
            remaining: NOTICE_TICKS,
        });
    }

    fn tick_notice(&mut self) {
        if let Some(notice) = self.notice.as_mut() {
            notice.remaining = notice.remaining.saturating_sub(1);
            if notice.remaining == 0 {
                self.notice = None;
            }
        }
    }
}
