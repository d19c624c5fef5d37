//! Page content model and the loader seam the navigator reads through.

pub mod library;
pub mod script;

use crate::navigation::keys::KeyBinding;
use std::path::PathBuf;

pub use library::PageLibrary;
pub use script::{BindingTable, ScriptError};

#[derive(Debug, thiserror::Error)]
pub enum PageLoadError {
    #[error("page {0:?} not found")]
    NotFound(String),
    #[error("page {id:?} is malformed: {reason}")]
    Parse { id: String, reason: String },
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Directory-level facts about a page, known before it is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageMeta {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub order: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentItem {
    Text(String),
    Input { placeholder: String },
}

impl ContentItem {
    /// Rendered lines; every embedded newline starts a new one.
    pub fn lines(&self) -> Vec<String> {
        match self {
            ContentItem::Text(text) => text.split('\n').map(str::to_string).collect(),
            ContentItem::Input { placeholder } => vec![format!("[ {placeholder} ]")],
        }
    }

    pub fn line_count(&self) -> usize {
        match self {
            ContentItem::Text(text) => text.split('\n').count(),
            ContentItem::Input { .. } => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLink {
    pub target: String,
    pub section_title: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub items: Vec<ContentItem>,
    pub link: Option<PageLink>,
}

impl Section {
    pub fn line_count(&self) -> usize {
        self.items.iter().map(ContentItem::line_count).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Exit,
    SwitchSections,
    Back,
    /// Reserved for script-defined behaviour; dispatching one does nothing.
    Custom(String),
}

impl ControlEvent {
    pub fn from_action(action: &str) -> Self {
        match action.trim().to_ascii_lowercase().as_str() {
            "quit" | "exit" => ControlEvent::Exit,
            "back" => ControlEvent::Back,
            "switch-sections" | "switch_sections" | "next-section" => ControlEvent::SwitchSections,
            other => ControlEvent::Custom(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Controller {
    pub label: String,
    pub binding: KeyBinding,
    pub event: ControlEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageContent {
    pub meta: PageMeta,
    pub sections: Vec<Section>,
    pub controllers: Vec<Controller>,
}

pub trait PageLoader: Send + Sync {
    /// Every known page in navigation order.
    fn pages(&self) -> &[PageMeta];

    fn load(&self, id: &str) -> Result<PageContent, PageLoadError>;

    fn index_of(&self, id: &str) -> Option<usize> {
        self.pages().iter().position(|page| page.id == id)
    }
}
