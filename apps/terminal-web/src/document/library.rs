use super::{
    ContentItem, ControlEvent, Controller, PageContent, PageLink, PageLoadError, PageLoader,
    PageMeta, Section,
};
use crate::navigation::keys::parse_key_binding;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PAGE_EXTENSION: &str = "toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageFile {
    title: Option<String>,
    description: Option<String>,
    order: Option<i64>,
    #[serde(default, rename = "section")]
    sections: Vec<SectionFile>,
    #[serde(default, rename = "controller")]
    controllers: Vec<ControllerFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectionFile {
    title: Option<String>,
    link: Option<String>,
    link_description: Option<String>,
    #[serde(default)]
    items: Vec<ItemFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemFile {
    Text { text: String },
    Input { input: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerFile {
    key: String,
    action: String,
    label: Option<String>,
}

/// A directory of TOML page files.
#[derive(Debug)]
pub struct PageLibrary {
    root: PathBuf,
    pages: Vec<PageMeta>,
    home: usize,
}

impl PageLibrary {
    /// Scans `root` and picks `home` as the landing page, falling back to the first page.
    pub fn open(root: &Path, home: &str) -> Result<Self, PageLoadError> {
        let pages = discover_pages(root)?;
        if pages.is_empty() {
            return Err(PageLoadError::NotFound(home.to_string()));
        }
        let mut library = Self {
            root: root.to_path_buf(),
            pages,
            home: 0,
        };
        match library.index_of(home) {
            Some(index) => library.home = index,
            None => warn!(
                target: "terminal_web::document",
                home,
                fallback = %library.pages[0].id,
                "home page missing; using first page"
            ),
        }
        Ok(library)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home_index(&self) -> usize {
        self.home
    }
}

impl PageLoader for PageLibrary {
    fn pages(&self) -> &[PageMeta] {
        &self.pages
    }

    fn load(&self, id: &str) -> Result<PageContent, PageLoadError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| PageLoadError::NotFound(id.to_string()))?;
        let meta = self.pages[index].clone();
        let path = self.root.join(&meta.id);
        let raw = fs::read_to_string(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => PageLoadError::NotFound(meta.id.clone()),
            _ => PageLoadError::Io {
                path: path.clone(),
                source,
            },
        })?;
        let file = parse_page(&meta.id, &raw)?;
        build_content(meta, file)
    }

    /// Accepts either the file name or its stem.
    fn index_of(&self, id: &str) -> Option<usize> {
        let id = id.trim();
        self.pages
            .iter()
            .position(|page| page.id == id)
            .or_else(|| {
                let with_ext = format!("{id}.{PAGE_EXTENSION}");
                self.pages.iter().position(|page| page.id == with_ext)
            })
    }
}

fn parse_page(id: &str, raw: &str) -> Result<PageFile, PageLoadError> {
    toml::from_str(raw).map_err(|err| PageLoadError::Parse {
        id: id.to_string(),
        reason: err.message().to_string(),
    })
}

/// Lists the page files directly under `root` in navigation order. Files that
/// cannot be read or parsed are skipped.
pub fn discover_pages(root: &Path) -> Result<Vec<PageMeta>, PageLoadError> {
    let entries = fs::read_dir(root).map_err(|source| PageLoadError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut pages = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(PAGE_EXTENSION)
        {
            continue;
        }
        let Some(id) = path.file_name().and_then(|name| name.to_str()).map(str::to_string) else {
            continue;
        };
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "terminal_web::document", page = %id, error = %err, "skipping unreadable page");
                continue;
            }
        };
        let file = match parse_page(&id, &raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(target: "terminal_web::document", page = %id, error = %err, "skipping malformed page");
                continue;
            }
        };
        let title = file
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| title_from_file_name(&id));
        pages.push(PageMeta {
            id,
            title,
            description: file.description,
            order: file.order,
        });
    }

    pages.sort_by(compare_pages);
    debug!(target: "terminal_web::document", root = %root.display(), count = pages.len(), "discovered pages");
    Ok(pages)
}

fn compare_pages(a: &PageMeta, b: &PageMeta) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// `work-history.toml` becomes `Work History`.
pub fn title_from_file_name(file_name: &str) -> String {
    let stem = file_name
        .strip_suffix(&format!(".{PAGE_EXTENSION}"))
        .unwrap_or(file_name);
    stem.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_content(meta: PageMeta, file: PageFile) -> Result<PageContent, PageLoadError> {
    let sections = file
        .sections
        .into_iter()
        .map(|section| {
            let items: Vec<ContentItem> = section
                .items
                .into_iter()
                .map(|item| match item {
                    ItemFile::Text { text } => ContentItem::Text(text),
                    ItemFile::Input { input } => ContentItem::Input { placeholder: input },
                })
                .collect();
            let title = section
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| fallback_section_title(&items));
            let link = section.link.map(|target| PageLink {
                target,
                section_title: title.clone(),
                description: section.link_description,
            });
            Section { title, items, link }
        })
        .collect();

    let controllers = file
        .controllers
        .into_iter()
        .map(|controller| {
            let binding =
                parse_key_binding(&controller.key).ok_or_else(|| PageLoadError::Parse {
                    id: meta.id.clone(),
                    reason: format!("unrecognised key binding {:?}", controller.key),
                })?;
            let event = ControlEvent::from_action(&controller.action);
            Ok(Controller {
                label: controller.label.unwrap_or(controller.action),
                binding,
                event,
            })
        })
        .collect::<Result<Vec<_>, PageLoadError>>()?;

    Ok(PageContent {
        meta,
        sections,
        controllers,
    })
}

fn fallback_section_title(items: &[ContentItem]) -> String {
    items
        .iter()
        .find_map(|item| match item {
            ContentItem::Text(text) => text.lines().next().map(str::trim).map(str::to_string),
            ContentItem::Input { .. } => None,
        })
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "Section".to_string())
}
