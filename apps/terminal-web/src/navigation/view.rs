use super::{MIN_HEIGHT, MIN_WIDTH, Navigator};
use crate::navigation::keys::format_key_binding;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Clear, Padding, Paragraph};

const SIDEBAR_MIN_WIDTH: u16 = 15;
const MODAL_WIDTH: u16 = 50;
const MODAL_HEIGHT: u16 = 8;
const ACCENT: Color = Color::Cyan;

pub fn render(frame: &mut Frame, nav: &Navigator) {
    let area = frame.area();
    if nav.prompt().is_some() {
        render_prompt(frame, area, nav);
        return;
    }
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        render_too_small(frame, area);
        return;
    }

    let [header, body, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);
    let sidebar_width = (area.width / 4).max(SIDEBAR_MIN_WIDTH).min(area.width);
    let [content, sidebar] =
        Layout::horizontal([Constraint::Min(0), Constraint::Length(sidebar_width)]).areas(body);

    frame.render_widget(
        Paragraph::new(header_text(nav)).style(Style::default().add_modifier(Modifier::BOLD)),
        header,
    );
    render_content(frame, content, nav);
    render_sidebar(frame, sidebar, nav);
    frame.render_widget(Paragraph::new(footer_line(nav)), footer);
}

fn header_text(nav: &Navigator) -> String {
    let total = nav.page().sections.len();
    let position = if total == 0 { 0 } else { nav.section() + 1 };
    if !nav.pending_digits().is_empty() {
        return format!(
            "{position}/{total}: Jumping to section {}...",
            nav.pending_digits()
        );
    }
    match nav.current_section() {
        Some(section) => format!("{position}/{total}: {} - Press Tab to switch", section.title),
        None => format!("0/0: {}", nav.page().meta.title),
    }
}

fn render_content(frame: &mut Frame, area: Rect, nav: &Navigator) {
    let block = Block::bordered()
        .title(format!(" {} ", nav.page().meta.title))
        .padding(Padding::uniform(1));
    let lines: Vec<Line> = nav
        .current_section()
        .map(|section| {
            section
                .items
                .iter()
                .flat_map(|item| item.lines())
                .skip(nav.scroll())
                .take(nav.viewport_height())
                .map(Line::from)
                .collect()
        })
        .unwrap_or_default();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_sidebar(frame: &mut Frame, area: Rect, nav: &Navigator) {
    let block = Block::bordered().title(" Sections ");
    let room = usize::from(area.width.saturating_sub(2));
    let lines: Vec<Line> = nav
        .page()
        .sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            let active = index == nav.section();
            let marker = if active { "→ " } else { "  " };
            let text = truncate(&format!("{marker}[{}] {}", index + 1, section.title), room);
            if active {
                Line::from(Span::styled(
                    text,
                    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
                ))
            } else {
                Line::from(text)
            }
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn footer_line(nav: &Navigator) -> Line<'static> {
    let mut spans: Vec<Span> = Vec::new();
    for controller in nav.controllers() {
        if !spans.is_empty() {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::raw(format!(
            "{} [{}]",
            controller.label,
            format_key_binding(&controller.binding)
        )));
    }
    if let Some(notice) = nav.notice() {
        if !spans.is_empty() {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(
            notice.text.clone(),
            Style::default().fg(Color::Yellow),
        ));
    }
    Line::from(spans)
}

fn render_prompt(frame: &mut Frame, area: Rect, nav: &Navigator) {
    let Some(prompt) = nav.prompt() else {
        return;
    };
    let page_title = nav
        .page_title(prompt.target)
        .unwrap_or(prompt.message.as_str());
    let modal = centered(area, MODAL_WIDTH, MODAL_HEIGHT);
    let lines = vec![
        Line::from(Span::styled(
            format!("Navigate to {page_title}?"),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Press Enter to open this page"),
        Line::from(""),
        Line::from(Span::styled(
            "[Enter] Open  [Esc] Skip",
            Style::default().fg(ACCENT),
        )),
    ];
    frame.render_widget(Clear, modal);
    frame.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::bordered().title(format!(" {} ", prompt.message))),
        modal,
    );
}

fn render_too_small(frame: &mut Frame, area: Rect) {
    let middle = Rect::new(area.x, area.y + area.height / 2, area.width, 1.min(area.height));
    frame.render_widget(
        Paragraph::new("Terminal too small").alignment(Alignment::Center),
        middle,
    );
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ContentItem, PageContent, PageLink, PageLoadError, PageLoader, PageMeta, Section};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use std::sync::Arc;

    struct TwoPages {
        pages: Vec<PageMeta>,
    }

    impl TwoPages {
        fn new() -> Self {
            let meta = |id: &str, title: &str| PageMeta {
                id: id.to_string(),
                title: title.to_string(),
                description: None,
                order: None,
            };
            Self {
                pages: vec![meta("home", "Home"), meta("work", "Work History")],
            }
        }
    }

    impl PageLoader for TwoPages {
        fn pages(&self) -> &[PageMeta] {
            &self.pages
        }

        fn load(&self, id: &str) -> Result<PageContent, PageLoadError> {
            let meta = self
                .pages
                .iter()
                .find(|page| page.id == id)
                .cloned()
                .ok_or_else(|| PageLoadError::NotFound(id.to_string()))?;
            let sections = vec![
                Section {
                    title: "Summary".to_string(),
                    items: (1..=30)
                        .map(|i| ContentItem::Text(format!("summary line {i}")))
                        .collect(),
                    link: None,
                },
                Section {
                    title: "A section with an unreasonably long title".to_string(),
                    items: vec![ContentItem::Input {
                        placeholder: "email".to_string(),
                    }],
                    link: Some(PageLink {
                        target: "work".to_string(),
                        section_title: "Experience".to_string(),
                        description: None,
                    }),
                },
            ];
            Ok(PageContent {
                meta,
                sections,
                controllers: Vec::new(),
            })
        }
    }

    fn draw(nav: &Navigator) -> Vec<String> {
        let (width, height) = nav.size();
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| render(frame, nav)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(usize::from(buffer.area.width))
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect()
    }

    fn screen_contains(rows: &[String], needle: &str) -> bool {
        rows.iter().any(|row| row.contains(needle))
    }

    fn navigator(width: u16, height: u16) -> Navigator {
        let extra = vec![crate::document::Controller {
            label: "Back".to_string(),
            binding: crate::navigation::keys::parse_key_binding("b").unwrap(),
            event: crate::document::ControlEvent::Back,
        }];
        Navigator::new(Arc::new(TwoPages::new()), extra, 0, width, height).unwrap()
    }

    #[test]
    fn browsing_layout() {
        let nav = navigator(80, 20);
        let rows = draw(&nav);
        assert!(rows[0].starts_with("1/2: Summary - Press Tab to switch"));
        assert!(screen_contains(&rows, "summary line 1 "));
        assert!(screen_contains(&rows, "summary line 14"));
        assert!(!screen_contains(&rows, "summary line 15"), "viewport is height minus six");
        assert!(screen_contains(&rows, "→ [1] Summary"));
        assert!(screen_contains(&rows, "  [2] A section..."));
        assert!(rows[19].starts_with("Back [b]"));
    }

    #[test]
    fn scrolled_window_and_digit_indicator() {
        let mut nav = navigator(80, 20);
        nav.handle_key(KeyEvent::new(KeyCode::Char('j'), KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Char('2'), KeyModifiers::NONE));
        let rows = draw(&nav);
        assert!(rows[0].starts_with("1/2: Jumping to section 2..."));
        assert!(!screen_contains(&rows, "summary line 1 "));
        assert!(screen_contains(&rows, "summary line 15"));
    }

    #[test]
    fn prompt_replaces_screen() {
        let mut nav = navigator(80, 20);
        nav.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        let rows = draw(&nav);
        assert!(screen_contains(&rows, "Navigate to Work History?"));
        assert!(screen_contains(&rows, "Press Enter to open this page"));
        assert!(screen_contains(&rows, "[Enter] Open  [Esc] Skip"));
        assert!(!screen_contains(&rows, "Sections"));
    }

    #[test]
    fn notice_joins_footer() {
        let mut nav = navigator(80, 20);
        nav.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        let rows = draw(&nav);
        assert!(rows[19].contains("Back [b]  Not switched"));
    }

    #[test]
    fn prompt_stays_visible_on_a_short_terminal() {
        let mut nav = navigator(80, 20);
        nav.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        nav.resize(80, 9);
        let rows = draw(&nav);
        assert!(screen_contains(&rows, "Navigate to"));
        assert!(screen_contains(&rows, "[Esc] Skip"));
        assert!(!screen_contains(&rows, "Terminal too small"));

        nav.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        let rows = draw(&nav);
        assert!(screen_contains(&rows, "Terminal too small"));
    }

    #[test]
    fn prompt_clamps_to_a_narrow_terminal() {
        let mut nav = navigator(80, 20);
        nav.handle_key(KeyEvent::new(KeyCode::Tab, KeyModifiers::NONE));
        nav.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        nav.resize(12, 5);
        let rows = draw(&nav);
        assert!(!screen_contains(&rows, "Terminal too small"));
    }

    #[test]
    fn truncation_marks_cut_text() {
        assert_eq!(truncate("abcdef", 6), "abcdef");
        assert_eq!(truncate("abcdefg", 6), "abc...");
        assert_eq!(truncate("abcdefg", 2), "ab");
    }
}
