#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};

use crate::core::resolve::fuzzy_rank;
use crate::error::WtError;
use crate::tui;

#[derive(Debug, Clone)]
pub struct PickerItem {
    pub title: String,
    pub preview: String,
}

impl PickerItem {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            preview: String::new(),
        }
    }
}

/// List selection. `Ok(None)` is a cancel (Esc, `q` on an empty query, Ctrl-C).
pub trait Picker {
    fn is_interactive(&self) -> bool;

    fn pick_one(
        &self,
        title: &str,
        items: &[PickerItem],
        query: &str,
    ) -> Result<Option<usize>, WtError>;

    fn pick_many(&self, title: &str, items: &[PickerItem]) -> Result<Option<Vec<usize>>, WtError>;
}

/// Full-screen ratatui picker, interactive only when stdin and stderr are terminals.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPicker;

impl Picker for TerminalPicker {
    fn is_interactive(&self) -> bool {
        tui::is_tty()
    }

    fn pick_one(
        &self,
        title: &str,
        items: &[PickerItem],
        query: &str,
    ) -> Result<Option<usize>, WtError> {
        Ok(run_picker(title, items, query, false)?.and_then(|v| v.into_iter().next()))
    }

    fn pick_many(&self, title: &str, items: &[PickerItem]) -> Result<Option<Vec<usize>>, WtError> {
        run_picker(title, items, "", true)
    }
}

/// Never prompts, so resolution reports ambiguity instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePicker;

impl Picker for NonInteractivePicker {
    fn is_interactive(&self) -> bool {
        false
    }

    fn pick_one(&self, _: &str, _: &[PickerItem], _: &str) -> Result<Option<usize>, WtError> {
        Err(WtError::Other("interactive selection requires a TTY".to_owned()))
    }

    fn pick_many(&self, _: &str, _: &[PickerItem]) -> Result<Option<Vec<usize>>, WtError> {
        Err(WtError::Other("interactive selection requires a TTY".to_owned()))
    }
}

enum KeyOutcome {
    Continue,
    Accept,
    Cancel,
}

struct PickerState {
    query: String,
    filtered: Vec<usize>,
    selected: usize,
    list_state: ListState,
    marked: BTreeSet<usize>,
    show_help: bool,
}

impl PickerState {
    fn new(titles: &[String], query: &str) -> Self {
        let mut state = Self {
            query: query.to_owned(),
            filtered: Vec::new(),
            selected: 0,
            list_state: ListState::default(),
            marked: BTreeSet::new(),
            show_help: false,
        };
        state.recompute_filter(titles);
        state
    }

    fn recompute_filter(&mut self, titles: &[String]) {
        self.filtered = fuzzy_rank(&self.query, titles);
        if self.selected >= self.filtered.len() {
            self.selected = 0;
        }
        self.list_state
            .select((!self.filtered.is_empty()).then_some(self.selected));
    }

    fn move_to(&mut self, idx: usize) {
        self.selected = idx.min(self.filtered.len().saturating_sub(1));
        self.list_state.select(Some(self.selected));
    }

    fn handle_key(&mut self, key: KeyEvent, titles: &[String], multi: bool) -> KeyOutcome {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => return KeyOutcome::Cancel,
            KeyCode::Char('n') if ctrl => self.move_to(self.selected + 1),
            KeyCode::Char('p') if ctrl => self.move_to(self.selected.saturating_sub(1)),
            KeyCode::Esc => return KeyOutcome::Cancel,
            KeyCode::Char('q') if self.query.is_empty() => return KeyOutcome::Cancel,
            KeyCode::Char('?') if self.query.is_empty() => self.show_help = !self.show_help,
            KeyCode::Enter if !self.filtered.is_empty() || !self.marked.is_empty() => {
                return KeyOutcome::Accept;
            }
            KeyCode::Tab => {
                if multi
                    && let Some(&idx) = self.filtered.get(self.selected)
                    && !self.marked.insert(idx)
                {
                    self.marked.remove(&idx);
                }
            }
            KeyCode::Up => self.move_to(self.selected.saturating_sub(1)),
            KeyCode::Down => self.move_to(self.selected + 1),
            KeyCode::PageUp => self.move_to(self.selected.saturating_sub(10)),
            KeyCode::PageDown => self.move_to(self.selected + 10),
            KeyCode::Backspace => {
                self.query.pop();
                self.recompute_filter(titles);
            }
            KeyCode::Char(c) if !ctrl && !key.modifiers.contains(KeyModifiers::ALT) => {
                self.query.push(c);
                self.recompute_filter(titles);
            }
            _ => {}
        }
        KeyOutcome::Continue
    }

    fn selection(&self, multi: bool) -> Vec<usize> {
        if multi && !self.marked.is_empty() {
            return self.marked.iter().copied().collect();
        }
        self.filtered.get(self.selected).copied().into_iter().collect()
    }
}

fn run_picker(
    title: &str,
    items: &[PickerItem],
    query: &str,
    multi: bool,
) -> Result<Option<Vec<usize>>, WtError> {
    if items.is_empty() {
        return Err(WtError::Other(
            "no items available for selection".to_owned(),
        ));
    }
    if !tui::is_tty() {
        return Err(WtError::Other(
            "interactive selection requires a TTY".to_owned(),
        ));
    }

    let mut session = tui::TerminalSession::start()?;

    let titles: Vec<String> = items.iter().map(|i| i.title.clone()).collect();
    let mut state = PickerState::new(&titles, query);

    loop {
        session
            .terminal()
            .draw(|f| draw_ui(f, title, items, &mut state, multi))
            .map_err(|e| WtError::Other(format!("failed to draw picker: {e}")))?;

        if !event::poll(Duration::from_millis(50))
            .map_err(|e| WtError::Other(format!("event poll failed: {e}")))?
        {
            continue;
        }
        let Event::Key(key) =
            event::read().map_err(|e| WtError::Other(format!("event read failed: {e}")))?
        else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match state.handle_key(key, &titles, multi) {
            KeyOutcome::Continue => {}
            KeyOutcome::Cancel => return Ok(None),
            KeyOutcome::Accept => return Ok(Some(state.selection(multi))),
        }
    }
}

fn draw_ui(
    f: &mut Frame<'_>,
    title: &str,
    items: &[PickerItem],
    state: &mut PickerState,
    multi: bool,
) {
    let area = f.area();
    let outer = Block::default().title(title).borders(Borders::ALL);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(2)])
        .split(inner);

    let has_preview = items.iter().any(|i| !i.preview.is_empty());
    let body = if has_preview {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[0])
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(100)])
            .split(chunks[0])
    };

    let list_items: Vec<ListItem> = state
        .filtered
        .iter()
        .map(|&idx| {
            let mut line = items[idx].title.clone();
            if multi {
                let marker = if state.marked.contains(&idx) {
                    "[x] "
                } else {
                    "[ ] "
                };
                line = format!("{marker}{line}");
            }
            ListItem::new(Line::from(line))
        })
        .collect();

    let list = List::new(list_items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            "{}/{}",
            state.filtered.len(),
            items.len()
        )))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">");
    f.render_stateful_widget(list, body[0], &mut state.list_state);

    if has_preview {
        let preview = state
            .filtered
            .get(state.selected)
            .map(|&idx| items[idx].preview.clone())
            .unwrap_or_default();
        let preview = Paragraph::new(preview)
            .block(Block::default().borders(Borders::ALL).title("Preview"))
            .wrap(Wrap { trim: false });
        f.render_widget(preview, body[1]);
    }

    let help = if multi {
        "Type to filter • Tab mark • Enter accept • Esc cancel"
    } else {
        "Type to filter • Enter accept • Esc cancel"
    };

    let bottom = Paragraph::new(Line::from(vec![
        Span::styled("Query: ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(state.query.as_str()),
        Span::raw("  "),
        Span::styled(help, Style::default().fg(Color::DarkGray)),
    ]));
    f.render_widget(bottom, chunks[1]);

    if state.show_help {
        let popup_area = centered_rect(70, 60, area);
        f.render_widget(Clear, popup_area);
        let mut lines = vec![
            Line::from("Keys:"),
            Line::from("  ↑/↓, C-p/C-n  Move"),
            Line::from("  PgUp/PgDn     Page"),
            Line::from("  Enter         Accept"),
            Line::from("  Esc, C-c      Cancel (q too, on an empty query)"),
            Line::from("  Backspace     Delete query char"),
            Line::from("  ?             Toggle help (empty query)"),
        ];
        if multi {
            lines.push(Line::from("  Tab           Mark/unmark"));
        }
        let popup = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Help"))
            .wrap(Wrap { trim: false });
        f.render_widget(popup, popup_area);
    }
}

fn centered_rect(
    percent_x: u16,
    percent_y: u16,
    r: ratatui::layout::Rect,
) -> ratatui::layout::Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn titles() -> Vec<String> {
        ["main", "feature-x", "feature-y"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }

    #[test]
    fn typing_filters_and_q_only_cancels_on_empty_query() {
        let titles = titles();
        let mut state = PickerState::new(&titles, "");
        assert_eq!(state.filtered, vec![0, 1, 2]);

        assert!(matches!(
            state.handle_key(key(KeyCode::Char('y')), &titles, false),
            KeyOutcome::Continue
        ));
        assert_eq!(state.filtered, vec![2]);
        assert!(matches!(
            state.handle_key(key(KeyCode::Char('q')), &titles, false),
            KeyOutcome::Continue
        ));
        assert!(state.filtered.is_empty());
        assert!(matches!(
            state.handle_key(key(KeyCode::Enter), &titles, false),
            KeyOutcome::Continue
        ));

        let mut empty = PickerState::new(&titles, "");
        assert!(matches!(
            empty.handle_key(key(KeyCode::Char('q')), &titles, false),
            KeyOutcome::Cancel
        ));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(matches!(
            empty.handle_key(ctrl_c, &titles, false),
            KeyOutcome::Cancel
        ));
    }

    #[test]
    fn initial_query_and_multi_marks() {
        let titles = titles();
        let mut state = PickerState::new(&titles, "feat");
        assert_eq!(state.filtered, vec![1, 2]);
        assert_eq!(state.selection(false), vec![1]);

        state.handle_key(key(KeyCode::Tab), &titles, true);
        state.handle_key(key(KeyCode::Down), &titles, true);
        state.handle_key(key(KeyCode::Tab), &titles, true);
        assert_eq!(state.selection(true), vec![1, 2]);

        state.handle_key(key(KeyCode::Tab), &titles, true);
        assert_eq!(state.selection(true), vec![1]);
    }
}
