use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::thread;
use tabsync::{
    App, BannerKind, Collection, CommandBus, EditSession, Event as BusEvent, Inbox, Key, Mode,
    Snapshot, Target,
};
use tracing::{debug, error};

// ============================================================================
// TERMINAL LIFECYCLE
// ============================================================================

pub fn run_ui(app: &mut App, inbox: &Inbox, bus: CommandBus) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    spawn_input(bus).context("cannot start input thread")?;

    // Run the app
    let res = app.run(inbox, |app| {
        terminal.draw(|f| ui(f, app))?;
        Ok(())
    });

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

/// Forward terminal input to the bus. The thread lives until the bus closes
/// or the process exits.
fn spawn_input(bus: CommandBus) -> io::Result<()> {
    thread::Builder::new()
        .name("tabsync-input".to_string())
        .spawn(move || loop {
            let forwarded = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => match map_key(key) {
                    Some(key) => bus.send(BusEvent::Key(key)),
                    None => true,
                },
                Ok(Event::Resize(..)) => bus.send(BusEvent::Resize),
                Ok(_) => true,
                Err(e) => {
                    error!("terminal input failed: {}", e);
                    bus.send(BusEvent::Key(Key::Interrupt));
                    false
                }
            };
            if !forwarded {
                debug!("input thread done");
                break;
            }
        })?;
    Ok(())
}

fn map_key(key: KeyEvent) -> Option<Key> {
    let key = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Key::Interrupt,
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Esc,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => Key::BackTab,
        KeyCode::Tab => Key::Tab,
        KeyCode::BackTab => Key::BackTab,
        KeyCode::Backspace => Key::Backspace,
        _ => return None,
    };
    Some(key)
}

// ============================================================================
// LAYOUT
// ============================================================================

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with screen tabs
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let interaction = app.interaction();
    match interaction.mode() {
        Mode::Menu => render_menu(f, chunks[1], app),
        Mode::Viewing(collection) => render_table(f, chunks[1], app, *collection),
        Mode::Editing(collection, session) => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Percentage(60), // Rows
                    Constraint::Percentage(40), // Edit form
                ])
                .split(chunks[1]);

            render_table(f, content_chunks[0], app, *collection);
            render_form(f, content_chunks[1], session);
        }
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let interaction = app.interaction();
    let current = interaction.screen();

    let mut tab_spans = vec![];
    for (i, collection) in Collection::ALL.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if Some(*collection) == current {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(
            format!("{} {}", i + 1, collection.title()),
            style,
        ));
    }

    let snapshot = interaction.snapshot();
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Total expenses: {:.2}", snapshot.total_expenses),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    ));

    if app.is_saving() {
        tab_spans.push(Span::raw("  |  "));
        tab_spans.push(Span::styled("saving…", Style::default().fg(Color::Yellow)));
    }

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" tabsync {} ", tabsync::VERSION)),
    );

    f.render_widget(header, area);
}

fn render_menu(f: &mut Frame, area: Rect, app: &App) {
    let interaction = app.interaction();
    let snapshot = interaction.snapshot();

    let mut content = vec![Line::from("")];
    for (i, collection) in Collection::ALL.iter().enumerate() {
        let selected = i == interaction.menu_cursor();
        let style = if selected {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };

        content.push(Line::from(vec![
            Span::raw(if selected { "  → " } else { "    " }),
            Span::styled(format!("{}. {}", i + 1, collection.title()), style),
            Span::styled(
                format!("  ({} rows)", snapshot.len(*collection)),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
        content.push(Line::from(""));
    }

    let menu = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Menu "),
    );

    f.render_widget(menu, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &App, collection: Collection) {
    let interaction = app.interaction();
    let snapshot = interaction.snapshot();

    let header_cells = collection.headers().iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = table_rows(snapshot, collection);
    let widths: Vec<Constraint> = match collection {
        Collection::Expenses => vec![Constraint::Length(32), Constraint::Length(14)],
        Collection::Stonks => vec![
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(32),
            Constraint::Length(10),
        ],
        Collection::WatchList => vec![
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Length(8),
        ],
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(" {} ", collection.title())),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ");

    let mut state = TableState::default();
    if !snapshot.is_empty(collection) {
        // a freshly committed row is not on screen until the reload
        let last = snapshot.len(collection) - 1;
        state.select(Some(interaction.cursor(collection).min(last)));
    }

    f.render_stateful_widget(table, area, &mut state);
}

fn table_rows(snapshot: &Snapshot, collection: Collection) -> Vec<Row<'static>> {
    let signed = |v: f64| {
        Style::default().fg(if v < 0.0 { Color::Red } else { Color::Green })
    };

    match collection {
        Collection::Expenses => snapshot
            .expenses
            .iter()
            .map(|e| {
                Row::new(vec![
                    Cell::from(truncate(&e.name, 30)),
                    Cell::from(format!("{:.2}", e.amount)),
                ])
            })
            .collect(),
        Collection::Stonks => snapshot
            .stonks
            .iter()
            .map(|s| {
                Row::new(vec![
                    Cell::from(s.symbol.clone()),
                    Cell::from(format!("{:.2}", s.change)).style(signed(s.change)),
                    Cell::from(truncate(&s.comment, 30)),
                    Cell::from(format!("{:.2}", s.extra)),
                ])
            })
            .collect(),
        Collection::WatchList => snapshot
            .watch_list
            .iter()
            .map(|w| {
                Row::new(vec![
                    Cell::from(w.symbol.clone()),
                    Cell::from(w.quantity.clone()),
                    Cell::from(if w.owned { "Yes" } else { "No" }).style(
                        Style::default().fg(if w.owned { Color::Green } else { Color::DarkGray }),
                    ),
                ])
            })
            .collect(),
    }
}

fn render_form(f: &mut Frame, area: Rect, session: &EditSession) {
    let title = match session.target() {
        Target::New => format!(" New {} row ", session.collection().title()),
        Target::Existing(i) => format!(" Edit {} row {} ", session.collection().title(), i + 1),
    };

    let draft = session.draft();
    let mut content = vec![Line::from("")];
    for (i, field) in draft.fields().iter().enumerate() {
        let focused = i == draft.focus();
        let value_style = if focused {
            Style::default().fg(Color::Black).bg(Color::Yellow)
        } else {
            Style::default().fg(Color::White)
        };

        content.push(Line::from(vec![
            Span::styled(
                format!("  {}: ", field.label),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{}{}", field.value, if focused { "▏" } else { "" }),
                value_style,
            ),
        ]));
        content.push(Line::from(""));
    }

    if session.is_conflicted() {
        content.push(Line::from(Span::styled(
            "  Row changed on disk, Esc to discard",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
        content.push(Line::from(""));
    }

    content.push(Line::from(Span::styled(
        "  Enter save · Esc cancel · Tab next field",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )));

    let border = if session.is_conflicted() {
        Color::Red
    } else {
        Color::Yellow
    };
    let form = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(title),
    );

    f.render_widget(form, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let interaction = app.interaction();
    let mut status_spans = vec![];

    if let Some(collection) = interaction.screen() {
        let total = interaction.snapshot().len(collection);
        let selected = if total == 0 {
            0
        } else {
            interaction.cursor(collection).min(total - 1) + 1
        };
        status_spans.push(Span::styled(
            format!(" Row: {}/{} ", selected, total),
            Style::default().fg(Color::Cyan),
        ));
        status_spans.push(Span::raw("| "));
    }

    status_spans.push(Span::styled(
        format!("Reloaded: {}", reload_label(interaction.last_reload())),
        Style::default().fg(Color::White),
    ));
    if !app.is_watching() && !app.is_saving() {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("not watching", Style::default().fg(Color::Red)));
    }

    if let Some(banner) = interaction.banner() {
        let color = match banner.kind {
            BannerKind::Info => Color::Green,
            BannerKind::Error => Color::Red,
        };
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            banner.text.clone(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    } else {
        status_spans.push(Span::raw(" | "));
        for (i, (key, label)) in key_hints(interaction.mode()).iter().enumerate() {
            if i > 0 {
                status_spans.push(Span::raw(" | "));
            }
            status_spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(format!(" {}", label)));
        }
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn key_hints(mode: &Mode) -> &'static [(&'static str, &'static str)] {
    match mode {
        Mode::Menu => &[("↑/↓", "Nav"), ("Enter", "Open"), ("1-3", "Jump"), ("q", "Quit")],
        Mode::Viewing(_) => &[
            ("↑/↓", "Nav"),
            ("e", "Edit"),
            ("n", "New"),
            ("r", "Reload"),
            ("Tab", "Screen"),
            ("b", "Back"),
            ("q", "Quit"),
        ],
        Mode::Editing(..) => &[("Enter", "Save"), ("Esc", "Cancel"), ("Ctrl-C", "Quit")],
    }
}

fn reload_label(at: Option<DateTime<Local>>) -> String {
    match at {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use std::sync::Arc;
    use std::time::Duration;
    use tabsync::{
        command_bus, NotifyWatchSource, SyncConfig, SyncOrchestrator, WorkbookGateway,
    };

    /// An app that was never started: empty snapshot, no I/O
    fn idle_app() -> App {
        let (bus, _inbox) = command_bus();
        let window = Duration::from_millis(50);
        let config = SyncConfig {
            path: "missing.csv".into(),
            window,
        };
        let sync = SyncOrchestrator::new(
            config,
            Arc::new(WorkbookGateway),
            Box::new(NotifyWatchSource::new(window)),
            bus,
            Snapshot::empty(),
        );
        App::new(sync)
    }

    fn screen_text(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|f| ui(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn press(code: KeyCode, modifiers: KeyModifiers) -> Option<Key> {
        map_key(KeyEvent::new(code, modifiers))
    }

    #[test]
    fn test_map_key() {
        assert_eq!(press(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(Key::Interrupt));
        assert_eq!(press(KeyCode::Char('c'), KeyModifiers::NONE), Some(Key::Char('c')));
        assert_eq!(press(KeyCode::Tab, KeyModifiers::SHIFT), Some(Key::BackTab));
        assert_eq!(press(KeyCode::BackTab, KeyModifiers::SHIFT), Some(Key::BackTab));
        assert_eq!(press(KeyCode::F(5), KeyModifiers::NONE), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Rent", 10), "Rent");
        assert_eq!(truncate("Groceries and more", 10), "Groceri...");
        assert_eq!(truncate("ééééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_reload_label() {
        assert_eq!(reload_label(None), "never");
    }

    #[test]
    fn test_menu_renders() {
        let text = screen_text(&idle_app());
        assert!(text.contains("Menu"));
        assert!(text.contains("1. Expenses"));
        assert!(text.contains("3. Watchlist"));
        assert!(text.contains("Total expenses: 0.00"));
    }

    #[test]
    fn test_viewing_renders_table() {
        let mut app = idle_app();
        app.dispatch(BusEvent::Key(Key::Char('2')));
        let text = screen_text(&app);
        assert!(text.contains("Symbol"));
        assert!(text.contains("Row: 0/0"));
    }

    #[test]
    fn test_editing_renders_form() {
        let mut app = idle_app();
        app.dispatch(BusEvent::Key(Key::Char('1')));
        app.dispatch(BusEvent::Key(Key::Char('n')));
        let text = screen_text(&app);
        assert!(text.contains("New Expenses row"));
        assert!(text.contains("Amount: 0.00"));
    }
}
