use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::Span,
    widgets::{Block, Borders, List, ListItem, Paragraph},
};
use throbber_widgets_tui::{BRAILLE_SIX, Throbber, WhichUse};

use dbscout::model::{Notice, PickerRow, RowKind};

use crate::app::App;

fn row_style(row: &PickerRow) -> Style {
    match row.kind {
        RowKind::Header => Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
        _ if row.saved => Style::default().fg(Color::Green),
        _ if row.dimmed => Style::default().fg(Color::DarkGray),
        RowKind::Account => Style::default().fg(Color::Magenta),
        _ => Style::default(),
    }
}

fn row_item(row: &PickerRow) -> ListItem<'static> {
    let indent = if row.kind == RowKind::Header {
        String::new()
    } else {
        "  ".repeat(row.depth.min(1) as usize)
    };
    ListItem::new(format!("{indent}{}", row.label)).style(row_style(row))
}

pub fn draw_ui(f: &mut Frame<'_>, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    let header_text = if app.search_mode {
        format!("🔍 Filter: {}_", app.search_query)
    } else if !app.search_query.is_empty() {
        format!("🔍 Filter: {} [/: edit] [Esc in filter: clear]", app.search_query)
    } else {
        "[Enter: connect/open] [s: save] [l: logout] [L: login] [r: refresh] [/: filter] [q: quit]".to_string()
    };
    let header = Paragraph::new(header_text)
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL).title(Span::styled(
            "dbscout",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
    f.render_widget(header, chunks[0]);

    let items: Vec<ListItem> = app.rows.iter().map(row_item).collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Connections"))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("› ");
    f.render_stateful_widget(list, chunks[1], &mut app.list_state);

    let (text, color) = match &app.message {
        Some(Notice::Info(m)) => (m.as_str(), Color::Cyan),
        Some(Notice::Warning(m)) => (m.as_str(), Color::Yellow),
        Some(Notice::Error(m)) => (m.as_str(), Color::Red),
        None => ("", Color::Cyan),
    };
    let footer = Paragraph::new(text)
        .style(Style::default().fg(color))
        .block(Block::default().borders(Borders::ALL).title("Message"));
    f.render_widget(footer, chunks[2]);

    if app.loading() {
        let throbber = Throbber::default()
            .label(" Discovering...")
            .style(Style::default().fg(Color::Yellow))
            .throbber_set(BRAILLE_SIX)
            .use_type(WhichUse::Spin);
        f.render_stateful_widget(throbber, chunks[3], &mut app.throbber_state);
    }
}
