//! PaneChrome: bordered panes with focus styling, an optional hotkey hint
//! and a right-aligned badge.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders},
};

use crate::theme::{C_ACCENT, C_INFO, C_MUTED, C_PRIMARY, C_SEPARATOR};

/// A short label in the top-right corner (e.g. "3/12", "ERR").
pub struct Badge<'a> {
    pub text: &'a str,
    pub color: Color,
}

pub fn pane_chrome<'a>(
    title: &'a str,
    hotkey: Option<char>,
    focused: bool,
    badge: Option<Badge<'a>>,
) -> Block<'a> {
    let border_style = if focused {
        Style::default().fg(C_ACCENT)
    } else {
        Style::default().fg(C_SEPARATOR)
    };
    let title_style = if focused {
        Style::default().fg(C_PRIMARY).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(C_MUTED)
    };

    let mut spans = Vec::new();
    if let Some(key) = hotkey {
        spans.push(Span::styled(format!("[{}] ", key), Style::default().fg(C_INFO)));
    }
    spans.push(Span::styled(title, title_style));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(Line::from(spans));

    match badge {
        Some(b) => block.title_top(
            Line::from(Span::styled(
                format!(" {} ", b.text),
                Style::default().fg(b.color).add_modifier(Modifier::BOLD),
            ))
            .right_aligned(),
        ),
        None => block,
    }
}
