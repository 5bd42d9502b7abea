//! Frame layout: status sidebar on the left, content on the right.

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::Style,
    widgets::Block,
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::components::{carousel, search, servers, sidebar};
use crate::session::{sidebar_width, Mode, Session};
use crate::theme::C_BG;

pub fn draw(frame: &mut Frame, session: &Session) {
    let area = frame.area();
    frame.render_widget(Block::default().style(Style::default().bg(C_BG)), area);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(sidebar_width(area.width)),
            Constraint::Min(0),
        ])
        .split(area);

    sidebar::draw(frame, chunks[0], session);
    match session.mode() {
        Mode::ServerManage => servers::draw_manage(frame, chunks[1], session),
        Mode::ServerEdit => servers::draw_edit(frame, chunks[1], session),
        Mode::Searching => search::draw(frame, chunks[1], session),
        Mode::Loading | Mode::Browsing => carousel::draw(frame, chunks[1], session),
    }
}

/// Cuts `s` to at most `max` terminal columns, ending in "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let budget = max.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    if max >= 3 {
        out.push_str("...");
    }
    out
}

/// `h:mm:ss` or `m:ss`.
pub fn format_position(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
