use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::Span,
    widgets::Paragraph,
    Frame,
};

use crate::session::Session;
use crate::theme::style_muted;
use crate::widgets::pane_chrome::pane_chrome;

pub fn draw(frame: &mut Frame, area: Rect, session: &Session) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(3), Constraint::Length(1), Constraint::Min(0)])
        .margin(2)
        .split(area);

    let block = pane_chrome("Search", Some('/'), true, None);
    let field_area = block.inner(rows[1]);
    frame.render_widget(block, rows[1]);
    session.search_field().draw(frame, field_area);

    frame.render_widget(
        Paragraph::new(Span::styled("[Enter] search  [Esc] cancel", style_muted())),
        rows[2],
    );
}
