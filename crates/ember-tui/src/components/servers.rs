//! Server management: the profile list with probe results, and the
//! add/edit form.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::session::{Session, FIELD_LABELS};
use crate::theme::{style_default, style_muted, style_secondary, style_selected, C_ERROR, C_GOOD};
use crate::ui::truncate;
use crate::widgets::pane_chrome::{pane_chrome, Badge};

const MANAGE_HINT: &str = "[a]dd  [e]dit  [d]elete  [p]ing  [enter] connect  [esc] back";
const EDIT_HINT: &str = "[Tab] next  [Enter] save  [Esc] cancel";
const PREFIX_TIP: &str = "Name: same prefix = shared data (e.g. HomeNAS Main, HomeNAS Backup)";

pub fn draw_manage(frame: &mut Frame, area: Rect, session: &Session) {
    let book = session.servers();
    let count = format!("{}", book.len());
    let badge = (!book.is_empty()).then(|| Badge {
        text: &count,
        color: C_GOOD,
    });
    let block = pane_chrome("Server Management", Some('m'), true, badge);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut lines = Vec::new();
    if book.is_empty() {
        lines.push(Line::from(Span::styled("No servers configured", style_secondary())));
        lines.push(Line::default());
        lines.push(Line::from(Span::styled("[a]dd  [esc] back", style_muted())));
        frame.render_widget(Paragraph::new(lines), inner);
        return;
    }

    let width = inner.width as usize;
    for (i, server) in book.servers.iter().enumerate() {
        let active = if i == book.active { "* " } else { "  " };
        let style = if i == session.server_cursor() {
            style_selected()
        } else {
            style_default()
        };
        let mut spans = vec![
            Span::styled(active, style),
            Span::styled(truncate(server.display_name(), width.saturating_sub(24)), style),
            Span::styled(format!("  {}", truncate(&server.url, 24)), style_muted()),
        ];
        match session.server_latencies().get(&i) {
            Some(l) => spans.push(Span::styled(format!("  {}", l.label()), Style::default().fg(l.color()))),
            None if session.is_probing() => spans.push(Span::styled(" ...", style_muted())),
            None => {}
        }
        lines.push(Line::from(spans));
    }
    lines.push(Line::default());
    if !session.status().is_empty() {
        lines.push(Line::from(Span::styled(session.status().to_string(), style_secondary())));
    }
    lines.push(Line::from(Span::styled(MANAGE_HINT, style_muted())));
    frame.render_widget(Paragraph::new(lines), inner);
}

pub fn draw_edit(frame: &mut Frame, area: Rect, session: &Session) {
    let Some(editor) = session.editor() else {
        return;
    };
    let title = if editor.editing.is_some() {
        "Edit Server"
    } else {
        "Add Server"
    };
    let block = pane_chrome(title, None, true, None);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Label row, input row and a gap per field, then tip, status and hint.
    let mut constraints = Vec::new();
    for _ in FIELD_LABELS {
        constraints.extend([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)]);
    }
    constraints.extend([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1), Constraint::Min(0)]);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);

    for (i, (label, field)) in FIELD_LABELS.iter().zip(editor.fields.iter()).enumerate() {
        let style = if i == editor.focus {
            style_selected()
        } else {
            style_secondary()
        };
        frame.render_widget(
            Paragraph::new(Span::styled(format!("{}:", label), style)),
            rows[i * 3],
        );
        field.draw(frame, rows[i * 3 + 1]);
    }

    let base = FIELD_LABELS.len() * 3;
    frame.render_widget(Paragraph::new(Span::styled(PREFIX_TIP, style_muted())), rows[base]);
    if !session.status().is_empty() {
        frame.render_widget(
            Paragraph::new(Span::styled(session.status().to_string(), Style::default().fg(C_ERROR))),
            rows[base + 1],
        );
    }
    frame.render_widget(Paragraph::new(Span::styled(EDIT_HINT, style_muted())), rows[base + 2]);
}
