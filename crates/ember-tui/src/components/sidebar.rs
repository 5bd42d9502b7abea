//! Sidebar: server, navigation, status and key reference.

use ember_proto::model::{ItemKind, MediaItem};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Padding, Paragraph, Wrap},
    Frame,
};

use crate::cache::Section;
use crate::session::{Mode, Session};
use crate::theme::{
    style_default, style_error, style_good, style_heading, style_muted, style_secondary,
    style_selected, style_title, C_SEPARATOR,
};
use crate::ui::{format_position, truncate};

const KEYS: [(&str, &str); 12] = [
    ("←→", "move"),
    ("↵", "select"),
    ("esc", "back"),
    ("f", "fav"),
    ("s", "season"),
    ("S", "series"),
    ("c", "continuous"),
    ("d", "debug"),
    ("r", "refresh"),
    ("m", "servers"),
    ("/", "search"),
    ("q", "quit"),
];

pub fn draw(frame: &mut Frame, area: Rect, session: &Session) {
    let block = Block::default()
        .borders(Borders::RIGHT)
        .border_style(Style::default().fg(C_SEPARATOR))
        .padding(Padding::new(2, 1, 1, 1));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let width = inner.width as usize;
    let lines = build_lines(session, width);
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn heading(text: &'static str) -> Line<'static> {
    Line::from(Span::styled(text, style_heading().add_modifier(Modifier::BOLD)))
}

fn field(label: &'static str, value: String, style: Style) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{}: ", label), style_secondary()),
        Span::styled(value, style),
    ])
}

fn is_failure(status: &str) -> bool {
    let lower = status.to_lowercase();
    lower.contains("error") || lower.contains("failed") || lower.starts_with("cannot")
}

fn build_lines(session: &Session, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    lines.push(Line::from(Span::styled("EMBER", style_title())));
    let server = session
        .servers()
        .active_profile()
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|| "(no server)".to_string());
    lines.push(Line::from(Span::styled(truncate(&server, width), style_secondary())));
    lines.push(Line::from(Span::styled("─".repeat(width), Style::default().fg(C_SEPARATOR))));

    // ── Navigation ────────────────────────────────────────────────────────────
    lines.push(heading("Navigation:"));
    for section in Section::ALL {
        let current = section == session.highlighted_section();
        let marker = if current { "> " } else { "  " };
        let style = if current { style_selected() } else { style_default() };
        lines.push(Line::from(vec![
            Span::styled(marker, style),
            Span::styled(format!("[{}] ", section.hotkey()), style_muted()),
            Span::styled(section.title(), style),
        ]));
    }
    lines.push(Line::default());

    // ── Status ────────────────────────────────────────────────────────────────
    lines.push(heading("Status:"));
    let latency = match session.latency() {
        Some(l) => Span::styled(l.label(), Style::default().fg(l.color())),
        None => Span::styled("--", style_muted()),
    };
    lines.push(Line::from(vec![Span::styled("Latency: ", style_secondary()), latency]));
    if session.player_available() {
        lines.push(field("MPV", "OK".into(), style_good()));
    } else {
        lines.push(field("MPV", "N/A".into(), style_error()));
    }
    let log = if session.verbose_logging() { "ON" } else { "OFF" };
    lines.push(field("Log", log.into(), style_default()));
    if !session.status().is_empty() {
        let style = if is_failure(session.status()) {
            style_error()
        } else {
            style_default()
        };
        let text = match session.mode() {
            Mode::Loading => format!("{} {}", session.spinner(), session.status()),
            _ => session.status().to_string(),
        };
        lines.push(Line::from(Span::styled(text, style)));
    }
    lines.push(Line::default());

    // ── Current item ──────────────────────────────────────────────────────────
    if let Some(detail) = session.current_detail() {
        lines.push(heading("Subtitles:"));
        if detail.subtitles.is_empty() {
            lines.push(Line::from(Span::styled("none", style_muted())));
        }
        for track in &detail.subtitles {
            let name = match (track.language.as_str(), track.title.as_str()) {
                ("", "") => "und".to_string(),
                ("", title) => title.to_string(),
                (lang, _) => lang.to_string(),
            };
            let mark = if track.is_external { "*" } else { "" };
            lines.push(Line::from(Span::styled(
                truncate(&format!("{}{}", name, mark), width),
                style_default(),
            )));
        }
        lines.push(Line::default());
    }

    if let Some(play) = session.last_play() {
        lines.push(heading("Last Play:"));
        lines.push(Line::from(Span::styled(format_position(play.position_secs), style_default())));
        if play.report_ok {
            lines.push(field("Report", "OK".into(), style_good()));
        } else {
            lines.push(field("Report", "FAIL".into(), style_error()));
        }
        lines.push(Line::default());
    }

    if let Some(item) = session.current_item().filter(|i| i.kind == ItemKind::Episode) {
        lines.push(heading("Series:"));
        if let Some(series) = &item.series_name {
            lines.push(Line::from(Span::styled(truncate(series, width), style_default())));
        }
        if let Some(season) = &item.season_name {
            lines.push(Line::from(Span::styled(truncate(season, width), style_secondary())));
        }
        lines.push(Line::default());
    }

    // ── Keys ──────────────────────────────────────────────────────────────────
    lines.push(heading("Keys:"));
    for (key, what) in KEYS {
        let what = if key == "↵" {
            select_hint(session.current_item())
        } else {
            what
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:<4}", key), style_selected()),
            Span::styled(what, style_muted()),
        ]));
    }

    lines
}

/// What Enter does on the current item.
fn select_hint(item: Option<&MediaItem>) -> &'static str {
    match item.map(|i| i.kind) {
        Some(kind) if kind.is_playable() => "play",
        Some(kind) if kind.is_container() => "open",
        Some(ItemKind::Series | ItemKind::Season) => "open",
        _ => "select",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of(kind: ItemKind) -> MediaItem {
        MediaItem {
            kind,
            ..MediaItem::default()
        }
    }

    #[test]
    fn test_select_hint_follows_kind() {
        assert_eq!(select_hint(Some(&of(ItemKind::Episode))), "play");
        assert_eq!(select_hint(Some(&of(ItemKind::BoxSet))), "open");
        assert_eq!(select_hint(Some(&of(ItemKind::Season))), "open");
        assert_eq!(select_hint(Some(&of(ItemKind::Other))), "select");
        assert_eq!(select_hint(None), "select");
    }
}
