//! Carousel: a single item view with cover, title, badges and position.

use ember_proto::model::{ticks_to_secs, ItemKind, MediaItem};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph},
    Frame,
};

use crate::cover::CoverArt;
use crate::session::{Mode, Session};
use crate::theme::{
    style_default, style_muted, style_placeholder, style_secondary, style_selected, style_title,
    C_FAVORITE, C_INFO, C_PLACEHOLDER_BG,
};
use crate::ui::{format_position, truncate};

pub fn draw(frame: &mut Frame, area: Rect, session: &Session) {
    if session.mode() == Mode::Loading {
        let msg = format!("{} Loading...", session.spinner());
        frame.render_widget(
            Paragraph::new(Span::styled(msg, style_secondary())).alignment(Alignment::Center),
            centered_row(area),
        );
        return;
    }

    let Some(item) = session.current_item() else {
        let mut lines = vec![Line::from(Span::styled("No items", style_muted()))];
        if !session.status().is_empty() {
            lines.push(Line::from(Span::styled(session.status().to_string(), style_secondary())));
        }
        let row = centered_row(area);
        let rect = Rect { height: 2.min(area.height), ..row };
        frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), rect);
        return;
    };

    let inner = Rect {
        x: area.x + 2,
        width: area.width.saturating_sub(4),
        ..area
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);
    let width = inner.width as usize;

    draw_header(frame, chunks[0], session, width);
    draw_cover(frame, chunks[1], session, item);
    frame.render_widget(
        Paragraph::new(Span::styled(truncate(&title_line(item), width), style_title()))
            .alignment(Alignment::Center),
        chunks[2],
    );
    frame.render_widget(
        Paragraph::new(badge_line(item)).alignment(Alignment::Center),
        chunks[3],
    );
    if let Some(progress) = progress_line(item) {
        frame.render_widget(
            Paragraph::new(Span::styled(progress, style_secondary())).alignment(Alignment::Center),
            chunks[4],
        );
    }
    frame.render_widget(
        Paragraph::new(Span::styled(nav_line(session), style_selected()))
            .alignment(Alignment::Center),
        chunks[5],
    );
}

fn centered_row(area: Rect) -> Rect {
    Rect {
        y: area.y + area.height / 2,
        height: 1.min(area.height),
        ..area
    }
}

/// View title with the drill-down depth as a breadcrumb hint.
fn draw_header(frame: &mut Frame, area: Rect, session: &Session, width: usize) {
    let mut spans = vec![Span::styled(
        truncate(&session.view().title, width.saturating_sub(8)),
        style_default().add_modifier(Modifier::BOLD),
    )];
    if session.nav_depth() > 0 {
        spans.push(Span::styled(format!("  ‹{}", session.nav_depth()), style_muted()));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_cover(frame: &mut Frame, area: Rect, session: &Session, item: &MediaItem) {
    if area.height == 0 || area.width == 0 {
        return;
    }
    match session.cover_for(item) {
        Some(CoverArt::Rendered(text)) => {
            let h = (text.height() as u16).min(area.height);
            let rect = Rect {
                y: area.y + (area.height - h) / 2,
                height: h,
                ..area
            };
            frame.render_widget(Paragraph::new(text.clone()).alignment(Alignment::Center), rect);
        }
        art => {
            frame.render_widget(
                Block::default().style(Style::default().bg(C_PLACEHOLDER_BG)),
                area,
            );
            let label = match art {
                None if session.cover_url(item).is_some() => {
                    format!("{} {}", session.spinner(), item.kind.label())
                }
                _ => item.kind.label().to_string(),
            };
            frame.render_widget(
                Paragraph::new(Span::styled(label, style_placeholder())).alignment(Alignment::Center),
                centered_row(area),
            );
        }
    }
}

fn title_line(item: &MediaItem) -> String {
    match (item.kind, item.index_number, item.production_year) {
        (ItemKind::Episode, Some(n), _) => format!("EP {:02} - {}", n, item.name),
        (_, _, Some(year)) => format!("{} ({})", item.name, year),
        _ => item.name.clone(),
    }
}

fn badge_line(item: &MediaItem) -> Line<'static> {
    let mut spans = vec![Span::styled(item.kind.label(), Style::default().fg(C_INFO))];
    if item.is_favorite() {
        spans.push(Span::styled(" [FAV]", Style::default().fg(C_FAVORITE)));
    }
    Line::from(spans)
}

fn progress_line(item: &MediaItem) -> Option<String> {
    let pos = ticks_to_secs(item.position_ticks());
    if pos == 0 {
        return None;
    }
    match item.duration_secs() {
        0 => Some(format!("▶ {}", format_position(pos))),
        total => Some(format!("▶ {} / {}", format_position(pos), format_position(total))),
    }
}

fn nav_line(session: &Session) -> String {
    let n = session.view().ids.len();
    let mut line = format!("< {} / {} >", session.cursor() + 1, n);
    if let Some((page, pages)) = session.page_info() {
        line.push_str(&format!("  Page {}/{}", page, pages));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(n: u32, name: &str) -> MediaItem {
        MediaItem {
            id: format!("ep{}", n),
            name: name.into(),
            kind: ItemKind::Episode,
            index_number: Some(n),
            production_year: Some(2013),
            ..MediaItem::default()
        }
    }

    #[test]
    fn test_title_line_formats_by_kind() {
        assert_eq!(title_line(&episode(3, "Pilot")), "EP 03 - Pilot");
        let movie = MediaItem {
            name: "Heat".into(),
            kind: ItemKind::Movie,
            production_year: Some(1995),
            ..MediaItem::default()
        };
        assert_eq!(title_line(&movie), "Heat (1995)");
    }

    #[test]
    fn test_progress_line_only_with_position() {
        let mut item = episode(1, "x");
        assert_eq!(progress_line(&item), None);
        item.user_data_mut().playback_position_ticks = 90 * 10_000_000;
        item.run_time_ticks = Some(600 * 10_000_000);
        assert_eq!(progress_line(&item).as_deref(), Some("▶ 1:30 / 10:00"));
    }
}
