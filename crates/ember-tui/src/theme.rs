//! Color palette and style constants for the ember TUI.

use std::time::Duration;

use ratatui::style::{Color, Modifier, Style};

// ── Color palette ─────────────────────────────────────────────────────────────

pub const C_BG: Color = Color::Rgb(18, 18, 18);
pub const C_ACCENT: Color = Color::Rgb(175, 135, 255);
pub const C_HIGHLIGHT: Color = Color::Rgb(255, 135, 215);
pub const C_INFO: Color = Color::Rgb(135, 215, 255);
pub const C_GOOD: Color = Color::Rgb(80, 200, 120);
pub const C_WARN: Color = Color::Rgb(255, 184, 80);
pub const C_ERROR: Color = Color::Rgb(255, 80, 80);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SEPARATOR: Color = Color::Rgb(40, 40, 52);
pub const C_SECONDARY: Color = Color::Rgb(128, 128, 148);
pub const C_PRIMARY: Color = Color::Rgb(220, 220, 232);
pub const C_PLACEHOLDER_BG: Color = Color::Rgb(38, 38, 48);
pub const C_INPUT_BG: Color = Color::Rgb(20, 20, 32);
pub const C_INPUT_FG: Color = Color::Rgb(255, 200, 80);
pub const C_FAVORITE: Color = Color::Rgb(255, 210, 50);

// ── Predefined styles ─────────────────────────────────────────────────────────

pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}

pub fn style_title() -> Style {
    Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD)
}

pub fn style_heading() -> Style {
    Style::default().fg(C_INFO)
}

pub fn style_selected() -> Style {
    Style::default()
        .fg(C_HIGHLIGHT)
        .add_modifier(Modifier::BOLD)
}

pub fn style_error() -> Style {
    Style::default().fg(C_ERROR)
}

pub fn style_good() -> Style {
    Style::default().fg(C_GOOD)
}

pub fn style_input() -> Style {
    Style::default().fg(C_INPUT_FG).bg(C_INPUT_BG)
}

pub fn style_placeholder() -> Style {
    Style::default().fg(C_SECONDARY).bg(C_PLACEHOLDER_BG)
}

/// Green up to 500ms, amber up to a second, red beyond.
pub fn latency_color(latency: Duration) -> Color {
    match latency.as_millis() {
        0..=500 => C_GOOD,
        501..=1000 => C_WARN,
        _ => C_ERROR,
    }
}
