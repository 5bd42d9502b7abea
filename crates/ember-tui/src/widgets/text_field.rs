//! TextField: a single-line tui-input field for the search prompt and the
//! server editor.

use ratatui::crossterm::event::{Event, KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tui_input::{backend::crossterm::EventHandler, Input};

use crate::theme::{style_input, C_INPUT_BG, C_MUTED};

const MASK: char = '•';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAction {
    Edited,
    Submitted,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct TextField {
    input: Input,
    placeholder: String,
    masked: bool,
    pub focused: bool,
}

impl TextField {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            input: Input::default(),
            placeholder: placeholder.into(),
            masked: false,
            focused: false,
        }
    }

    /// Renders every character as a bullet; used for passwords.
    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.set_value(value);
        self
    }

    pub fn set_value(&mut self, value: &str) {
        self.input = Input::new(value.to_string());
    }

    pub fn value(&self) -> &str {
        self.input.value()
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn clear(&mut self) {
        self.input = Input::default();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> FieldAction {
        match key.code {
            KeyCode::Esc => FieldAction::Cancelled,
            KeyCode::Enter => FieldAction::Submitted,
            _ => {
                self.input.handle_event(&Event::Key(key));
                FieldAction::Edited
            }
        }
    }

    /// What the field shows: the value (masked if needed) or nothing.
    pub fn display_value(&self) -> String {
        if self.masked {
            std::iter::repeat(MASK)
                .take(self.input.value().chars().count())
                .collect()
        } else {
            self.input.value().to_string()
        }
    }

    /// Render into a one-row `area`, placing the terminal cursor when focused.
    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        let width = area.width.saturating_sub(1) as usize;
        let scroll = self.input.visual_scroll(width);

        let span = if self.input.value().is_empty() {
            Span::styled(self.placeholder.clone(), Style::default().fg(C_MUTED))
        } else {
            let shown: String = self.display_value().chars().skip(scroll).collect();
            Span::styled(shown, style_input())
        };
        frame.render_widget(
            Paragraph::new(Line::from(span)).style(Style::default().bg(C_INPUT_BG)),
            area,
        );

        if self.focused {
            let offset = self.input.visual_cursor().saturating_sub(scroll) as u16;
            let x = (area.x + offset).min(area.x + area.width - 1);
            frame.set_cursor_position((x, area.y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_typing_and_submit() {
        let mut field = TextField::new("Username");
        for c in "ada".chars() {
            assert_eq!(field.handle_key(key(KeyCode::Char(c))), FieldAction::Edited);
        }
        field.handle_key(key(KeyCode::Backspace));
        assert_eq!(field.value(), "ad");
        assert_eq!(field.handle_key(key(KeyCode::Enter)), FieldAction::Submitted);
        assert_eq!(field.handle_key(key(KeyCode::Esc)), FieldAction::Cancelled);
        assert_eq!(field.value(), "ad");
    }

    #[test]
    fn test_masked_display() {
        let field = TextField::new("Password").masked().with_value("hunter2");
        assert_eq!(field.value(), "hunter2");
        assert_eq!(field.display_value(), "•••••••");
    }
}
