//! Cover art → terminal glyphs.
//!
//! Each cell shows two vertically stacked pixels with an upper half block:
//! foreground is the top pixel, background the bottom one.  Terminal cells are
//! roughly twice as tall as wide, so this keeps the image's aspect ratio.

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span, Text};

use crate::theme::C_BG;

const HALF_BLOCK: &str = "▀";

#[derive(Debug, Clone, PartialEq)]
pub enum CoverArt {
    Rendered(Text<'static>),
    /// Fetch or decode failed; the view shows a labelled placeholder.
    Missing,
}

/// Scales `img` to fit `width` columns by `height` rows and returns one line
/// per row.  Pure: the same bitmap and size always give the same glyphs.
pub fn render(img: &RgbaImage, width: u16, height: u16) -> Text<'static> {
    let (iw, ih) = img.dimensions();
    if width == 0 || height == 0 || iw == 0 || ih == 0 {
        return Text::default();
    }

    let max_w = u32::from(width);
    let max_h = u32::from(height) * 2;
    let scale = f64::min(max_w as f64 / iw as f64, max_h as f64 / ih as f64);
    let tw = ((iw as f64 * scale).round() as u32).clamp(1, max_w);
    let th = ((ih as f64 * scale).round() as u32).clamp(1, max_h);
    let scaled = image::imageops::resize(img, tw, th, FilterType::Triangle);

    let lines: Vec<Line<'static>> = (0..th)
        .step_by(2)
        .map(|y| {
            let spans: Vec<Span<'static>> = (0..tw)
                .map(|x| {
                    let mut style = Style::default().fg(blend(scaled.get_pixel(x, y)));
                    if y + 1 < th {
                        style = style.bg(blend(scaled.get_pixel(x, y + 1)));
                    }
                    Span::styled(HALF_BLOCK, style)
                })
                .collect();
            Line::from(spans)
        })
        .collect();
    Text::from(lines)
}

/// Decodes an encoded image (jpeg/png/webp) and renders it.
pub fn decode_and_render(bytes: &[u8], width: u16, height: u16) -> anyhow::Result<Text<'static>> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    Ok(render(&img, width, height))
}

/// Flattens alpha onto the app background.
fn blend(px: &Rgba<u8>) -> Color {
    let [r, g, b, a] = px.0;
    let (br, bg, bb) = match C_BG {
        Color::Rgb(r, g, b) => (r, g, b),
        _ => (0, 0, 0),
    };
    let mix = |c: u8, back: u8| -> u8 {
        ((u16::from(c) * u16::from(a) + u16::from(back) * (255 - u16::from(a))) / 255) as u8
    };
    Color::Rgb(mix(r, br), mix(g, bg), mix(b, bb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(px))
    }

    #[test]
    fn test_square_image_fills_two_pixel_rows_per_line() {
        let text = render(&solid(4, 4, [255, 0, 0, 255]), 2, 1);
        assert_eq!(text.lines.len(), 1);
        assert_eq!(text.lines[0].spans.len(), 2);
        let style = text.lines[0].spans[0].style;
        assert!(matches!(style.fg, Some(Color::Rgb(r, 0..=4, 0..=4)) if r > 250));
        assert!(style.bg.is_some());
    }

    #[test]
    fn test_tall_image_keeps_aspect() {
        let text = render(&solid(2, 8, [0, 0, 255, 255]), 10, 2);
        assert_eq!(text.lines.len(), 2);
        assert!(text.lines.iter().all(|l| l.spans.len() == 1));
    }

    #[test]
    fn test_transparent_pixels_take_background() {
        let text = render(&solid(1, 2, [255, 255, 255, 0]), 1, 1);
        assert_eq!(text.lines[0].spans[0].style.fg, Some(C_BG));
    }

    #[test]
    fn test_degenerate_sizes_render_nothing() {
        assert!(render(&solid(4, 4, [1, 2, 3, 255]), 0, 5).lines.is_empty());
        assert!(decode_and_render(b"not an image", 10, 10).is_err());
    }
}
