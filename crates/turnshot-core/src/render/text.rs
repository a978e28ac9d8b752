//! Text-synthesized rendering: the last-resort tier.
//!
//! Bypasses the snapshot backend entirely. Extracts masked plain text
//! from both fragments and draws two speech bubbles stacked vertically,
//! with character-granular word wrapping against true glyph widths.

use anyhow::{Result, bail};
use image::RgbaImage;
use unicode_segmentation::UnicodeSegmentation;

use crate::document::Document;
use crate::mask::MaskSet;
use crate::profile::StyleProfile;
use crate::segment::Turn;

use super::composite::{clean_fragment_clone, strip_media_elements};
use super::glyphs::GlyphSource;
use super::png;
use super::raster;

/// Text color inside the synthetic bubbles.
const TEXT_COLOR: [u8; 4] = [0x33, 0x41, 0x55, 0xff];
const BUBBLE_RADIUS: u32 = 12;
const BUBBLE_GAP: u32 = 12;

/// Wraps `text` to `max_width`, accumulating grapheme clusters until the
/// next one would overflow. Explicit newlines always break; an empty
/// paragraph yields an empty line.
pub fn wrap_text_lines(
    text: &str,
    max_width: f32,
    measure: impl Fn(&str) -> f32,
) -> Vec<String> {
    let mut lines = Vec::new();
    for para in text.split('\n') {
        if para.is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut line = String::new();
        for grapheme in para.graphemes(true) {
            let mut test = line.clone();
            test.push_str(grapheme);
            if measure(&test) > max_width && !line.is_empty() {
                lines.push(line);
                line = grapheme.to_string();
            } else {
                line = test;
            }
        }
        lines.push(line);
    }
    lines
}

/// `"{name}\n\n{body}"`, degrading gracefully when either side is blank.
pub fn build_labeled_text(name: &str, body: &str) -> String {
    let name = name.trim();
    let body = body.trim();
    match (name.is_empty(), body.is_empty()) {
        (false, false) => format!("{name}\n\n{body}"),
        (false, true) => name.to_string(),
        _ => body.to_string(),
    }
}

/// Extracts a fragment's rendered text through the same masked-clone
/// path the snapshot tiers use.
fn extract_fragment_text(
    doc: &Document,
    id: crate::document::NodeId,
    mask: &MaskSet,
) -> String {
    let Some(mut clone) = doc.clone_body(id) else {
        return String::new();
    };
    clean_fragment_clone(&mut clone, mask);
    strip_media_elements(&mut clone);
    clone.collect_text()
}

/// Geometry of the synthetic card, all values in unscaled pixels.
struct CardLayout {
    width: u32,
    padding: u32,
    font_px: f32,
    line_height: u32,
    bubble_pad_x: u32,
    bubble_pad_y: u32,
    side_indent: u32,
    bubble_width: u32,
    text_max_width: f32,
}

impl CardLayout {
    fn for_profile(profile: &StyleProfile) -> CardLayout {
        let width = profile.effective_width();
        let padding = profile.padding_px;
        let font_px = (width as f32 * 0.047).round().clamp(15.0, 18.0);
        let bubble_pad_x = (font_px * 0.75).round() as u32;
        let bubble_pad_y = (font_px * 0.6).round() as u32;
        let line_height = (font_px * 1.5).round() as u32;
        let side_indent = ((width as f32 * 0.08).round() as u32).clamp(32, 96);
        let bubble_width = width.saturating_sub(padding * 2 + side_indent).max(1);
        let text_max_width =
            (bubble_width.saturating_sub(bubble_pad_x * 2) as f32).max(10.0);
        CardLayout {
            width,
            padding,
            font_px,
            line_height,
            bubble_pad_x,
            bubble_pad_y,
            side_indent,
            bubble_width,
            text_max_width,
        }
    }

    fn bubble_height(&self, line_count: usize) -> u32 {
        let text = (line_count as u32 * self.line_height).max(self.line_height);
        text + self.bubble_pad_y * 2
    }
}

/// Renders the turn as a synthetic two-bubble card and encodes it as PNG.
pub fn render_text_card(
    doc: &Document,
    turn: &Turn,
    profile: &StyleProfile,
    mask: &MaskSet,
    glyphs: &dyn GlyphSource,
) -> Result<Vec<u8>> {
    let layout = CardLayout::for_profile(profile);
    let scale = profile.effective_scale();

    let user_body = extract_fragment_text(doc, turn.user, mask);
    let assistant_body = turn
        .assistant
        .iter()
        .map(|id| extract_fragment_text(doc, *id, mask))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let user_text = build_labeled_text(profile.user_display_name(), &user_body);
    let assistant_text =
        build_labeled_text(profile.assistant_display_name(), &assistant_body);

    let measure = |s: &str| glyphs.measure(s, layout.font_px);
    let user_lines = wrap_text_lines(&user_text, layout.text_max_width, measure);
    let assistant_lines = wrap_text_lines(&assistant_text, layout.text_max_width, measure);

    let user_height = layout.bubble_height(user_lines.len());
    let assistant_height = layout.bubble_height(assistant_lines.len());
    let total_height =
        layout.padding + user_height + BUBBLE_GAP + assistant_height + layout.padding;

    let canvas_w = (layout.width as f32 * scale).ceil() as u32;
    let canvas_h = (total_height as f32 * scale).ceil() as u32;
    if canvas_w == 0 || canvas_h == 0 {
        bail!("synthetic card has zero size");
    }

    let mut img = RgbaImage::new(canvas_w, canvas_h);
    raster::fill(&mut img, raster::parse_hex_color(&profile.canvas_bg));

    let user_x = layout.padding;
    let assistant_x = layout.padding + layout.side_indent;
    let mut y = layout.padding;

    draw_bubble(
        &mut img,
        glyphs,
        &layout,
        &user_lines,
        raster::parse_hex_color(&profile.user_bg),
        user_x,
        y,
        user_height,
        scale,
    );

    y += user_height + BUBBLE_GAP;
    draw_bubble(
        &mut img,
        glyphs,
        &layout,
        &assistant_lines,
        raster::parse_hex_color(&profile.assistant_bg),
        assistant_x,
        y,
        assistant_height,
        scale,
    );

    png::encode(&img)
}

#[allow(clippy::too_many_arguments)]
fn draw_bubble(
    img: &mut RgbaImage,
    glyphs: &dyn GlyphSource,
    layout: &CardLayout,
    lines: &[String],
    bg: [u8; 4],
    x: u32,
    y: u32,
    height: u32,
    scale: f32,
) {
    let sx = |v: u32| (v as f32 * scale).round() as i32;
    let sw = |v: u32| (v as f32 * scale).round() as u32;
    raster::fill_rounded_rect(
        img,
        sx(x),
        sx(y),
        sw(layout.bubble_width),
        sw(height),
        sw(BUBBLE_RADIUS),
        bg,
    );

    let mut text_y = y + layout.bubble_pad_y;
    for line in lines {
        raster::draw_text_line(
            img,
            glyphs,
            line,
            (x + layout.bubble_pad_x) as f32 * scale,
            text_y as f32 * scale,
            layout.font_px * scale,
            TEXT_COLOR,
        );
        text_y += layout.line_height;
    }
}
