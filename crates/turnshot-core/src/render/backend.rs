//! Snapshot backends.
//!
//! A backend turns a mounted composite into raster pixels. Failures
//! carry a structured class: cross-origin pixel denial degrades to the
//! next tier, anything else aborts the export. The default backend is
//! a block-layout rasterizer honoring the same taint rule a browser
//! canvas enforces.

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

use crate::document::Element;

use super::composite::Composite;
use super::glyphs::GlyphSource;
use super::raster;

/// Base font size of snapshot text at scale 1.
const BODY_FONT_PX: f32 = 15.0;
/// Body text color on card backgrounds.
const BODY_TEXT_COLOR: [u8; 4] = [0x1f, 0x29, 0x37, 0xff];
/// Height of the placeholder box for unloaded media.
const MEDIA_PLACEHOLDER_PX: u32 = 48;
const MEDIA_PLACEHOLDER_COLOR: [u8; 4] = [0xcb, 0xd5, 0xe1, 0xff];

/// Why a snapshot attempt failed.
#[derive(Debug)]
pub enum SnapshotError {
    /// Pixel readback refused: the composite contains cross-origin
    /// content without CORS approval.
    CrossOriginDenied { source_url: String },
    /// Any other backend failure.
    Failed(String),
}

impl SnapshotError {
    /// The classification the tier machine runs on: only a
    /// cross-origin denial is worth retrying at a lower tier.
    pub fn degrades(&self) -> bool {
        matches!(self, SnapshotError::CrossOriginDenied { .. })
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::CrossOriginDenied { source_url } => {
                write!(f, "pixel readback denied by cross-origin content: {source_url}")
            }
            SnapshotError::Failed(msg) => write!(f, "snapshot failed: {msg}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Rasterizes composites into RGBA images.
pub trait SnapshotBackend: Send {
    fn snapshot(&self, composite: &Composite) -> Result<RgbaImage, SnapshotError>;
}

/// The default backend: lays the composite out as stacked blocks and
/// paints text, media, and backgrounds directly.
pub struct RasterBackend {
    glyphs: Arc<dyn GlyphSource>,
}

impl RasterBackend {
    pub fn new(glyphs: Arc<dyn GlyphSource>) -> Self {
        Self { glyphs }
    }
}

impl SnapshotBackend for RasterBackend {
    fn snapshot(&self, composite: &Composite) -> Result<RgbaImage, SnapshotError> {
        if let Some(source_url) = &composite.taint {
            return Err(SnapshotError::CrossOriginDenied {
                source_url: source_url.clone(),
            });
        }

        let scale = composite.scale;
        let width = (composite.width_px as f32 * scale).ceil().max(1.0) as u32;
        let ctx = LayoutCtx {
            glyphs: self.glyphs.as_ref(),
            scale,
            font_px: BODY_FONT_PX * scale,
            line_height: (BODY_FONT_PX * 1.5 * scale).round() as u32,
        };

        let height = ctx.measure(&composite.card, width).max(1);
        if width.saturating_mul(height) > 64_000_000 {
            return Err(SnapshotError::Failed(format!(
                "composite raster too large: {width}x{height}"
            )));
        }

        let mut img = RgbaImage::new(width, height);
        ctx.draw(&composite.card, &mut img, 0, 0, width);
        Ok(img)
    }
}

struct LayoutCtx<'a> {
    glyphs: &'a dyn GlyphSource,
    scale: f32,
    font_px: f32,
    line_height: u32,
}

impl LayoutCtx<'_> {
    fn scaled(&self, v: u32) -> u32 {
        (v as f32 * self.scale).round() as u32
    }

    /// Height of `el` when laid out at `width` device pixels.
    fn measure(&self, el: &Element, width: u32) -> u32 {
        match el {
            Element::Text(text) => {
                let lines = super::text::wrap_text_lines(text, width.max(1) as f32, |s| {
                    self.glyphs.measure(s, self.font_px)
                });
                lines.len() as u32 * self.line_height
            }
            Element::Media(media) => self.media_height(media, width),
            Element::Block { style, children } => {
                let pad = self.scaled(style.padding_px);
                let inner = width.saturating_sub(pad * 2).max(1);
                let mut height = pad * 2;
                for child in children {
                    height += self.child_margin(child) + self.measure(child, inner);
                }
                height
            }
        }
    }

    /// Draws `el` with its top-left corner at (`x`, `y`), returning the
    /// consumed height.
    fn draw(&self, el: &Element, img: &mut RgbaImage, x: u32, y: u32, width: u32) -> u32 {
        match el {
            Element::Text(text) => {
                let lines = super::text::wrap_text_lines(text, width.max(1) as f32, |s| {
                    self.glyphs.measure(s, self.font_px)
                });
                let mut line_y = y;
                for line in &lines {
                    raster::draw_text_line(
                        img,
                        self.glyphs,
                        line,
                        x as f32,
                        line_y as f32,
                        self.font_px,
                        BODY_TEXT_COLOR,
                    );
                    line_y += self.line_height;
                }
                lines.len() as u32 * self.line_height
            }
            Element::Media(media) => self.draw_media(media, img, x, y, width),
            Element::Block { style, children } => {
                let height = self.measure(el, width);
                if let Some(bg) = &style.background {
                    raster::fill_rounded_rect(
                        img,
                        x as i32,
                        y as i32,
                        width,
                        height,
                        self.scaled(style.corner_radius_px),
                        raster::parse_hex_color(bg),
                    );
                }
                let pad = self.scaled(style.padding_px);
                let inner = width.saturating_sub(pad * 2).max(1);
                let mut child_y = y + pad;
                for child in children {
                    child_y += self.child_margin(child);
                    child_y += self.draw(child, img, x + pad, child_y, inner);
                }
                height
            }
        }
    }

    fn child_margin(&self, child: &Element) -> u32 {
        match child {
            Element::Block { style, .. } => self.scaled(style.margin_top_px),
            _ => 0,
        }
    }

    fn media_height(&self, media: &crate::document::MediaElement, width: u32) -> u32 {
        match decoded_dimensions(media) {
            Some((w, h)) if w > 0 => {
                let drawn_w = width.min((w as f32 * self.scale).round() as u32).max(1);
                ((h as f32) * (drawn_w as f32) / (w as f32)).round().max(1.0) as u32
            }
            _ => self.scaled(MEDIA_PLACEHOLDER_PX),
        }
    }

    fn draw_media(
        &self,
        media: &crate::document::MediaElement,
        img: &mut RgbaImage,
        x: u32,
        y: u32,
        width: u32,
    ) -> u32 {
        let height = self.media_height(media, width);
        match media.resolved.as_deref().and_then(|b| image::load_from_memory(b).ok()) {
            Some(decoded) => {
                let src = decoded.to_rgba8();
                let drawn_w = width
                    .min((src.width() as f32 * self.scale).round() as u32)
                    .max(1);
                let resized = image::imageops::resize(
                    &src,
                    drawn_w,
                    height,
                    image::imageops::FilterType::Triangle,
                );
                image::imageops::overlay(img, &resized, i64::from(x), i64::from(y));
            }
            None => {
                raster::fill_rounded_rect(
                    img,
                    x as i32,
                    y as i32,
                    width,
                    height,
                    self.scaled(6),
                    MEDIA_PLACEHOLDER_COLOR,
                );
            }
        }
        height
    }
}

/// Header-only dimension probe for resolved media bytes.
fn decoded_dimensions(media: &crate::document::MediaElement) -> Option<(u32, u32)> {
    let bytes = media.resolved.as_deref()?;
    image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
