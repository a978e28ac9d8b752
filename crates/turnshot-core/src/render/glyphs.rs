//! Glyph measurement and rasterization.
//!
//! Word wrapping and the text-synthesis tier both need true advance
//! widths for the configured font; the snapshot backend needs coverage
//! bitmaps to paint text. Both go through [`GlyphSource`] so tests can
//! substitute deterministic metrics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};

/// One rasterized glyph: coverage bitmap plus placement metrics
/// relative to the baseline.
#[derive(Debug, Clone)]
pub struct RasterGlyph {
    pub width: usize,
    pub height: usize,
    pub xmin: i32,
    pub ymin: i32,
    pub advance: f32,
    pub coverage: Vec<u8>,
}

/// Font capability used by the renderer.
pub trait GlyphSource: Send + Sync {
    /// Total advance width of `text` at `px` font size.
    fn measure(&self, text: &str, px: f32) -> f32;

    /// Baseline ascent at `px` font size.
    fn ascent(&self, px: f32) -> f32;

    /// Rasterizes a single character at `px` font size.
    fn rasterize(&self, ch: char, px: f32) -> RasterGlyph;
}

/// TrueType-backed glyph source with a small rasterization cache.
pub struct TtfGlyphs {
    font: fontdue::Font,
    cache: Mutex<HashMap<(char, u32), RasterGlyph>>,
}

impl TtfGlyphs {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| anyhow!("parsing font: {e}"))?;
        Ok(Self {
            font,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading font file {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("loading font {}", path.display()))
    }
}

impl GlyphSource for TtfGlyphs {
    fn measure(&self, text: &str, px: f32) -> f32 {
        text.chars()
            .map(|ch| self.font.metrics(ch, px).advance_width)
            .sum()
    }

    fn ascent(&self, px: f32) -> f32 {
        self.font
            .horizontal_line_metrics(px)
            .map_or(px * 0.8, |m| m.ascent)
    }

    fn rasterize(&self, ch: char, px: f32) -> RasterGlyph {
        let key = (ch, px.to_bits());
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }
        let (metrics, coverage) = self.font.rasterize(ch, px);
        let glyph = RasterGlyph {
            width: metrics.width,
            height: metrics.height,
            xmin: metrics.xmin,
            ymin: metrics.ymin,
            advance: metrics.advance_width,
            coverage,
        };
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, glyph.clone());
        }
        glyph
    }
}

/// Common system font locations tried when no font is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Resolves the card font: an explicit path wins, otherwise the first
/// candidate that exists on this system.
pub fn resolve_font_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        bail!("font file {} does not exist", path.display());
    }
    for candidate in FONT_CANDIDATES {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }
    bail!("no usable font found; pass one explicitly with --font")
}
