//! Style profiles: the named bundle of layout, color, and masking
//! settings applied to a render.

use serde::{Deserialize, Serialize};

/// Fallback card width when a profile carries a zero width.
pub const FALLBACK_WIDTH_PX: u32 = 980;

pub const DEFAULT_WIDTH_PX: u32 = 360;
pub const DEFAULT_PADDING_PX: u32 = 24;
pub const DEFAULT_SCALE: f32 = 2.0;
pub const DEFAULT_CANVAS_BG: &str = "#0b1220";
pub const DEFAULT_USER_BG: &str = "#f8dbe8";
pub const DEFAULT_ASSISTANT_BG: &str = "#dff5e1";
pub const DEFAULT_USER_NAME: &str = "You";
pub const DEFAULT_ASSISTANT_NAME: &str = "Assistant";

/// One ordered literal find/replace masking instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRule {
    pub from: String,
    pub to: String,
}

impl MaskRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The legacy redaction shape: replacement is a `*` run matching the
    /// word's length.
    pub fn redact(word: impl Into<String>) -> Self {
        let word = word.into();
        let to = "*".repeat(word.chars().count());
        Self { from: word, to }
    }
}

/// A named rendering configuration. Exactly one profile is active at a
/// time; identity (`id`) is stable across edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleProfile {
    pub id: String,
    pub name: String,
    pub width_px: u32,
    pub padding_px: u32,
    /// Device-pixel scale factor applied to the rasterized card.
    pub scale: f32,
    /// Card background as `#rrggbb`.
    pub canvas_bg: String,
    pub user_bg: String,
    pub assistant_bg: String,
    pub user_name: String,
    pub assistant_name: String,
    /// Shared by every rule in the profile.
    pub mask_case_insensitive: bool,
    pub mask_rules: Vec<MaskRule>,
}

impl Default for StyleProfile {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default".to_string(),
            width_px: DEFAULT_WIDTH_PX,
            padding_px: DEFAULT_PADDING_PX,
            scale: DEFAULT_SCALE,
            canvas_bg: DEFAULT_CANVAS_BG.to_string(),
            user_bg: DEFAULT_USER_BG.to_string(),
            assistant_bg: DEFAULT_ASSISTANT_BG.to_string(),
            user_name: DEFAULT_USER_NAME.to_string(),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            mask_case_insensitive: false,
            mask_rules: Vec::new(),
        }
    }
}

impl StyleProfile {
    /// Card width with the zero-width fallback applied.
    pub fn effective_width(&self) -> u32 {
        if self.width_px == 0 {
            FALLBACK_WIDTH_PX
        } else {
            self.width_px
        }
    }

    /// Scale factor clamped to something rasterizable.
    pub fn effective_scale(&self) -> f32 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            DEFAULT_SCALE
        }
    }

    /// Speaker display name with the empty-string fallback.
    pub fn user_display_name(&self) -> &str {
        non_empty_or(&self.user_name, DEFAULT_USER_NAME)
    }

    pub fn assistant_display_name(&self) -> &str {
        non_empty_or(&self.assistant_name, DEFAULT_ASSISTANT_NAME)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}
