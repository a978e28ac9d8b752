//! Rendering fallback pipeline.
//!
//! Three strategies, attempted strictly in order: a full-fidelity
//! snapshot, a snapshot with all embedded media stripped, and a
//! synthetic text card that bypasses the snapshot backend entirely.
//! Only a structured cross-origin denial moves the machine to the next
//! tier; any other failure aborts the turn.

pub mod backend;
pub mod composite;
pub mod glyphs;
pub mod media;
pub mod png;
pub mod raster;
pub mod text;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::document::Document;
use crate::mask::MaskSet;
use crate::profile::StyleProfile;
use crate::segment::Turn;

use backend::{SnapshotBackend, SnapshotError};
use composite::{CompositeOptions, OffscreenArena, build_composite};
use glyphs::GlyphSource;
use media::MediaFetcher;

/// Which strategy ultimately produced a turn's image. Used only for
/// aggregate end-of-export reporting, never for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidelityTier {
    Full,
    Stripped,
    TextSynthesized,
}

impl FidelityTier {
    pub fn label(self) -> &'static str {
        match self {
            FidelityTier::Full => "full",
            FidelityTier::Stripped => "stripped",
            FidelityTier::TextSynthesized => "text-synthesized",
        }
    }
}

/// The pipeline's output for one turn.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub png: Vec<u8>,
    pub tier: FidelityTier,
}

/// Aggregate fidelity-loss counts for one export.
///
/// A turn that reached the text tier also fell back through the
/// stripped tier, so it counts in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackCounters {
    pub stripped: u64,
    pub text_synthesized: u64,
}

impl FallbackCounters {
    pub fn record(&mut self, tier: FidelityTier) {
        match tier {
            FidelityTier::Full => {}
            FidelityTier::Stripped => self.stripped += 1,
            FidelityTier::TextSynthesized => {
                self.stripped += 1;
                self.text_synthesized += 1;
            }
        }
    }

    pub fn any(&self) -> bool {
        self.stripped > 0 || self.text_synthesized > 0
    }
}

/// The rendering pipeline: a snapshot backend, a media fetcher, the
/// reusable offscreen arena, and the card font.
pub struct Renderer<B, F> {
    backend: B,
    fetcher: F,
    glyphs: Arc<dyn GlyphSource>,
    arena: OffscreenArena,
}

impl<B: SnapshotBackend, F: MediaFetcher> Renderer<B, F> {
    pub fn new(backend: B, fetcher: F, glyphs: Arc<dyn GlyphSource>) -> Self {
        Self {
            backend,
            fetcher,
            glyphs,
            arena: OffscreenArena::new(),
        }
    }

    /// Renders one turn, degrading through the tiers as needed.
    ///
    /// Environment-induced denials never surface as errors here; the
    /// returned tier records them. Everything else is raised.
    pub async fn render(
        &mut self,
        doc: &Document,
        turn: &Turn,
        profile: &StyleProfile,
    ) -> Result<RenderResult> {
        let mask = MaskSet::compile(&profile.mask_rules, profile.mask_case_insensitive)
            .context("compiling mask rules")?;

        for tier in [FidelityTier::Full, FidelityTier::Stripped] {
            match self.attempt(doc, turn, profile, &mask, tier).await {
                Ok(png) => return Ok(RenderResult { png, tier }),
                Err(err) if err.degrades() => {
                    debug!(tier = tier.label(), error = %err, "degrading to next tier");
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err))
                        .with_context(|| format!("snapshot at {} tier", tier.label()));
                }
            }
        }

        let png = text::render_text_card(doc, turn, profile, &mask, self.glyphs.as_ref())?;
        Ok(RenderResult {
            png,
            tier: FidelityTier::TextSynthesized,
        })
    }

    async fn attempt(
        &mut self,
        doc: &Document,
        turn: &Turn,
        profile: &StyleProfile,
        mask: &MaskSet,
        tier: FidelityTier,
    ) -> Result<Vec<u8>, SnapshotError> {
        let opts = match tier {
            FidelityTier::Stripped => CompositeOptions::stripped(),
            _ => CompositeOptions::full(),
        };
        let composite = build_composite(doc, turn, profile, mask, opts)?;

        let mut mounted = self.arena.mount(composite)?;
        if !opts.strip_media {
            media::resolve_media(mounted.composite_mut(), doc.origin(), &self.fetcher).await;
        }
        let img = self.backend.snapshot(mounted.composite())?;
        png::encode(&img).map_err(|e| SnapshotError::Failed(e.to_string()))
    }
}
