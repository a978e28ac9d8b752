//! Rendering fallback pipeline scenarios: tier degradation, failure
//! classification, and aggregate counters.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use fixtures::{
    BoxGlyphs, MapFetcher, Script, ScriptedBackend, doc_with_remote_image, doc_with_turns,
    tiny_png,
};
use turnshot_core::document::MediaSource;
use turnshot_core::profile::StyleProfile;
use turnshot_core::render::backend::RasterBackend;
use turnshot_core::render::glyphs::GlyphSource;
use turnshot_core::render::{FallbackCounters, FidelityTier, Renderer};
use turnshot_core::segment::segment;

fn glyphs() -> Arc<dyn GlyphSource> {
    Arc::new(BoxGlyphs)
}

#[tokio::test]
async fn permissive_environment_yields_full_tier_in_one_attempt() {
    let mut doc = doc_with_turns(1);
    let turn = segment(&mut doc).remove(0);
    let backend = ScriptedBackend::always_ok();
    let attempts = Arc::clone(&backend.attempts);
    let mut renderer = Renderer::new(backend, MapFetcher::empty(), glyphs());

    let result = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap();

    assert_eq!(result.tier, FidelityTier::Full);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let mut counters = FallbackCounters::default();
    counters.record(result.tier);
    assert_eq!(counters, FallbackCounters::default());
}

#[tokio::test]
async fn security_denial_on_every_snapshot_reaches_the_text_tier() {
    let mut doc = doc_with_turns(1);
    let turn = segment(&mut doc).remove(0);
    let backend = ScriptedBackend::new([Script::Deny, Script::Deny]);
    let attempts = Arc::clone(&backend.attempts);
    let mut renderer = Renderer::new(backend, MapFetcher::empty(), glyphs());

    let result = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap();

    assert_eq!(result.tier, FidelityTier::TextSynthesized);
    assert_eq!(attempts.load(Ordering::SeqCst), 2, "full then stripped");

    // Both aggregate counters increment exactly once for this turn.
    let mut counters = FallbackCounters::default();
    counters.record(result.tier);
    assert_eq!(counters.stripped, 1);
    assert_eq!(counters.text_synthesized, 1);

    // The synthetic card is a decodable PNG.
    let decoded = image::load_from_memory(&result.png).unwrap();
    assert_eq!(
        decoded.width(),
        (StyleProfile::default().width_px as f32 * 2.0).ceil() as u32
    );
}

#[tokio::test]
async fn unexpected_failure_aborts_without_falling_back() {
    let mut doc = doc_with_turns(1);
    let turn = segment(&mut doc).remove(0);
    let backend = ScriptedBackend::new([Script::Fail]);
    let attempts = Arc::clone(&backend.attempts);
    let mut renderer = Renderer::new(backend, MapFetcher::empty(), glyphs());

    let err = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("scripted backend failure"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retry after a real failure");
}

#[tokio::test]
async fn cross_origin_media_degrades_to_stripped_with_the_real_backend() {
    let url = "https://cdn.example.net/pic.png";
    let mut doc = doc_with_remote_image(url, false);
    let turn = segment(&mut doc).remove(0);

    let mut renderer = Renderer::new(
        RasterBackend::new(glyphs()),
        MapFetcher::single(url, tiny_png()),
        glyphs(),
    );

    let result = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap();
    assert_eq!(result.tier, FidelityTier::Stripped);
}

#[tokio::test]
async fn cors_approved_media_keeps_full_fidelity() {
    let url = "https://cdn.example.net/pic.png";
    let mut doc = doc_with_remote_image(url, true);
    let turn = segment(&mut doc).remove(0);

    let mut renderer = Renderer::new(
        RasterBackend::new(glyphs()),
        MapFetcher::single(url, tiny_png()),
        glyphs(),
    );

    let result = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap();
    assert_eq!(result.tier, FidelityTier::Full);
}

#[tokio::test]
async fn tainting_stylesheet_blocks_both_snapshot_tiers() {
    let mut doc = doc_with_turns(1);
    doc.add_stylesheet(MediaSource::Remote {
        url: "https://styles.example.net/theme.css".into(),
        cors: false,
    });
    let turn = segment(&mut doc).remove(0);

    let mut renderer = Renderer::new(
        RasterBackend::new(glyphs()),
        MapFetcher::empty(),
        glyphs(),
    );

    let result = renderer
        .render(&doc, &turn, &StyleProfile::default())
        .await
        .unwrap();
    assert_eq!(result.tier, FidelityTier::TextSynthesized);
}

#[tokio::test]
async fn masking_is_applied_before_text_synthesis() {
    let mut doc = doc_with_turns(1);
    doc.add_stylesheet(MediaSource::Remote {
        url: "https://styles.example.net/theme.css".into(),
        cors: false,
    });
    let turn = segment(&mut doc).remove(0);

    let mut profile = StyleProfile::default();
    profile.mask_rules = vec![turnshot_core::profile::MaskRule::new("question", "***")];

    let mut renderer = Renderer::new(
        RasterBackend::new(glyphs()),
        MapFetcher::empty(),
        glyphs(),
    );

    // The masked render must not fail; pixel-level content is not
    // asserted here, only that the pipeline accepts rules end to end.
    let result = renderer.render(&doc, &turn, &profile).await.unwrap();
    assert_eq!(result.tier, FidelityTier::TextSynthesized);
}
