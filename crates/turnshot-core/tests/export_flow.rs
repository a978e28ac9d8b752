//! End-to-end export scenarios: controller + pipeline + protocol.

mod fixtures;

use std::sync::Arc;

use fixtures::{
    BoxGlyphs, MapFetcher, Script, ScriptedBackend, SurfaceBehavior, doc_with_turns, leak_host,
};
use turnshot_core::controller::{Controller, EventSender, ExportEvent, create_event_channel};
use turnshot_core::profile::StyleProfile;
use turnshot_core::render::Renderer;
use turnshot_core::render::glyphs::GlyphSource;
use turnshot_core::session::{Coordinator, SourceLink, WireMessage};

fn glyphs() -> Arc<dyn GlyphSource> {
    Arc::new(BoxGlyphs)
}

async fn drain(mut rx: turnshot_core::controller::ExportEventRx) -> Vec<ExportEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn selected_turns_are_delivered_in_order_with_a_summary() {
    let mut doc = doc_with_turns(3);
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);
    controller.state.select_all();

    let host = leak_host(SurfaceBehavior::responsive());
    let coordinator = Coordinator::spawn(host, "viewer://test");
    let mut link = SourceLink::new(coordinator);
    let mut renderer = Renderer::new(ScriptedBackend::always_ok(), MapFetcher::empty(), glyphs());

    let (tx, rx) = create_event_channel();
    let events = EventSender::new(tx);
    let collector = tokio::spawn(drain(rx));

    let outcome = controller
        .export(
            &doc,
            &StyleProfile::default(),
            &mut renderer,
            &mut link,
            &events,
        )
        .await
        .unwrap();
    drop(events);

    assert_eq!(outcome.delivered, 3);
    assert_eq!(outcome.counters.stripped, 0);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let filenames = host.delivered_filenames();
    assert_eq!(filenames.len(), 3);
    for (i, name) in filenames.iter().enumerate() {
        assert!(
            name.ends_with(&format!("_{}.png", i + 1)),
            "unexpected filename {name}"
        );
    }
    // One shared stamp, frozen at export start.
    let stamps: std::collections::HashSet<_> = filenames
        .iter()
        .map(|n| n.split('_').next().unwrap().to_string())
        .collect();
    assert_eq!(stamps.len(), 1);
    assert_eq!(stamps.iter().next().unwrap().len(), "202608070930".len());

    let events = collector.await.unwrap();
    assert!(matches!(
        events.last(),
        Some(ExportEvent::Completed { delivered: 3, .. })
    ));
}

#[tokio::test]
async fn zero_selection_short_circuits_without_opening_a_session() {
    let mut doc = doc_with_turns(2);
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);
    // Nothing selected.

    let host = leak_host(SurfaceBehavior::responsive());
    let coordinator = Coordinator::spawn(host, "viewer://test");
    let mut link = SourceLink::new(coordinator);
    let mut renderer = Renderer::new(ScriptedBackend::always_ok(), MapFetcher::empty(), glyphs());

    let (tx, rx) = create_event_channel();
    let events = EventSender::new(tx);
    let collector = tokio::spawn(drain(rx));

    let outcome = controller
        .export(
            &doc,
            &StyleProfile::default(),
            &mut renderer,
            &mut link,
            &events,
        )
        .await
        .unwrap();
    drop(events);

    assert_eq!(outcome.delivered, 0);
    assert_eq!(host.created.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(collector.await.unwrap(), vec![ExportEvent::NothingSelected]);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_fails_the_export_with_zero_images() {
    let mut doc = doc_with_turns(2);
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);
    controller.state.select_all();

    let host = leak_host(SurfaceBehavior::silent());
    let coordinator = Coordinator::spawn(host, "viewer://test");
    let mut link = SourceLink::new(coordinator);
    let mut renderer = Renderer::new(ScriptedBackend::always_ok(), MapFetcher::empty(), glyphs());

    let (tx, _rx) = create_event_channel();
    let events = EventSender::new(tx);

    let err = controller
        .export(
            &doc,
            &StyleProfile::default(),
            &mut renderer,
            &mut link,
            &events,
        )
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("never became ready"));
    assert!(host.delivered_filenames().is_empty());
}

#[tokio::test]
async fn degraded_turns_still_deliver_and_count_in_the_summary() {
    let mut doc = doc_with_turns(2);
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);
    controller.state.select_all();

    // First turn full; second denied at both snapshot tiers.
    let backend = ScriptedBackend::new([Script::Ok, Script::Deny, Script::Deny]);
    let host = leak_host(SurfaceBehavior::responsive());
    let coordinator = Coordinator::spawn(host, "viewer://test");
    let mut link = SourceLink::new(coordinator);
    let mut renderer = Renderer::new(backend, MapFetcher::empty(), glyphs());

    let (tx, rx) = create_event_channel();
    let events = EventSender::new(tx);
    let collector = tokio::spawn(drain(rx));

    let outcome = controller
        .export(
            &doc,
            &StyleProfile::default(),
            &mut renderer,
            &mut link,
            &events,
        )
        .await
        .unwrap();
    drop(events);

    assert_eq!(outcome.delivered, 2);
    assert_eq!(outcome.counters.stripped, 1);
    assert_eq!(outcome.counters.text_synthesized, 1);

    let events = collector.await.unwrap();
    assert!(events.contains(&ExportEvent::Completed {
        delivered: 2,
        stripped: 1,
        text_synthesized: 1,
    }));
}

#[tokio::test]
async fn render_failure_aborts_but_keeps_already_delivered_images() {
    let mut doc = doc_with_turns(3);
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);
    controller.state.select_all();

    let backend = ScriptedBackend::new([Script::Ok, Script::Fail]);
    let host = leak_host(SurfaceBehavior::responsive());
    let coordinator = Coordinator::spawn(host, "viewer://test");
    let mut link = SourceLink::new(coordinator);
    let mut renderer = Renderer::new(backend, MapFetcher::empty(), glyphs());

    let (tx, _rx) = create_event_channel();
    let events = EventSender::new(tx);

    let err = controller
        .export(
            &doc,
            &StyleProfile::default(),
            &mut renderer,
            &mut link,
            &events,
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("rendering turn 2"));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let received = host.received();
    let images = received
        .iter()
        .filter(|m| matches!(m, WireMessage::AddImage { .. }))
        .count();
    assert_eq!(images, 1, "the first turn's image stays visible");
    assert!(
        !received
            .iter()
            .any(|m| matches!(m, WireMessage::ExportDone { .. })),
        "an aborted export never signals completion"
    );
}
