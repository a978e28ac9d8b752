//! `turnshot export`: load a transcript, segment it, and deliver the
//! selected turns as PNG cards through the session protocol.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use turnshot_core::config::{self, ProfileStore};
use turnshot_core::controller::{Controller, EventSender, ExportEvent, create_event_channel};
use turnshot_core::profile::StyleProfile;
use turnshot_core::render::Renderer;
use turnshot_core::render::backend::RasterBackend;
use turnshot_core::render::glyphs::{GlyphSource, TtfGlyphs, resolve_font_path};
use turnshot_core::render::media::HttpFetcher;
use turnshot_core::session::{Coordinator, SourceLink};
use turnshot_core::transcript::load_transcript;
use turnshot_core::viewer::DirectorySurfaceHost;

pub struct ExportArgs {
    pub transcript: PathBuf,
    pub out: PathBuf,
    pub turns: String,
    pub profile: Option<String>,
    pub font: Option<PathBuf>,
}

pub async fn run(home: &Path, args: ExportArgs) -> Result<()> {
    let store = ProfileStore::open(config::profiles_path(home))?;
    let profile = resolve_profile(&store, args.profile.as_deref())?;

    let mut doc = load_transcript(&args.transcript)?;
    let mut controller = Controller::new();
    controller.force_sync(&mut doc);

    if controller.state.turns.is_empty() {
        println!("no complete turns in {}", args.transcript.display());
        return Ok(());
    }

    let picked = parse_turn_selection(&args.turns, controller.state.turns.len())?;
    let uids: Vec<_> = picked
        .iter()
        .map(|&i| controller.state.turns[i].uid)
        .collect();
    for uid in uids {
        controller.state.set_selected(uid, true);
    }

    let font_path = resolve_font_path(args.font.as_deref())?;
    let glyphs: Arc<dyn GlyphSource> = Arc::new(TtfGlyphs::load(&font_path)?);
    let mut renderer = Renderer::new(
        RasterBackend::new(Arc::clone(&glyphs)),
        HttpFetcher::new(),
        glyphs,
    );

    let host = DirectorySurfaceHost::new(&args.out);
    let target = host.target();
    let coordinator = Coordinator::spawn(host, target);
    let mut link = SourceLink::new(coordinator);

    let (tx, mut rx) = create_event_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            print_event(&ev);
        }
    });
    let events = EventSender::new(tx);

    let outcome = controller
        .export(&doc, &profile, &mut renderer, &mut link, &events)
        .await;
    drop(events);
    let _ = printer.await;

    let outcome = outcome?;
    if outcome.delivered > 0 {
        println!(
            "exported {} image(s) under {}",
            outcome.delivered,
            args.out.display()
        );
    }
    Ok(())
}

fn resolve_profile(store: &ProfileStore, id: Option<&str>) -> Result<StyleProfile> {
    match id {
        Some(id) => store
            .profiles()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("no profile with id {id:?}")),
        None => Ok(store.active().clone()),
    }
}

fn print_event(ev: &ExportEvent) {
    match ev {
        ExportEvent::OpeningViewer { selected } => {
            println!("opening viewer for {selected} turn(s)...");
        }
        ExportEvent::ViewerWaiting { session_id } => {
            println!("session {session_id}: waiting for viewer...");
        }
        ExportEvent::Rendering { index, total } => {
            println!("rendering {index}/{total}...");
        }
        ExportEvent::ImageDelivered { filename } => {
            println!("delivered {filename}");
        }
        ExportEvent::NothingSelected => {
            println!("0 turns selected; nothing to export");
        }
        ExportEvent::Completed {
            delivered,
            stripped,
            text_synthesized,
        } => {
            let mut notes = Vec::new();
            if *stripped > 0 {
                notes.push(format!("{stripped} without embedded media"));
            }
            if *text_synthesized > 0 {
                notes.push(format!("{text_synthesized} as text only"));
            }
            if notes.is_empty() {
                println!("done: {delivered} image(s)");
            } else {
                println!("done: {delivered} image(s) ({})", notes.join(", "));
            }
        }
    }
}

/// Parses `"all"` or a 1-based list like `"1,3-5"` into sorted
/// zero-based indexes.
fn parse_turn_selection(selector: &str, total: usize) -> Result<Vec<usize>> {
    let selector = selector.trim();
    if selector.eq_ignore_ascii_case("all") {
        return Ok((0..total).collect());
    }

    let mut picked = BTreeSet::new();
    for part in selector.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (parse_index(lo)?, parse_index(hi)?),
            None => {
                let i = parse_index(part)?;
                (i, i)
            }
        };
        if lo > hi {
            bail!("invalid turn range {part:?}");
        }
        for i in lo..=hi {
            if i > total {
                bail!("turn {i} is out of range (transcript has {total})");
            }
            picked.insert(i - 1);
        }
    }
    if picked.is_empty() {
        bail!("turn selection {selector:?} picked nothing");
    }
    Ok(picked.into_iter().collect())
}

fn parse_index(s: &str) -> Result<usize> {
    let i: usize = s
        .trim()
        .parse()
        .with_context(|| format!("invalid turn number {s:?}"))?;
    if i == 0 {
        bail!("turn numbers are 1-based");
    }
    Ok(i)
}
