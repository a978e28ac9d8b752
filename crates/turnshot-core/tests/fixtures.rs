//! Shared fixtures for integration tests: deterministic glyphs, a
//! scripted snapshot backend, a recording surface host, and document
//! builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use turnshot_core::document::{
    Document, Element, MediaElement, MediaKind, MediaSource, Role,
};
use turnshot_core::render::backend::{SnapshotBackend, SnapshotError};
use turnshot_core::render::composite::Composite;
use turnshot_core::render::glyphs::{GlyphSource, RasterGlyph};
use turnshot_core::render::media::MediaFetcher;
use turnshot_core::session::{
    CoordinatorHandle, CreatedSurface, SurfaceHost, WireMessage,
};

/// Deterministic glyphs: fixed advance, square coverage.
pub struct BoxGlyphs;

impl GlyphSource for BoxGlyphs {
    fn measure(&self, text: &str, px: f32) -> f32 {
        text.chars().count() as f32 * px * 0.5
    }

    fn ascent(&self, px: f32) -> f32 {
        px * 0.8
    }

    fn rasterize(&self, _ch: char, px: f32) -> RasterGlyph {
        let side = (px * 0.4).max(1.0) as usize;
        RasterGlyph {
            width: side,
            height: side,
            xmin: 0,
            ymin: 0,
            advance: px * 0.5,
            coverage: vec![255; side * side],
        }
    }
}

/// One scripted response of [`ScriptedBackend`].
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Ok,
    Deny,
    Fail,
}

/// Snapshot backend that plays back a response script and records how
/// many attempts were made.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Script>>,
    pub attempts: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend that succeeds forever.
    pub fn always_ok() -> Self {
        Self::new([])
    }
}

impl SnapshotBackend for ScriptedBackend {
    fn snapshot(&self, _composite: &Composite) -> Result<image::RgbaImage, SnapshotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Script::Ok);
        match next {
            Script::Ok => Ok(image::RgbaImage::from_pixel(
                4,
                4,
                image::Rgba([9, 9, 9, 255]),
            )),
            Script::Deny => Err(SnapshotError::CrossOriginDenied {
                source_url: "https://cdn.example.net/blocked.png".into(),
            }),
            Script::Fail => Err(SnapshotError::Failed("scripted backend failure".into())),
        }
    }
}

/// Media fetcher serving from an in-memory map.
pub struct MapFetcher(pub HashMap<String, Vec<u8>>);

impl MapFetcher {
    pub fn single(url: &str, bytes: Vec<u8>) -> Self {
        Self(HashMap::from([(url.to_string(), bytes)]))
    }

    pub fn empty() -> Self {
        Self(HashMap::new())
    }
}

impl MediaFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.0
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no fixture for {url}"))
    }
}

/// How a recording surface behaves after creation.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceBehavior {
    /// Send the host "loaded" signal.
    pub signal_loaded: bool,
    /// Announce `viewer-ready` to the coordinator.
    pub announce_ready: bool,
}

impl SurfaceBehavior {
    pub fn responsive() -> Self {
        Self {
            signal_loaded: true,
            announce_ready: true,
        }
    }

    /// A surface that loads but never completes the readiness
    /// handshake.
    pub fn silent() -> Self {
        Self {
            signal_loaded: true,
            announce_ready: false,
        }
    }
}

/// Surface host whose viewers append every received message to a
/// shared log.
pub struct RecordingHost {
    pub log: Arc<Mutex<Vec<WireMessage>>>,
    pub created: Arc<AtomicUsize>,
    behavior: SurfaceBehavior,
    next_surface: AtomicU64,
}

impl RecordingHost {
    pub fn new(behavior: SurfaceBehavior) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            created: Arc::new(AtomicUsize::new(0)),
            behavior,
            next_surface: AtomicU64::new(1),
        }
    }

    pub fn received(&self) -> Vec<WireMessage> {
        self.log.lock().expect("log lock").clone()
    }

    pub fn delivered_filenames(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|msg| match msg {
                WireMessage::AddImage { filename, .. } => Some(filename),
                _ => None,
            })
            .collect()
    }
}

fn session_from_target(target: &str) -> String {
    target
        .split_once("session=")
        .map(|(_, id)| id.to_string())
        .unwrap_or_default()
}

impl SurfaceHost for &'static RecordingHost {
    fn create_surface(&self, target: &str, coordinator: CoordinatorHandle) -> CreatedSurface {
        self.created.fetch_add(1, Ordering::SeqCst);
        let surface_id = self.next_surface.fetch_add(1, Ordering::Relaxed);
        let session_id = session_from_target(target);
        let behavior = self.behavior;
        let log = Arc::clone(&self.log);

        let (inbox_tx, mut inbox_rx) = mpsc::channel(16);
        let (loaded_tx, loaded_rx) = oneshot::channel();

        tokio::spawn(async move {
            if behavior.signal_loaded {
                let _ = loaded_tx.send(());
            }
            if behavior.announce_ready {
                let _ = coordinator
                    .send(WireMessage::ViewerReady {
                        session_id,
                        surface_id,
                    })
                    .await;
            }
            while let Some(msg) = inbox_rx.recv().await {
                log.lock().expect("log lock").push(msg);
            }
        });

        CreatedSurface {
            surface_id,
            inbox: inbox_tx,
            loaded: loaded_rx,
        }
    }
}

/// A document with `n` complete turns on a same-origin page.
pub fn doc_with_turns(n: usize) -> Document {
    let mut doc = Document::new("https://chat.example.com/c/1");
    for i in 0..n {
        doc.push_message(Role::User, Element::text(format!("question {i}")));
        doc.push_message(Role::Assistant, Element::text(format!("answer {i}")));
    }
    doc
}

/// A single-turn document whose assistant reply embeds a remote image.
pub fn doc_with_remote_image(url: &str, cors: bool) -> Document {
    let mut doc = Document::new("https://chat.example.com/c/1");
    doc.push_message(Role::User, Element::text("what does it look like?"));
    doc.push_message(
        Role::Assistant,
        Element::block(vec![
            Element::text("like this:"),
            Element::Media(MediaElement::new(
                MediaKind::Image,
                MediaSource::Remote {
                    url: url.into(),
                    cors,
                },
            )),
        ]),
    );
    doc
}

/// Leaks a host so it can serve as a `SurfaceHost` while the test keeps
/// inspecting its log.
pub fn leak_host(behavior: SurfaceBehavior) -> &'static RecordingHost {
    Box::leak(Box::new(RecordingHost::new(behavior)))
}

/// A tiny valid PNG for media fixtures.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 100, 50, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode fixture png");
    buf.into_inner()
}
