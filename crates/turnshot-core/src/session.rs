//! Session delivery protocol.
//!
//! Three execution contexts cooperate without shared memory: the
//! source (where turns are rendered), a long-lived coordinator, and a
//! presentation surface created per export. Everything that crosses a
//! boundary is an owned, serializable message; the coordinator holds
//! the only session table and is a pure relay for image delivery.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded wait for a freshly created surface to report loaded. The
/// coordinator proceeds either way; the readiness handshake below is
/// the gate that actually blocks delivery.
pub const SURFACE_LOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Export-wide bound on the viewer readiness handshake.
pub const VIEWER_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Opaque single-use session token.
pub type SessionId = String;

/// Host-assigned identity of a presentation surface.
pub type SurfaceId = u64;

/// Messages exchanged across context boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WireMessage {
    OpenViewer,
    ViewerReady {
        session_id: SessionId,
        surface_id: SurfaceId,
    },
    AddImage {
        session_id: SessionId,
        filename: String,
        data: Vec<u8>,
    },
    ExportDone {
        session_id: SessionId,
    },
}

/// Reply to `open-viewer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedViewer {
    pub session_id: SessionId,
    pub surface_id: SurfaceId,
}

/// Lifecycle of one session as the coordinator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    ViewerReady,
    Delivering,
    Done,
}

/// A freshly created presentation surface.
pub struct CreatedSurface {
    pub surface_id: SurfaceId,
    /// Inbox for messages relayed to the surface.
    pub inbox: mpsc::Sender<WireMessage>,
    /// Resolved once the surface finishes loading.
    pub loaded: oneshot::Receiver<()>,
}

/// Host-environment capability: creating presentation surfaces.
pub trait SurfaceHost: Send + 'static {
    /// Creates a fresh surface pointed at `target`. The surface uses
    /// `coordinator` to announce its own readiness.
    fn create_surface(&self, target: &str, coordinator: CoordinatorHandle) -> CreatedSurface;
}

enum CoordinatorRequest {
    /// `open-viewer`, carrying the source's notification inbox and the
    /// reply path.
    OpenViewer {
        source: mpsc::Sender<WireMessage>,
        reply: oneshot::Sender<Result<OpenedViewer>>,
    },
    /// Every other protocol message, from either side.
    Message(WireMessage),
}

/// Cloneable address of the coordinator, handed to sources and
/// surfaces alike.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorRequest>,
}

impl CoordinatorHandle {
    /// Sends a protocol message to the coordinator.
    pub async fn send(&self, msg: WireMessage) -> Result<()> {
        self.tx
            .send(CoordinatorRequest::Message(msg))
            .await
            .map_err(|_| anyhow!("coordinator is gone"))
    }

    async fn open_viewer(&self, source: mpsc::Sender<WireMessage>) -> Result<OpenedViewer> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordinatorRequest::OpenViewer {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("coordinator is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("coordinator dropped the open-viewer reply"))?
    }
}

struct SessionRecord {
    source: mpsc::Sender<WireMessage>,
    surface_id: SurfaceId,
    viewer: mpsc::Sender<WireMessage>,
    state: SessionState,
}

/// The long-lived coordinator task.
///
/// Tolerates any number of session records at once (an abandoned
/// export's surface may still be open), but each id is allocated once
/// and never reused.
pub struct Coordinator<H> {
    host: H,
    viewer_target: String,
    sessions: HashMap<SessionId, SessionRecord>,
    rx: mpsc::Receiver<CoordinatorRequest>,
    self_tx: mpsc::WeakSender<CoordinatorRequest>,
}

impl<H: SurfaceHost> Coordinator<H> {
    /// Spawns the coordinator; `viewer_target` is the base address new
    /// surfaces are pointed at, parameterized per session.
    pub fn spawn(host: H, viewer_target: impl Into<String>) -> CoordinatorHandle {
        let (tx, rx) = mpsc::channel(64);
        let coordinator = Coordinator {
            host,
            viewer_target: viewer_target.into(),
            sessions: HashMap::new(),
            rx,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(coordinator.run());
        CoordinatorHandle { tx }
    }

    async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            match request {
                CoordinatorRequest::OpenViewer { source, reply } => {
                    let result = self.open_viewer(source).await;
                    let _ = reply.send(result);
                }
                CoordinatorRequest::Message(msg) => self.relay(msg).await,
            }
        }
        debug!("coordinator shut down");
    }

    async fn open_viewer(&mut self, source: mpsc::Sender<WireMessage>) -> Result<OpenedViewer> {
        let handle = self
            .self_tx
            .upgrade()
            .map(|tx| CoordinatorHandle { tx })
            .ok_or_else(|| anyhow!("coordinator is shutting down"))?;

        let session_id: SessionId = Uuid::new_v4().to_string();
        let target = format!("{}?session={}", self.viewer_target, session_id);
        let created = self.host.create_surface(&target, handle);

        // Best-effort: a surface that never reports loaded can still
        // become ready later; the source's handshake is the real gate.
        let surface_id = created.surface_id;
        if timeout(SURFACE_LOAD_TIMEOUT, created.loaded).await.is_err() {
            warn!(%session_id, "surface did not report loaded in time");
        }

        info!(%session_id, surface_id, "session opened");
        self.sessions.insert(
            session_id.clone(),
            SessionRecord {
                source,
                surface_id,
                viewer: created.inbox,
                state: SessionState::Opened,
            },
        );
        Ok(OpenedViewer {
            session_id,
            surface_id,
        })
    }

    async fn relay(&mut self, msg: WireMessage) {
        match msg {
            WireMessage::ViewerReady {
                session_id,
                surface_id,
            } => {
                let Some(record) = self.sessions.get_mut(&session_id) else {
                    warn!(%session_id, "viewer-ready for unknown session");
                    return;
                };
                record.surface_id = surface_id;
                record.state = SessionState::ViewerReady;
                let notify = WireMessage::ViewerReady {
                    session_id: session_id.clone(),
                    surface_id,
                };
                if record.source.send(notify).await.is_err() {
                    debug!(%session_id, "source gone before viewer-ready relay");
                }
            }
            WireMessage::AddImage {
                session_id,
                filename,
                data,
            } => {
                let Some(record) = self.sessions.get_mut(&session_id) else {
                    warn!(%session_id, %filename, "add-image for unknown session");
                    return;
                };
                if record.state == SessionState::Done {
                    warn!(%session_id, %filename, "image delivered after export-done");
                }
                record.state = SessionState::Delivering;
                let forward = WireMessage::AddImage {
                    session_id: session_id.clone(),
                    filename,
                    data,
                };
                if record.viewer.send(forward).await.is_err() {
                    warn!(%session_id, "presentation surface closed mid-delivery");
                }
            }
            WireMessage::ExportDone { session_id } => {
                let Some(record) = self.sessions.get_mut(&session_id) else {
                    warn!(%session_id, "export-done for unknown session");
                    return;
                };
                record.state = SessionState::Done;
                let forward = WireMessage::ExportDone {
                    session_id: session_id.clone(),
                };
                let _ = record.viewer.send(forward).await;
            }
            WireMessage::OpenViewer => {
                warn!("open-viewer must use the request path, not the relay");
            }
        }
    }
}

/// The viewer readiness handshake did not complete in time.
#[derive(Debug)]
pub struct HandshakeTimeout {
    pub waited: Duration,
}

impl fmt::Display for HandshakeTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "presentation surface was not ready within {}s",
            self.waited.as_secs()
        )
    }
}

impl std::error::Error for HandshakeTimeout {}

/// Source-context endpoint of the protocol.
pub struct SourceLink {
    coordinator: CoordinatorHandle,
    inbox_tx: mpsc::Sender<WireMessage>,
    inbox: mpsc::Receiver<WireMessage>,
    ready_sessions: HashSet<SessionId>,
}

impl SourceLink {
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        let (inbox_tx, inbox) = mpsc::channel(16);
        Self {
            coordinator,
            inbox_tx,
            inbox,
            ready_sessions: HashSet::new(),
        }
    }

    /// Opens a fresh session; the coordinator creates and records the
    /// presentation surface.
    pub async fn open_session(&self) -> Result<OpenedViewer> {
        self.coordinator
            .open_viewer(self.inbox_tx.clone())
            .await
            .context("opening export session")
    }

    /// Blocks until `viewer-ready` for exactly `session_id` has been
    /// observed. No image may be sent before this returns.
    pub async fn wait_viewer_ready(
        &mut self,
        session_id: &str,
        limit: Duration,
    ) -> Result<(), HandshakeTimeout> {
        if self.ready_sessions.contains(session_id) {
            return Ok(());
        }
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            match timeout(remaining, self.inbox.recv()).await {
                Ok(Some(WireMessage::ViewerReady {
                    session_id: ready, ..
                })) => {
                    self.ready_sessions.insert(ready.clone());
                    if ready == session_id {
                        return Ok(());
                    }
                }
                Ok(Some(other)) => {
                    debug!(?other, "ignoring non-handshake notification");
                }
                // A closed channel means the coordinator is gone; the
                // viewer can never become ready, so report it the same
                // way as a timeout.
                Ok(None) | Err(_) => return Err(HandshakeTimeout { waited: limit }),
            }
        }
    }

    /// Delivers one image. Per-session ordering is the coordinator's
    /// FIFO; the source sends strictly sequentially.
    pub async fn send_image(
        &self,
        session_id: &str,
        filename: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<()> {
        self.coordinator
            .send(WireMessage::AddImage {
                session_id: session_id.to_string(),
                filename: filename.into(),
                data,
            })
            .await
    }

    /// Signals that no further images will be sent for this session.
    pub async fn finish(&self, session_id: &str) -> Result<()> {
        self.coordinator
            .send(WireMessage::ExportDone {
                session_id: session_id.to_string(),
            })
            .await
    }
}
