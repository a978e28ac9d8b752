//! Default presentation surface: a task that writes delivered images
//! into a session-scoped directory, in arrival order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::session::{
    CoordinatorHandle, CreatedSurface, SessionId, SurfaceHost, SurfaceId, WireMessage,
};

/// Creates directory-backed viewer surfaces under one output root.
pub struct DirectorySurfaceHost {
    root: PathBuf,
    next_surface: AtomicU64,
}

impl DirectorySurfaceHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_surface: AtomicU64::new(1),
        }
    }

    /// The viewer base target for this host; the coordinator appends
    /// the session parameter.
    pub fn target(&self) -> String {
        format!("viewer://{}", self.root.display())
    }
}

/// Extracts the session parameter from a surface target.
fn session_from_target(target: &str) -> Option<SessionId> {
    let query = target.split_once('?')?.1;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("session="))
        .map(str::to_string)
}

impl SurfaceHost for DirectorySurfaceHost {
    fn create_surface(&self, target: &str, coordinator: CoordinatorHandle) -> CreatedSurface {
        let surface_id: SurfaceId = self.next_surface.fetch_add(1, Ordering::Relaxed);
        let session_id = session_from_target(target).unwrap_or_default();
        let dir = self.root.join(&session_id);

        let (inbox_tx, inbox_rx) = mpsc::channel(16);
        let (loaded_tx, loaded_rx) = oneshot::channel();
        tokio::spawn(run_viewer(
            dir,
            session_id,
            surface_id,
            coordinator,
            inbox_rx,
            loaded_tx,
        ));

        CreatedSurface {
            surface_id,
            inbox: inbox_tx,
            loaded: loaded_rx,
        }
    }
}

async fn run_viewer(
    dir: PathBuf,
    session_id: SessionId,
    surface_id: SurfaceId,
    coordinator: CoordinatorHandle,
    mut inbox: mpsc::Receiver<WireMessage>,
    loaded: oneshot::Sender<()>,
) {
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        // Never reaches loaded, so the session stalls at the handshake
        // instead of silently dropping images.
        error!(dir = %dir.display(), error = %err, "viewer could not create its directory");
        return;
    }
    let _ = loaded.send(());

    if coordinator
        .send(WireMessage::ViewerReady {
            session_id: session_id.clone(),
            surface_id,
        })
        .await
        .is_err()
    {
        return;
    }
    info!(%session_id, dir = %dir.display(), "viewer ready");

    let mut received = 0usize;
    while let Some(msg) = inbox.recv().await {
        match msg {
            WireMessage::AddImage {
                session_id: sid,
                filename,
                data,
            } if sid == session_id => {
                let Some(name) = Path::new(&filename).file_name() else {
                    debug!(%filename, "dropping image with empty filename");
                    continue;
                };
                let path = dir.join(name);
                match tokio::fs::write(&path, &data).await {
                    Ok(()) => {
                        received += 1;
                        info!(%session_id, file = %path.display(), received, "image received");
                    }
                    Err(err) => {
                        error!(file = %path.display(), error = %err, "failed to store image");
                    }
                }
            }
            WireMessage::ExportDone { session_id: sid } if sid == session_id => {
                info!(%session_id, received, "export complete");
            }
            other => {
                debug!(%session_id, ?other, "ignoring message for another session");
            }
        }
    }
}
