//! Selection/sync controller.
//!
//! Owns the segmented turn list and the selected-uid set, reconciles
//! them against the mutating document on a debounced schedule, and
//! drives exports: open a session, wait for the viewer handshake,
//! render and deliver each selected turn strictly in order, then close
//! the session out with an aggregate fidelity summary.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::document::{Document, DocumentEdit, TurnUid};
use crate::profile::StyleProfile;
use crate::render::backend::SnapshotBackend;
use crate::render::media::MediaFetcher;
use crate::render::{FallbackCounters, Renderer};
use crate::segment::{Turn, segment};
use crate::session::{SourceLink, VIEWER_READY_TIMEOUT};

/// Dirty signals are coalesced into one re-scan after this delay.
pub const SYNC_COALESCE_DELAY: Duration = Duration::from_millis(250);
/// Minimum gap between completed scans, unless a scan is forced.
pub const SYNC_MIN_GAP: Duration = Duration::from_millis(400);
/// Location changes are only observable by polling.
pub const LOCATION_POLL_PERIOD: Duration = Duration::from_millis(800);

/// Status events emitted during an export.
///
/// Serializable for a future JSON status mode; the CLI renders them as
/// status lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportEvent {
    /// Export started; a presentation surface is being opened.
    OpeningViewer { selected: usize },
    /// Session opened; waiting for the viewer readiness handshake.
    ViewerWaiting { session_id: String },
    /// Rendering turn `index` of `total` (1-based).
    Rendering { index: usize, total: usize },
    /// One image was handed to the delivery protocol.
    ImageDelivered { filename: String },
    /// Export was invoked with zero selected turns; nothing was opened.
    NothingSelected,
    /// Export finished, with aggregate fidelity-loss counts.
    Completed {
        delivered: usize,
        stripped: u64,
        text_synthesized: u64,
    },
}

pub type ExportEventTx = mpsc::Sender<ExportEvent>;
pub type ExportEventRx = mpsc::Receiver<ExportEvent>;

/// Default capacity for export event streams.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

pub fn create_event_channel() -> (ExportEventTx, ExportEventRx) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Event sender that tolerates a departed consumer.
#[derive(Clone)]
pub struct EventSender {
    tx: ExportEventTx,
}

impl EventSender {
    pub fn new(tx: ExportEventTx) -> Self {
        Self { tx }
    }

    pub async fn send(&self, ev: ExportEvent) {
        let _ = self.tx.send(ev).await;
    }
}

/// Debounce policy for re-scans, kept separate from the async driver so
/// the policy itself is directly testable.
pub struct SyncScheduler {
    coalesce: Duration,
    min_gap: Duration,
    last_scan: Option<Instant>,
    scheduled: bool,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self {
            coalesce: SYNC_COALESCE_DELAY,
            min_gap: SYNC_MIN_GAP,
            last_scan: None,
            scheduled: false,
        }
    }

    /// Registers a dirty signal. Returns the deadline of a newly
    /// scheduled scan, or `None` when the signal was absorbed: either a
    /// scan is already pending, or a non-forced signal arrived inside
    /// the minimum gap after the last completed scan.
    pub fn request(&mut self, now: Instant, force: bool) -> Option<Instant> {
        if !force {
            if let Some(last) = self.last_scan {
                if now.duration_since(last) < self.min_gap {
                    return None;
                }
            }
        }
        if self.scheduled {
            return None;
        }
        self.scheduled = true;
        Some(now + self.coalesce)
    }

    /// Marks the pending scan as done, opening the minimum-gap window.
    pub fn scan_completed(&mut self, now: Instant) {
        self.scheduled = false;
        self.last_scan = Some(now);
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Selection and segmentation state for one attached document.
#[derive(Default)]
pub struct ControllerState {
    pub turns: Vec<Turn>,
    /// Uids stay selected even while their turns are not in the
    /// segmented list, so re-rendered turns reappear pre-selected.
    pub selected: HashSet<TurnUid>,
    pub selection_enabled: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_selected(&mut self, uid: TurnUid, on: bool) {
        if on {
            self.selected.insert(uid);
        } else {
            self.selected.remove(&uid);
        }
    }

    pub fn toggle(&mut self, uid: TurnUid) {
        if !self.selected.remove(&uid) {
            self.selected.insert(uid);
        }
    }

    /// Selects every currently segmented turn.
    pub fn select_all(&mut self) {
        for turn in &self.turns {
            self.selected.insert(turn.uid);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Selected turns, in segmentation order.
    pub fn selected_turns(&self) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| self.selected.contains(&t.uid))
            .cloned()
            .collect()
    }
}

/// Outcome of one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub delivered: usize,
    pub counters: FallbackCounters,
}

/// The controller: selection state plus the sync scheduler.
#[derive(Default)]
pub struct Controller {
    pub state: ControllerState,
    scheduler: SyncScheduler,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-segments immediately. Selection survives by uid.
    pub fn sync(&mut self, doc: &mut Document) {
        self.state.turns = segment(doc);
        debug!(turns = self.state.turns.len(), "document re-segmented");
    }

    /// Forced scan outside the debounce schedule (export start,
    /// location change handling in tests).
    pub fn force_sync(&mut self, doc: &mut Document) {
        self.sync(doc);
        self.scheduler.scan_completed(Instant::now());
    }

    /// Drives re-segmentation for one attached document until the edit
    /// stream closes. Edits are applied here; the document's own
    /// mutation notifications feed the debounced schedule, and location
    /// changes (observable only by polling) force a scan.
    pub async fn run_attached(
        &mut self,
        doc: &mut Document,
        mut edits: mpsc::Receiver<DocumentEdit>,
    ) {
        let mut revision_rx = doc.subscribe();
        let mut location_timer = tokio::time::interval(LOCATION_POLL_PERIOD);
        location_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_location = doc.location().to_string();
        let mut pending: Option<Instant> = None;

        loop {
            let deadline = pending.unwrap_or_else(Instant::now);
            tokio::select! {
                edit = edits.recv() => {
                    match edit {
                        Some(edit) => doc.apply(edit),
                        None => break,
                    }
                }
                changed = revision_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(at) = self.scheduler.request(Instant::now(), false) {
                        pending = Some(at);
                    }
                }
                _ = location_timer.tick() => {
                    if doc.location() != last_location {
                        last_location = doc.location().to_string();
                        if let Some(at) = self.scheduler.request(Instant::now(), true) {
                            pending = Some(at);
                        }
                    }
                }
                () = tokio::time::sleep_until(deadline), if pending.is_some() => {
                    pending = None;
                    self.sync(doc);
                    self.scheduler.scan_completed(Instant::now());
                }
            }
        }

        // Final reconcile so callers observe the end state regardless
        // of where the debounce window stood.
        self.sync(doc);
        self.scheduler.scan_completed(Instant::now());
    }

    /// Exports every selected turn through the delivery protocol.
    ///
    /// Zero selected turns short-circuit with a status event and no
    /// session. A handshake timeout or an unexpected render failure
    /// aborts the export; images already delivered stay visible on the
    /// presentation surface.
    pub async fn export<B, F>(
        &mut self,
        doc: &Document,
        profile: &StyleProfile,
        renderer: &mut Renderer<B, F>,
        link: &mut SourceLink,
        events: &EventSender,
    ) -> Result<ExportOutcome>
    where
        B: SnapshotBackend,
        F: MediaFetcher,
    {
        let selected = self.state.selected_turns();
        if selected.is_empty() {
            events.send(ExportEvent::NothingSelected).await;
            return Ok(ExportOutcome::default());
        }

        let stamp = format_request_stamp(Local::now());
        let total = selected.len();
        events
            .send(ExportEvent::OpeningViewer { selected: total })
            .await;

        let opened = link.open_session().await?;
        events
            .send(ExportEvent::ViewerWaiting {
                session_id: opened.session_id.clone(),
            })
            .await;
        link.wait_viewer_ready(&opened.session_id, VIEWER_READY_TIMEOUT)
            .await
            .map_err(anyhow::Error::new)
            .context("presentation surface never became ready")?;

        let mut counters = FallbackCounters::default();
        let mut delivered = 0usize;
        for (i, turn) in selected.iter().enumerate() {
            events
                .send(ExportEvent::Rendering {
                    index: i + 1,
                    total,
                })
                .await;
            let result = renderer
                .render(doc, turn, profile)
                .await
                .with_context(|| format!("rendering turn {} of {total}", i + 1))?;
            counters.record(result.tier);

            let filename = build_file_name(&stamp, i + 1);
            link.send_image(&opened.session_id, &filename, result.png)
                .await?;
            delivered += 1;
            events.send(ExportEvent::ImageDelivered { filename }).await;
        }

        link.finish(&opened.session_id).await?;
        events
            .send(ExportEvent::Completed {
                delivered,
                stripped: counters.stripped,
                text_synthesized: counters.text_synthesized,
            })
            .await;

        Ok(ExportOutcome {
            delivered,
            counters,
        })
    }
}

/// Export timestamp, frozen once at export start.
pub fn format_request_stamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d%H%M").to_string()
}

/// `"{stamp}_{index}.png"`, 1-based.
pub fn build_file_name(stamp: &str, index: usize) -> String {
    format!("{stamp}_{index}.png")
}
