//! Offscreen composite construction.
//!
//! A composite is the card handed to the snapshot backend: masked
//! clones of the user fragment and the assistant group, tinted with
//! their role colors, laid out inside the profile's card. Composites
//! are mounted in a single reusable offscreen arena; the mount guard
//! removes them on every exit path so a failed attempt leaves nothing
//! behind for the next one.

use crate::document::{BlockStyle, Document, Element};
use crate::mask::MaskSet;
use crate::profile::StyleProfile;
use crate::segment::Turn;

use super::backend::SnapshotError;

/// Corner radius of the outer card.
const CARD_RADIUS: u32 = 18;
/// Corner radius and padding of each role bubble.
const BUBBLE_RADIUS: u32 = 14;
const BUBBLE_PADDING: u32 = 12;
/// Vertical gap before the assistant group.
const ASSISTANT_GAP: u32 = 12;

/// What the stripped tier removes before layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeOptions {
    pub strip_media: bool,
    pub strip_backgrounds: bool,
}

impl CompositeOptions {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn stripped() -> Self {
        Self {
            strip_media: true,
            strip_backgrounds: true,
        }
    }
}

/// An offscreen card ready to snapshot.
#[derive(Debug)]
pub struct Composite {
    pub card: Element,
    pub width_px: u32,
    pub scale: f32,
    /// First tainting pixel source, if any. Set at build time for
    /// stylesheets and background images, and by the media loader for
    /// fetched cross-origin bytes.
    pub taint: Option<String>,
}

/// Removes the tool's own injected control elements from a clone.
pub fn remove_injected_controls(el: &mut Element) {
    if let Element::Block { children, .. } = el {
        children.retain(|child| {
            !matches!(child, Element::Block { style, .. } if style.injected)
        });
        for child in children {
            remove_injected_controls(child);
        }
    }
}

/// Removes every embedded media element (images, video, canvases,
/// vector graphics, frames) from a clone.
pub fn strip_media_elements(el: &mut Element) {
    if let Element::Block { children, .. } = el {
        children.retain(|child| !matches!(child, Element::Media(_)));
        for child in children {
            strip_media_elements(child);
        }
    }
}

/// Clears background-image styling everywhere in a clone.
pub fn clear_background_images(el: &mut Element) {
    if let Element::Block { style, children } = el {
        style.background_image = None;
        for child in children {
            clear_background_images(child);
        }
    }
}

/// Injected-UI removal plus masking: the shared cleanup every tier
/// applies to a fragment clone before using it.
pub fn clean_fragment_clone(el: &mut Element, mask: &MaskSet) {
    remove_injected_controls(el);
    mask.apply(el);
}

fn bubble(background: &str, margin_top: u32, children: Vec<Element>) -> Element {
    Element::Block {
        style: BlockStyle {
            background: Some(background.to_string()),
            background_image: None,
            padding_px: BUBBLE_PADDING,
            corner_radius_px: BUBBLE_RADIUS,
            margin_top_px: margin_top,
            injected: false,
        },
        children,
    }
}

fn first_background_image_taint(el: &Element, origin: &str) -> Option<String> {
    match el {
        Element::Block { style, children } => {
            if let Some(src) = &style.background_image {
                if src.taints_against(origin) {
                    return src.url().map(str::to_string);
                }
            }
            children
                .iter()
                .find_map(|c| first_background_image_taint(c, origin))
        }
        _ => None,
    }
}

/// Builds the offscreen composite for one turn.
///
/// Fails only when the turn's fragments have disappeared from the
/// document between segmentation and render — a condition the caller
/// treats as fatal, not as a fidelity degradation.
pub fn build_composite(
    doc: &Document,
    turn: &Turn,
    profile: &StyleProfile,
    mask: &MaskSet,
    opts: CompositeOptions,
) -> Result<Composite, SnapshotError> {
    let mut user_clone = doc
        .clone_body(turn.user)
        .ok_or_else(|| SnapshotError::Failed("user fragment no longer in document".into()))?;

    let mut assistant_children = Vec::with_capacity(turn.assistant.len());
    for id in &turn.assistant {
        let clone = doc.clone_body(*id).ok_or_else(|| {
            SnapshotError::Failed("assistant fragment no longer in document".into())
        })?;
        assistant_children.push(clone);
    }

    clean_fragment_clone(&mut user_clone, mask);
    let mut assistant_wrap = Element::block(assistant_children);
    clean_fragment_clone(&mut assistant_wrap, mask);

    let mut user_bubble = bubble(&profile.user_bg, 0, vec![user_clone]);
    let mut assistant_bubble =
        bubble(&profile.assistant_bg, ASSISTANT_GAP, vec![assistant_wrap]);

    if opts.strip_media {
        strip_media_elements(&mut user_bubble);
        strip_media_elements(&mut assistant_bubble);
    }
    if opts.strip_backgrounds {
        clear_background_images(&mut user_bubble);
        clear_background_images(&mut assistant_bubble);
    }

    let card = Element::Block {
        style: BlockStyle {
            background: Some(profile.canvas_bg.clone()),
            background_image: None,
            padding_px: profile.padding_px,
            corner_radius_px: CARD_RADIUS,
            margin_top_px: 0,
            injected: false,
        },
        children: vec![user_bubble, assistant_bubble],
    };

    // Stylesheets survive stripping; a tainting one blocks both
    // snapshot tiers. Remaining background images are checked here
    // because the backend never fetches them lazily.
    let origin = doc.origin();
    let taint = doc
        .stylesheets()
        .iter()
        .filter(|s| s.taints_against(origin))
        .find_map(|s| s.url().map(str::to_string))
        .or_else(|| first_background_image_taint(&card, origin));

    Ok(Composite {
        card,
        width_px: profile.effective_width(),
        scale: profile.effective_scale(),
        taint,
    })
}

/// The single reusable off-viewport container for composite work.
pub struct OffscreenArena {
    occupied: bool,
}

impl OffscreenArena {
    pub fn new() -> Self {
        Self { occupied: false }
    }

    /// Mounts a composite for one attempt. Rendering is strictly
    /// sequential, so an occupied arena means a previous attempt leaked
    /// its mount — a programmer error, reported rather than retried.
    pub fn mount(&mut self, composite: Composite) -> Result<MountedComposite<'_>, SnapshotError> {
        if self.occupied {
            return Err(SnapshotError::Failed(
                "offscreen container already in use".into(),
            ));
        }
        self.occupied = true;
        Ok(MountedComposite {
            arena: self,
            composite,
        })
    }
}

impl Default for OffscreenArena {
    fn default() -> Self {
        Self::new()
    }
}

/// A composite mounted in the arena; unmounts on drop.
pub struct MountedComposite<'a> {
    arena: &'a mut OffscreenArena,
    composite: Composite,
}

impl MountedComposite<'_> {
    pub fn composite(&self) -> &Composite {
        &self.composite
    }

    pub fn composite_mut(&mut self) -> &mut Composite {
        &mut self.composite
    }
}

impl Drop for MountedComposite<'_> {
    fn drop(&mut self) {
        self.arena.occupied = false;
    }
}
