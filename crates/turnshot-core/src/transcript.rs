//! Conversation transcript ingestion.
//!
//! Transcripts are JSONL files: a `meta` line followed by one event
//! per line. Schema v1:
//!
//! ```jsonl
//! { "type": "meta", "schema_version": 1, "origin": "https://chat.example.com/c/42" }
//! { "type": "message", "role": "user", "blocks": [ { "kind": "text", "text": "..." } ] }
//! { "type": "message", "role": "assistant", "text": "..." }
//! { "type": "stylesheet", "url": "https://chat.example.com/app.css", "cors": true }
//! ```
//!
//! Events map onto [`DocumentEdit`]s so a tailing reader can feed a
//! live document incrementally.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::document::{
    Document, DocumentEdit, Element, MediaElement, MediaKind, MediaSource, Role,
};

/// Current transcript schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// One line of a transcript file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// First line of every transcript.
    Meta {
        schema_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    Message {
        role: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocks: Vec<ContentBlock>,
        /// Shorthand for a single text block.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Stylesheet {
        url: String,
        #[serde(default)]
        cors: bool,
    },
    /// Navigation within the captured conversation.
    Location { location: String },
}

/// One content block of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default)]
        cors: bool,
    },
    /// Base64-encoded inline image payload.
    InlineImage {
        data: String,
    },
}

impl ContentBlock {
    fn to_element(&self) -> Result<Element> {
        Ok(match self {
            ContentBlock::Text { text } => Element::text(text.clone()),
            ContentBlock::Image { url, cors } => Element::Media(MediaElement::new(
                MediaKind::Image,
                MediaSource::Remote {
                    url: url.clone(),
                    cors: *cors,
                },
            )),
            ContentBlock::InlineImage { data } => {
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("decoding inline image data")?;
                Element::Media(MediaElement::new(
                    MediaKind::Image,
                    MediaSource::Inline { bytes },
                ))
            }
        })
    }
}

/// Converts a non-meta event into the document edit it describes.
pub fn event_to_edit(event: &TranscriptEvent) -> Result<Option<DocumentEdit>> {
    match event {
        TranscriptEvent::Meta { .. } => Ok(None),
        TranscriptEvent::Message { role, blocks, text } => {
            let mut children = Vec::with_capacity(blocks.len() + 1);
            if let Some(text) = text {
                children.push(Element::text(text.clone()));
            }
            for block in blocks {
                children.push(block.to_element()?);
            }
            Ok(Some(DocumentEdit::PushMessage {
                role: Role::parse(role),
                body: Element::block(children),
            }))
        }
        TranscriptEvent::Stylesheet { url, cors } => {
            Ok(Some(DocumentEdit::AddStylesheet(MediaSource::Remote {
                url: url.clone(),
                cors: *cors,
            })))
        }
        TranscriptEvent::Location { location } => {
            Ok(Some(DocumentEdit::SetLocation(location.clone())))
        }
    }
}

/// Loads a whole transcript into a fresh document.
pub fn load_transcript(path: &Path) -> Result<Document> {
    let file =
        File::open(path).with_context(|| format!("opening transcript {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut doc: Option<Document> = None;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TranscriptEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;

        match &event {
            TranscriptEvent::Meta {
                schema_version,
                origin,
            } => {
                if doc.is_some() {
                    bail!("{}: duplicate meta line {}", path.display(), lineno + 1);
                }
                if *schema_version > SCHEMA_VERSION {
                    bail!(
                        "transcript schema v{schema_version} is newer than supported v{SCHEMA_VERSION}"
                    );
                }
                let origin = origin.clone().unwrap_or_else(|| "file://local".to_string());
                doc = Some(Document::new(origin));
            }
            _ => {
                let Some(doc) = doc.as_mut() else {
                    bail!("{}: first line must be a meta event", path.display());
                };
                if let Some(edit) = event_to_edit(&event)? {
                    doc.apply(edit);
                }
            }
        }
    }

    doc.with_context(|| format!("{} is empty", path.display()))
}
