//! Mutable conversation document model.
//!
//! A [`Document`] is an ordered list of role-tagged message fragments, each
//! holding a small element tree (blocks, text leaves, media). The document is
//! owned by one attachment scope and mutated through explicit edit methods;
//! every edit bumps a revision counter published on a watch channel so the
//! sync controller can react without holding references into the tree.

use tokio::sync::watch;
use uuid::Uuid;

/// Stable identity of a materialized turn, attached to its user fragment.
pub type TurnUid = Uuid;

/// Identity of a message fragment within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Author role carried by a message fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Any other role tag (tool output, system banners). Grouped with the
    /// preceding user fragment like assistant replies.
    Other(String),
}

impl Role {
    /// Parses a role tag as found in transcripts.
    pub fn parse(tag: &str) -> Role {
        match tag {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Role::User)
    }
}

/// Where a media element's pixels come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Bytes embedded in the document itself.
    Inline { bytes: Vec<u8> },
    /// Bytes fetched from `url` at render time. `cors` records whether the
    /// host granted cross-origin pixel access.
    Remote { url: String, cors: bool },
}

impl MediaSource {
    /// True when reading this source's pixels from a different origin than
    /// `origin` would taint the snapshot.
    pub fn taints_against(&self, origin: &str) -> bool {
        match self {
            MediaSource::Inline { .. } => false,
            MediaSource::Remote { url, cors } => !cors && is_cross_origin(url, origin),
        }
    }

    /// The source URL, if remote.
    pub fn url(&self) -> Option<&str> {
        match self {
            MediaSource::Inline { .. } => None,
            MediaSource::Remote { url, .. } => Some(url),
        }
    }
}

/// Compares the host of `candidate` against the document origin.
///
/// Unparseable URLs count as cross-origin: we cannot prove they are safe.
pub fn is_cross_origin(candidate: &str, origin: &str) -> bool {
    let Ok(origin) = url::Url::parse(origin) else {
        return true;
    };
    let Ok(candidate) = url::Url::parse(candidate) else {
        return true;
    };
    candidate.host_str() != origin.host_str() || candidate.scheme() != origin.scheme()
}

/// Embedded media kinds, mirroring what the stripped render tier removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Canvas,
    Vector,
    Frame,
}

/// An embedded media element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaElement {
    pub kind: MediaKind,
    pub source: MediaSource,
    /// Pixel bytes once the loader has resolved the source. Always `None`
    /// inside the live document; only render-time clones are resolved.
    pub resolved: Option<Vec<u8>>,
}

impl MediaElement {
    pub fn new(kind: MediaKind, source: MediaSource) -> Self {
        Self {
            kind,
            source,
            resolved: None,
        }
    }
}

/// Block-level styling, a conversation-card subset of CSS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStyle {
    /// Background fill as a `#rrggbb` string.
    pub background: Option<String>,
    pub background_image: Option<MediaSource>,
    pub padding_px: u32,
    pub corner_radius_px: u32,
    /// Vertical gap above this block when stacked.
    pub margin_top_px: u32,
    /// Marks control elements injected by this tool; stripped from every
    /// render clone.
    pub injected: bool,
}

/// One node of a fragment's element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Block {
        style: BlockStyle,
        children: Vec<Element>,
    },
    Text(String),
    Media(MediaElement),
}

impl Element {
    /// A plain unstyled block.
    pub fn block(children: Vec<Element>) -> Element {
        Element::Block {
            style: BlockStyle::default(),
            children,
        }
    }

    pub fn text(s: impl Into<String>) -> Element {
        Element::Text(s.into())
    }

    /// Applies `f` to every text leaf in document order.
    pub fn for_each_text_mut(&mut self, f: &mut impl FnMut(&mut String)) {
        match self {
            Element::Text(t) => f(t),
            Element::Block { children, .. } => {
                for child in children {
                    child.for_each_text_mut(f);
                }
            }
            Element::Media(_) => {}
        }
    }

    /// Applies `f` to every media element in document order.
    pub fn for_each_media_mut(&mut self, f: &mut impl FnMut(&mut MediaElement)) {
        match self {
            Element::Media(m) => f(m),
            Element::Block { children, .. } => {
                for child in children {
                    child.for_each_media_mut(f);
                }
            }
            Element::Text(_) => {}
        }
    }

    /// Rendered text content: text leaves in document order, block
    /// boundaries as newlines, media contributing nothing.
    pub fn collect_text(&self) -> String {
        let mut out = String::new();
        self.collect_text_into(&mut out);
        out.trim().to_string()
    }

    fn collect_text_into(&self, out: &mut String) {
        match self {
            Element::Text(t) => out.push_str(t),
            Element::Block { children, .. } => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                for child in children {
                    child.collect_text_into(out);
                }
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Element::Media(_) => {}
        }
    }
}

/// A role-tagged message fragment.
#[derive(Debug, Clone)]
pub struct MessageNode {
    id: NodeId,
    pub role: Role,
    pub body: Element,
    /// Fragments living inside the tool's own injected UI. Never segmented.
    pub injected_ui: bool,
    turn_uid: Option<TurnUid>,
}

impl MessageNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The turn uid attached to this fragment, if one was assigned.
    pub fn turn_uid(&self) -> Option<TurnUid> {
        self.turn_uid
    }
}

/// Edit operations applied to a live document.
///
/// External feeders (transcript tailing, tests) request changes through
/// these instead of holding references into the tree.
#[derive(Debug, Clone)]
pub enum DocumentEdit {
    PushMessage { role: Role, body: Element },
    RemoveMessage(NodeId),
    ReplaceBody { id: NodeId, body: Element },
    SetLocation(String),
    AddStylesheet(MediaSource),
    Clear,
}

/// The live, continuously-mutating conversation document.
pub struct Document {
    origin: String,
    location: String,
    nodes: Vec<MessageNode>,
    stylesheets: Vec<MediaSource>,
    next_node_id: u64,
    revision: u64,
    revision_tx: watch::Sender<u64>,
}

impl Document {
    /// Creates an empty document with the given origin URL, which is also
    /// the initial location.
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        let (revision_tx, _) = watch::channel(0);
        Self {
            location: origin.clone(),
            origin,
            nodes: Vec::new(),
            stylesheets: Vec::new(),
            next_node_id: 0,
            revision: 0,
            revision_tx,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Navigates to a new location without touching the message stream.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    /// Subscribes to revision bumps. The value is the current revision.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision += 1;
        let _ = self.revision_tx.send(self.revision);
    }

    /// Appends a message fragment, returning its id.
    pub fn push_message(&mut self, role: Role, body: Element) -> NodeId {
        self.push_message_inner(role, body, false)
    }

    /// Appends a fragment belonging to the tool's own injected UI.
    pub fn push_injected_ui(&mut self, role: Role, body: Element) -> NodeId {
        self.push_message_inner(role, body, true)
    }

    fn push_message_inner(&mut self, role: Role, body: Element, injected_ui: bool) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.push(MessageNode {
            id,
            role,
            body,
            injected_ui,
            turn_uid: None,
        });
        self.bump();
        id
    }

    /// Removes a fragment (virtualized scroll-out). No-op for unknown ids.
    pub fn remove_message(&mut self, id: NodeId) {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        if self.nodes.len() != before {
            self.bump();
        }
    }

    /// Replaces a fragment's body in place (streamed message growth).
    pub fn replace_body(&mut self, id: NodeId, body: Element) {
        if let Some(i) = self.index_of(id) {
            self.nodes[i].body = body;
            self.bump();
        }
    }

    /// Removes every message fragment.
    pub fn clear(&mut self) {
        if !self.nodes.is_empty() {
            self.nodes.clear();
            self.bump();
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MessageNode> {
        self.nodes.iter()
    }

    // Nodes are appended with increasing ids and removals preserve
    // order, so id lookup can bisect.
    fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, |n| n.id).ok()
    }

    pub fn node(&self, id: NodeId) -> Option<&MessageNode> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    /// Deep-clones a fragment's element tree for offscreen render work.
    pub fn clone_body(&self, id: NodeId) -> Option<Element> {
        self.node(id).map(|n| n.body.clone())
    }

    /// Document-level stylesheets. These survive the stripped render tier,
    /// so a tainting stylesheet blocks both snapshot tiers.
    pub fn stylesheets(&self) -> &[MediaSource] {
        &self.stylesheets
    }

    pub fn add_stylesheet(&mut self, source: MediaSource) {
        self.stylesheets.push(source);
        self.bump();
    }

    /// Applies one edit operation.
    pub fn apply(&mut self, edit: DocumentEdit) {
        match edit {
            DocumentEdit::PushMessage { role, body } => {
                self.push_message(role, body);
            }
            DocumentEdit::RemoveMessage(id) => self.remove_message(id),
            DocumentEdit::ReplaceBody { id, body } => self.replace_body(id, body),
            DocumentEdit::SetLocation(location) => self.set_location(location),
            DocumentEdit::AddStylesheet(source) => self.add_stylesheet(source),
            DocumentEdit::Clear => self.clear(),
        }
    }

    /// Assigns a turn uid to a user fragment on first encounter.
    ///
    /// Idempotent: an already-assigned fragment keeps its uid. Attaching a
    /// uid is tool bookkeeping, not a document mutation, so the revision is
    /// left alone — otherwise every re-scan would schedule the next one.
    pub fn ensure_turn_uid(&mut self, id: NodeId) -> Option<TurnUid> {
        let i = self.index_of(id)?;
        let node = &mut self.nodes[i];
        if node.turn_uid.is_none() {
            node.turn_uid = Some(Uuid::new_v4());
        }
        node.turn_uid
    }
}
