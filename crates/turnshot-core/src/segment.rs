//! Turn segmentation over the message stream.
//!
//! A turn is one user fragment plus every immediately following
//! non-user fragment, up to the next user fragment or end of stream.
//! User fragments with no replies are never materialized.

use crate::document::{Document, NodeId, TurnUid};

/// One segmented turn. Fragments are referenced by id; the document
/// resolves them when a clone is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub uid: TurnUid,
    pub user: NodeId,
    pub assistant: Vec<NodeId>,
}

/// Scans the document and groups message fragments into ordered turns.
///
/// Fragments inside the tool's own injected UI are excluded up front.
/// Each emitted turn's user fragment gets a uid on first encounter;
/// re-running on an unchanged document yields identical uids in the
/// same order. An empty document yields an empty list.
pub fn segment(doc: &mut Document) -> Vec<Turn> {
    let stream: Vec<(NodeId, bool)> = doc
        .nodes()
        .filter(|n| !n.injected_ui)
        .map(|n| (n.id(), n.role.is_user()))
        .collect();

    let mut turns = Vec::new();
    let mut i = 0;

    while i < stream.len() {
        let (id, is_user) = stream[i];
        if !is_user {
            i += 1;
            continue;
        }

        let mut assistant = Vec::new();
        i += 1;
        while i < stream.len() && !stream[i].1 {
            assistant.push(stream[i].0);
            i += 1;
        }

        if !assistant.is_empty() {
            // Unreachable fallback: `id` came from the scan above.
            let Some(uid) = doc.ensure_turn_uid(id) else {
                continue;
            };
            turns.push(Turn {
                uid,
                user: id,
                assistant,
            });
        }
    }

    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Element, Role};

    fn doc_with(roles: &[&str]) -> Document {
        let mut doc = Document::new("https://chat.example.com/c/1");
        for (i, role) in roles.iter().enumerate() {
            doc.push_message(Role::parse(role), Element::text(format!("msg {i}")));
        }
        doc
    }

    #[test]
    fn pairs_user_with_following_reply_group() {
        let mut doc = doc_with(&["user", "assistant", "assistant", "user", "assistant"]);
        let turns = segment(&mut doc);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].assistant.len(), 2);
        assert_eq!(turns[1].assistant.len(), 1);
    }

    #[test]
    fn trailing_user_without_reply_is_not_a_turn() {
        let mut doc = doc_with(&["user", "assistant", "user"]);
        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn consecutive_user_fragments_drop_the_unanswered_one() {
        let mut doc = doc_with(&["user", "user", "assistant"]);
        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 1);

        let user_id = turns[0].user;
        let second_user = doc.nodes().nth(1).unwrap().id();
        assert_eq!(user_id, second_user);
    }

    #[test]
    fn other_roles_join_the_assistant_group() {
        let mut doc = doc_with(&["user", "tool", "assistant"]);
        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].assistant.len(), 2);
    }

    #[test]
    fn leading_assistant_fragments_are_skipped() {
        let mut doc = doc_with(&["assistant", "user", "assistant"]);
        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn segmenting_twice_yields_identical_uids_in_order() {
        let mut doc = doc_with(&["user", "assistant", "user", "assistant"]);
        let first: Vec<_> = segment(&mut doc).into_iter().map(|t| t.uid).collect();
        let second: Vec<_> = segment(&mut doc).into_iter().map(|t| t.uid).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn uid_survives_unrelated_mutation() {
        let mut doc = doc_with(&["user", "assistant"]);
        let before = segment(&mut doc)[0].uid;

        doc.push_message(Role::User, Element::text("new question"));
        doc.push_message(Role::Assistant, Element::text("new answer"));

        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].uid, before);
    }

    #[test]
    fn injected_ui_fragments_are_excluded() {
        let mut doc = Document::new("https://chat.example.com/c/1");
        doc.push_message(Role::User, Element::text("question"));
        doc.push_injected_ui(Role::User, Element::text("panel widget"));
        doc.push_message(Role::Assistant, Element::text("answer"));

        let turns = segment(&mut doc);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].assistant.len(), 1);
    }

    #[test]
    fn empty_document_yields_empty_list() {
        let mut doc = Document::new("https://chat.example.com/c/1");
        assert!(segment(&mut doc).is_empty());
    }
}
