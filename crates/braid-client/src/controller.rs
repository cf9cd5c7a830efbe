//! Per-view chat state and reconciliation against the persisted store.
//!
//! The controller is a pure state machine: network and store traffic happen
//! elsewhere, and the owning view feeds results in through the methods here.
//! Its one job is deciding, at every moment, which message list the view
//! renders: the locally tracked one while a submission or stream is in
//! flight, the persisted one once the store has caught up.

use braid_persist::{Message, MessagePart, Thread};

use crate::tree::{BranchSelections, MessageTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Ready,
    Submitted,
    Streaming,
    Error,
}

pub struct ChatViewController {
    session_id: String,
    status: ChatStatus,
    local_messages: Vec<Message>,
    optimistic: Option<String>,
    selections: BranchSelections,
    tree: MessageTree,
    list_version: u64,
    /// Local message count when the last stream started; the persisted list
    /// must reach this many non-generating entries before it is adopted.
    stream_snapshot: usize,
    /// Parent whose newest sibling should become selected once the current
    /// regeneration reaches a terminal status.
    pending_regeneration: Option<Option<String>>,
}

impl ChatViewController {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: ChatStatus::Ready,
            local_messages: Vec::new(),
            optimistic: None,
            selections: BranchSelections::new(),
            tree: MessageTree::empty(),
            list_version: 0,
            stream_snapshot: 0,
            pending_regeneration: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    /// The message list the view renders right now.
    pub fn visible_messages(&self) -> &[Message] {
        &self.local_messages
    }

    pub fn selections(&self) -> &BranchSelections {
        &self.selections
    }

    pub fn tree(&self) -> &MessageTree {
        &self.tree
    }

    /// A new user message was submitted. `message` is the optimistic render
    /// of it, already carrying its reserved signed id.
    pub fn begin_submit(&mut self, message: Message) {
        self.optimistic = Some(message.id.clone());
        self.local_messages.push(message);
        self.status = ChatStatus::Submitted;
    }

    /// An edit of an existing user message was submitted. The new sibling
    /// becomes the visible branch at its parent immediately, before the
    /// server has seen anything.
    pub fn begin_edit(&mut self, edited: Message) {
        let parent = edited.parent_id.clone();
        let new_index = self.tree.siblings(parent.as_deref()).len();
        self.selections.insert(parent, new_index);

        // The edited branch replaces everything at and below its level.
        self.truncate_local_at_depth(edited.depth);
        self.optimistic = Some(edited.id.clone());
        self.local_messages.push(edited);
        self.status = ChatStatus::Submitted;
    }

    /// A regeneration of the assistant message under `parent_id` was
    /// requested. Selection does not move yet; it switches to the new
    /// sibling only once the request reaches a terminal status, so the
    /// view never points at an empty placeholder branch.
    pub fn begin_regenerate(&mut self, parent_id: Option<&str>) {
        self.pending_regeneration = Some(parent_id.map(str::to_string));
        self.truncate_local_at_depth(
            self.tree
                .siblings(parent_id)
                .first()
                .map(|m| m.depth)
                .unwrap_or(0),
        );
        self.status = ChatStatus::Submitted;
    }

    /// The completion stream opened; `placeholder` is the generating
    /// assistant message. The optimistic user message stays pending until
    /// the store confirms it, not until the stream opens.
    pub fn stream_started(&mut self, placeholder: Message) {
        self.local_messages.push(placeholder);
        self.stream_snapshot = self.local_messages.len();
        self.status = ChatStatus::Streaming;
    }

    /// Append streamed content to the generating assistant message.
    pub fn append_token(&mut self, content: &str) {
        if let Some(last) = self.local_messages.last_mut() {
            match last.parts.last_mut() {
                Some(MessagePart::Text { text }) => text.push_str(content),
                _ => last.parts.push(MessagePart::Text {
                    text: content.to_string(),
                }),
            }
        }
    }

    pub fn stream_finished(&mut self) {
        self.status = ChatStatus::Ready;
    }

    pub fn stream_failed(&mut self) {
        self.status = ChatStatus::Error;
    }

    /// Feed the persisted message list in. Returns true when the local list
    /// was replaced by it.
    ///
    /// While streaming, submitted, or holding an optimistic message the
    /// local list stays authoritative, whatever the store says. Once idle,
    /// the persisted list is adopted only after its settled portion has
    /// caught up with what this view already rendered; a lagging query
    /// must not revert the display.
    pub fn reconcile(&mut self, persisted: &[Message]) -> bool {
        let mid_flight = matches!(self.status, ChatStatus::Submitted | ChatStatus::Streaming);
        if mid_flight || self.optimistic.is_some() {
            return false;
        }
        let settled = persisted.iter().filter(|m| !m.is_generating()).count();
        if settled < self.stream_snapshot {
            return false;
        }

        self.list_version += 1;
        self.tree = MessageTree::build(persisted, self.list_version);
        if let Some(parent) = self.pending_regeneration.take() {
            let count = self.tree.siblings(parent.as_deref()).len();
            if count > 0 {
                self.selections.insert(parent, count - 1);
            }
        }
        self.local_messages = self
            .tree
            .visible_path(&self.selections)
            .into_iter()
            .cloned()
            .collect();
        self.stream_snapshot = self.local_messages.len();
        true
    }

    /// The store finalized the message this view was optimistic about.
    pub fn optimistic_confirmed(&mut self, message_id: &str) {
        if self.optimistic.as_deref() == Some(message_id) {
            self.optimistic = None;
        }
    }

    /// Whether this view should transparently attach to the thread's active
    /// stream: one exists, it was started by a different client session (or
    /// this one before a reload), and the view is not itself mid-submission.
    pub fn should_resume(&self, thread: &Thread) -> Option<String> {
        if matches!(self.status, ChatStatus::Submitted | ChatStatus::Streaming) {
            return None;
        }
        let active = thread.active_stream.as_ref()?;
        if active.client_id.as_deref() == Some(self.session_id.as_str()) {
            return None;
        }
        Some(active.stream_id.clone())
    }

    pub fn select_prev(&mut self, parent_id: Option<&str>) {
        self.tree.select_prev(&mut self.selections, parent_id);
        self.refresh_local_from_tree();
    }

    pub fn select_next(&mut self, parent_id: Option<&str>) {
        self.tree.select_next(&mut self.selections, parent_id);
        self.refresh_local_from_tree();
    }

    fn refresh_local_from_tree(&mut self) {
        if matches!(self.status, ChatStatus::Submitted | ChatStatus::Streaming) {
            return;
        }
        self.local_messages = self
            .tree
            .visible_path(&self.selections)
            .into_iter()
            .cloned()
            .collect();
    }

    fn truncate_local_at_depth(&mut self, depth: u32) {
        self.local_messages.retain(|m| m.depth < depth);
    }
}
