//! Message tree reconstruction and branch selection.
//!
//! A thread's messages arrive as a flat list; parent pointers and sibling
//! indices carry the tree shape. The tree is an adjacency map built once per
//! list version and queried per interaction, so renders do not pay the
//! reconstruction cost. A branch selection maps a parent id to the index of
//! the sibling shown under it; an absent entry always means "most recent".

use std::collections::HashMap;

use braid_persist::Message;

/// Per-parent branch choice. The `None` key selects among root messages.
pub type BranchSelections = HashMap<Option<String>, usize>;

pub struct MessageTree {
    version: u64,
    children: HashMap<Option<String>, Vec<Message>>,
}

fn parent_key(parent_id: Option<&str>) -> Option<String> {
    parent_id.map(str::to_string)
}

impl MessageTree {
    /// Group by parent, order siblings by sibling index. `version` is the
    /// identity of the underlying list; callers rebuild only when it moves.
    pub fn build(messages: &[Message], version: u64) -> Self {
        let mut children: HashMap<Option<String>, Vec<Message>> = HashMap::new();
        for message in messages {
            children
                .entry(message.parent_id.clone())
                .or_default()
                .push(message.clone());
        }
        for group in children.values_mut() {
            group.sort_by_key(|m| m.sibling_index);
        }
        Self { version, children }
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            children: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Direct children of `parent_id`, ordered by sibling index.
    pub fn siblings(&self, parent_id: Option<&str>) -> &[Message] {
        self.children
            .get(&parent_key(parent_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a branch selector should be shown at this parent. A single
    /// child is still a sibling group, but never an affordance.
    pub fn has_branches(&self, parent_id: Option<&str>) -> bool {
        self.siblings(parent_id).len() > 1
    }

    /// "Latest branch everywhere": walk from the root picking the highest
    /// sibling index at every level.
    pub fn default_selections(&self) -> BranchSelections {
        let mut selections = BranchSelections::new();
        let mut parent: Option<String> = None;
        loop {
            let group = match self.children.get(&parent) {
                Some(group) if !group.is_empty() => group,
                _ => break,
            };
            let index = group.len() - 1;
            selections.insert(parent.clone(), index);
            parent = Some(group[index].id.clone());
        }
        selections
    }

    /// The linear path currently visible given `selections`. A missing or
    /// out-of-range selection falls back to the last sibling; this never
    /// fails.
    pub fn visible_path<'a>(&'a self, selections: &BranchSelections) -> Vec<&'a Message> {
        let mut path = Vec::new();
        let mut parent: Option<String> = None;
        loop {
            let group = match self.children.get(&parent) {
                Some(group) if !group.is_empty() => group,
                _ => break,
            };
            let index = selections
                .get(&parent)
                .copied()
                .unwrap_or(group.len() - 1)
                .min(group.len() - 1);
            let message = &group[index];
            path.push(message);
            parent = Some(message.id.clone());
        }
        path
    }

    /// Index of the sibling selected at `parent_id` under `selections`.
    pub fn selected_index(&self, selections: &BranchSelections, parent_id: Option<&str>) -> usize {
        let group = self.siblings(parent_id);
        if group.is_empty() {
            return 0;
        }
        selections
            .get(&parent_key(parent_id))
            .copied()
            .unwrap_or(group.len() - 1)
            .min(group.len() - 1)
    }

    /// Move to the previous sibling at `parent_id`. Already at the first
    /// one is a no-op.
    pub fn select_prev(&self, selections: &mut BranchSelections, parent_id: Option<&str>) {
        let current = self.selected_index(selections, parent_id);
        if current > 0 {
            selections.insert(parent_key(parent_id), current - 1);
        }
    }

    /// Move to the next sibling at `parent_id`. Already at the last one is
    /// a no-op.
    pub fn select_next(&self, selections: &mut BranchSelections, parent_id: Option<&str>) {
        let group = self.siblings(parent_id);
        if group.is_empty() {
            return;
        }
        let current = self.selected_index(selections, parent_id);
        if current + 1 < group.len() {
            selections.insert(parent_key(parent_id), current + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_persist::{MessagePart, MessageRole, MessageStatus, Provenance};
    use chrono::Utc;

    fn message(id: &str, parent: Option<&str>, depth: u32, sibling_index: u32) -> Message {
        Message {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            parent_id: parent.map(str::to_string),
            role: if depth % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            parts: MessagePart::normalize(id),
            status: MessageStatus::Completed,
            depth,
            sibling_index,
            provenance: Provenance::Original,
            model: None,
            usage: None,
            timing: None,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
        }
    }

    /// u0 ─ a0 ─ u1 ─ (a1, a2)   with a2 the regenerated sibling of a1.
    fn branched_tree() -> MessageTree {
        MessageTree::build(
            &[
                message("u0", None, 0, 0),
                message("a0", Some("u0"), 1, 0),
                message("u1", Some("a0"), 2, 0),
                message("a1", Some("u1"), 3, 0),
                message("a2", Some("u1"), 3, 1),
            ],
            1,
        )
    }

    #[test]
    fn test_siblings_ordered_by_index() {
        let tree = branched_tree();
        let siblings: Vec<&str> = tree
            .siblings(Some("u1"))
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(siblings, vec!["a1", "a2"]);
        assert!(tree.siblings(Some("a2")).is_empty());
    }

    #[test]
    fn test_default_selections_pick_last_sibling_everywhere() {
        let tree = branched_tree();
        let selections = tree.default_selections();

        for (parent, index) in &selections {
            let group = tree.siblings(parent.as_deref());
            assert_eq!(*index, group.len() - 1, "parent {parent:?}");
        }

        let path: Vec<&str> = tree
            .visible_path(&selections)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(path, vec!["u0", "a0", "u1", "a2"]);
    }

    #[test]
    fn test_visible_path_with_explicit_selection() {
        let tree = branched_tree();
        let mut selections = BranchSelections::new();
        selections.insert(Some("u1".to_string()), 0);

        let path: Vec<&str> = tree
            .visible_path(&selections)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(path, vec!["u0", "a0", "u1", "a1"]);
    }

    #[test]
    fn test_missing_selection_means_most_recent() {
        let tree = branched_tree();
        let path = tree.visible_path(&BranchSelections::new());
        assert_eq!(path.last().unwrap().id, "a2");
    }

    #[test]
    fn test_out_of_range_selection_clamps() {
        let tree = branched_tree();
        let mut selections = BranchSelections::new();
        selections.insert(Some("u1".to_string()), 99);
        let path = tree.visible_path(&selections);
        assert_eq!(path.last().unwrap().id, "a2");
    }

    #[test]
    fn test_navigation_clamps_at_edges() {
        let tree = branched_tree();
        let mut selections = BranchSelections::new();

        // Default is the last sibling (index 1); next is a no-op there.
        tree.select_next(&mut selections, Some("u1"));
        assert_eq!(tree.selected_index(&selections, Some("u1")), 1);

        tree.select_prev(&mut selections, Some("u1"));
        assert_eq!(tree.selected_index(&selections, Some("u1")), 0);

        // At the first sibling; prev is a no-op.
        tree.select_prev(&mut selections, Some("u1"));
        assert_eq!(tree.selected_index(&selections, Some("u1")), 0);

        tree.select_next(&mut selections, Some("u1"));
        assert_eq!(tree.selected_index(&selections, Some("u1")), 1);
    }

    #[test]
    fn test_single_child_has_no_branch_affordance() {
        let tree = branched_tree();
        assert!(!tree.has_branches(None));
        assert!(!tree.has_branches(Some("u0")));
        assert!(tree.has_branches(Some("u1")));
        // Still recorded as a (single-element) sibling group.
        assert_eq!(tree.siblings(Some("u0")).len(), 1);
    }

    #[test]
    fn test_depth_matches_parent_chain() {
        let tree = branched_tree();
        let path = tree.visible_path(&BranchSelections::new());
        for (expected_depth, message) in path.iter().enumerate() {
            assert_eq!(message.depth as usize, expected_depth);
            assert_eq!(message.parent_id.is_none(), message.depth == 0);
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = MessageTree::empty();
        assert!(tree.visible_path(&BranchSelections::new()).is_empty());
        assert!(tree.default_selections().is_empty());
    }
}
