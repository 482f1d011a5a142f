// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Bookmark tree reconciliation
//!
//! Merges a remote bookmark snapshot into the local tree. Remote node ids
//! mean nothing locally, so correlation is attribute-based: an id mapping
//! table (server id -> local id) is rebuilt every cycle and grows as items
//! are matched or created. Items whose parent has not materialized yet are
//! retried in later passes, which makes the merge tolerant of snapshots
//! where children precede their parents.
//!
//! Deletions are computed but only executed when explicitly enabled; a
//! remote snapshot is not provably complete, and removing local items it
//! lacks can destroy data.

use crate::browser::{BrowserHost, CreateProperties, ROOT_ID};
use crate::error::Result;
use crate::models::{BookmarkNode, NodeKind};
use crate::snapshot::flatten_tree;
use std::collections::{HashMap, HashSet};

const MAX_PASSES: usize = 5;

/// Reconciliation policy knobs.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Execute the computed deletion plan. Off by default: a partial remote
    /// snapshot must never delete unrelated local state.
    pub allow_deletions: bool,
    pub max_passes: usize,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            allow_deletions: false,
            max_passes: MAX_PASSES,
        }
    }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Server items resolved to a local node (matched or created)
    pub applied: usize,
    /// Server items never resolved within the pass limit
    pub unresolved: usize,
    pub created: usize,
    pub updated: usize,
    pub moved: usize,
    /// Local ids absent from the server snapshot
    pub planned_deletions: Vec<String>,
    /// Deletions actually executed (0 unless the policy enables them)
    pub deleted: usize,
}

/// Multi-pass structural merger of a remote snapshot into a local tree.
pub struct TreeReconciler<'a> {
    host: &'a mut dyn BrowserHost,
    policy: ReconcilePolicy,
}

impl<'a> TreeReconciler<'a> {
    pub fn new(host: &'a mut dyn BrowserHost) -> Self {
        Self {
            host,
            policy: ReconcilePolicy::default(),
        }
    }

    pub fn with_policy(host: &'a mut dyn BrowserHost, policy: ReconcilePolicy) -> Self {
        Self { host, policy }
    }

    /// Apply the remote bookmark list to the local tree.
    pub fn apply(&mut self, server_bookmarks: &[BookmarkNode]) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        // server id -> local id, valid for this cycle only
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut processed: HashSet<String> = HashSet::new();

        for pass in 1..=self.policy.max_passes {
            let mut progress = false;

            let local_flat = flatten_tree(&self.host.bookmark_tree()?);
            let mut local_by_id: HashMap<String, BookmarkNode> = local_flat
                .iter()
                .map(|n| (n.id.clone(), n.clone()))
                .collect();

            for server_item in server_bookmarks {
                if processed.contains(&server_item.id) {
                    continue;
                }

                // Roots always exist locally; map them straight through.
                if server_item.is_root() {
                    id_map.insert(server_item.id.clone(), ROOT_ID.to_string());
                    processed.insert(server_item.id.clone());
                    progress = true;
                    continue;
                }

                let server_parent = server_item.parent_id.as_deref().unwrap_or(ROOT_ID);
                let target_parent = id_map
                    .get(server_parent)
                    .cloned()
                    .unwrap_or_else(|| server_parent.to_string());

                if !local_by_id.contains_key(&target_parent) {
                    // Parent not materialized yet; retry next pass
                    log::debug!(
                        "Pass {}: deferring '{}' (parent {} not local yet)",
                        pass,
                        server_item.title,
                        target_parent
                    );
                    continue;
                }

                let local_item = self.find_local_match(
                    server_item,
                    &target_parent,
                    &local_by_id,
                    &id_map,
                    &processed,
                );

                match local_item {
                    Some(local) => {
                        id_map.insert(server_item.id.clone(), local.id.clone());

                        match self.converge_item(server_item, &local, &target_parent, &mut outcome)
                        {
                            Ok(changed) => {
                                if changed {
                                    progress = true;
                                }
                                if processed.insert(server_item.id.clone()) {
                                    progress = true;
                                }
                                // Keep the in-pass view current for later siblings
                                let entry = local_by_id.get_mut(&local.id).unwrap();
                                entry.title = server_item.title.clone();
                                if server_item.kind == NodeKind::Bookmark {
                                    entry.url = server_item.url.clone();
                                }
                                entry.parent_id = Some(target_parent.clone());
                                entry.index = server_item.index;
                            }
                            Err(e) => {
                                // Isolated failure: roll back this mapping, retry later
                                log::warn!(
                                    "Failed to update/move '{}' (local {}): {}",
                                    server_item.title,
                                    local.id,
                                    e
                                );
                                if id_map.get(&server_item.id) == Some(&local.id) {
                                    id_map.remove(&server_item.id);
                                }
                            }
                        }
                    }
                    None => {
                        let props = CreateProperties {
                            parent_id: target_parent.clone(),
                            index: server_item.index,
                            title: server_item.title.clone(),
                            kind: server_item.kind,
                            url: if server_item.kind == NodeKind::Bookmark {
                                server_item.url.clone()
                            } else {
                                None
                            },
                        };
                        match self.host.create_bookmark(&props) {
                            Ok(created) => {
                                log::debug!(
                                    "Created local node {} for server id {}",
                                    created.id,
                                    server_item.id
                                );
                                id_map.insert(server_item.id.clone(), created.id.clone());
                                local_by_id.insert(created.id.clone(), created);
                                processed.insert(server_item.id.clone());
                                outcome.created += 1;
                                progress = true;
                            }
                            Err(e) => {
                                log::warn!(
                                    "Failed to create node for server id {} ('{}'): {}",
                                    server_item.id,
                                    server_item.title,
                                    e
                                );
                            }
                        }
                    }
                }
            }

            if !progress {
                if processed.len() < server_bookmarks.len() {
                    log::warn!(
                        "Pass {} made no progress with {} items unprocessed, stopping",
                        pass,
                        server_bookmarks.len() - processed.len()
                    );
                }
                break;
            }
        }

        outcome.applied = processed.len();
        outcome.unresolved = server_bookmarks.len() - processed.len();
        if outcome.unresolved > 0 {
            log::warn!(
                "Reconciliation finished with {} unresolved server items",
                outcome.unresolved
            );
        }

        self.plan_and_maybe_delete(&id_map, &mut outcome)?;
        Ok(outcome)
    }

    /// Attribute search among the current children of the resolved parent.
    fn find_local_match(
        &self,
        server_item: &BookmarkNode,
        target_parent: &str,
        local_by_id: &HashMap<String, BookmarkNode>,
        id_map: &HashMap<String, String>,
        processed: &HashSet<String>,
    ) -> Option<BookmarkNode> {
        // Previously mapped and still present wins outright
        if let Some(mapped) = id_map.get(&server_item.id) {
            if let Some(local) = local_by_id.get(mapped) {
                return Some(local.clone());
            }
        }

        let mut siblings: Vec<&BookmarkNode> = local_by_id
            .values()
            .filter(|item| item.parent_id.as_deref() == Some(target_parent))
            .collect();
        siblings.sort_by_key(|item| item.index);

        let candidate = siblings.into_iter().find(|item| {
            if item.kind != server_item.kind {
                return false;
            }
            match item.kind {
                NodeKind::Bookmark => {
                    item.title == server_item.title && item.url == server_item.url
                }
                NodeKind::Folder => item.title == server_item.title,
                NodeKind::Separator => item.index == server_item.index,
            }
        })?;

        // Disambiguation guard: a local node already claimed by a different,
        // already-processed server item is not a valid match.
        let claimed_by_other = id_map.iter().any(|(server_id, local_id)| {
            local_id == &candidate.id && server_id != &server_item.id && processed.contains(server_id)
        });
        if claimed_by_other {
            log::warn!(
                "Local node {} ('{}') already claimed by another server item, not matching",
                candidate.id,
                candidate.title
            );
            return None;
        }

        Some(candidate.clone())
    }

    /// Bring a matched local node in line with the server item.
    /// Returns whether any mutation was performed.
    fn converge_item(
        &mut self,
        server_item: &BookmarkNode,
        local: &BookmarkNode,
        target_parent: &str,
        outcome: &mut ReconcileOutcome,
    ) -> Result<bool> {
        let mut changed = false;

        if local.index != server_item.index || local.parent_id.as_deref() != Some(target_parent) {
            self.host
                .move_bookmark(&local.id, target_parent, server_item.index)?;
            outcome.moved += 1;
            changed = true;
        }

        let new_title = (local.title != server_item.title).then_some(server_item.title.as_str());
        let new_url = if server_item.kind == NodeKind::Bookmark && local.url != server_item.url {
            server_item.url.as_deref()
        } else {
            None
        };
        if new_title.is_some() || new_url.is_some() {
            self.host.update_bookmark(&local.id, new_title, new_url)?;
            outcome.updated += 1;
            changed = true;
        }

        Ok(changed)
    }

    /// Compute local ids with no counterpart in the server snapshot, and
    /// execute removals only when the policy allows it.
    fn plan_and_maybe_delete(
        &mut self,
        id_map: &HashMap<String, String>,
        outcome: &mut ReconcileOutcome,
    ) -> Result<()> {
        let claimed: HashSet<&String> = id_map.values().collect();
        let local_flat = flatten_tree(&self.host.bookmark_tree()?);

        outcome.planned_deletions = local_flat
            .iter()
            .filter(|n| !n.is_root() && !claimed.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();

        if outcome.planned_deletions.is_empty() {
            return Ok(());
        }

        if !self.policy.allow_deletions {
            log::info!(
                "{} local items absent from server snapshot (deletion disabled)",
                outcome.planned_deletions.len()
            );
            return Ok(());
        }

        for id in outcome.planned_deletions.clone() {
            // Subtree removals may have already taken a descendant with them
            match self.host.remove_bookmark(&id) {
                Ok(()) => outcome.deleted += 1,
                Err(e) => log::warn!("Failed to delete local item {}: {}", id, e),
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MemoryHost;

    fn server_node(
        id: &str,
        parent: Option<&str>,
        index: usize,
        title: &str,
        kind: NodeKind,
        url: Option<&str>,
    ) -> BookmarkNode {
        BookmarkNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            index,
            title: title.to_string(),
            url: url.map(str::to_string),
            kind,
            date_added: None,
            date_group_modified: None,
        }
    }

    /// A remote snapshot: root -> folder "Dev" -> bookmark "Rust"
    fn sample_snapshot() -> Vec<BookmarkNode> {
        vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node("s1", Some("s0"), 0, "Dev", NodeKind::Folder, None),
            server_node(
                "s2",
                Some("s1"),
                0,
                "Rust",
                NodeKind::Bookmark,
                Some("https://www.rust-lang.org/"),
            ),
        ]
    }

    #[test]
    fn test_creates_full_tree() {
        let mut host = MemoryHost::new();
        let outcome = TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();

        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.unresolved, 0);
        assert_eq!(outcome.created, 2);

        let tree = host.bookmark_tree().unwrap();
        assert_eq!(tree.children[0].title, "Dev");
        assert_eq!(tree.children[0].children[0].title, "Rust");
    }

    #[test]
    fn test_idempotent_on_reapply() {
        let mut host = MemoryHost::new();
        TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();
        let before = host.node_count();

        let outcome = TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();

        assert_eq!(host.node_count(), before);
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.moved, 0);
        assert_eq!(outcome.unresolved, 0);
    }

    #[test]
    fn test_child_before_parent_resolves_within_pass_limit() {
        let mut snapshot = sample_snapshot();
        snapshot.reverse(); // bookmark first, root last

        let mut host = MemoryHost::new();
        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();

        assert_eq!(outcome.unresolved, 0);
        let tree = host.bookmark_tree().unwrap();
        assert_eq!(tree.children[0].children[0].title, "Rust");
    }

    #[test]
    fn test_rename_and_retarget() {
        let mut host = MemoryHost::new();
        TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();

        // Same structure, bookmark renamed and retargeted. The folder still
        // matches by title, so the bookmark inside is created anew (its
        // attributes no longer match) while the old one is only planned for
        // deletion.
        let mut snapshot = sample_snapshot();
        snapshot[2].title = "Rust Homepage".to_string();

        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();
        assert_eq!(outcome.unresolved, 0);
        assert_eq!(outcome.planned_deletions.len(), 1);
        assert_eq!(outcome.deleted, 0);
    }

    #[test]
    fn test_index_change_moves_node() {
        let mut host = MemoryHost::new();
        let mut snapshot = vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node(
                "sa",
                Some("s0"),
                0,
                "A",
                NodeKind::Bookmark,
                Some("https://a.example/"),
            ),
            server_node(
                "sb",
                Some("s0"),
                1,
                "B",
                NodeKind::Bookmark,
                Some("https://b.example/"),
            ),
        ];
        TreeReconciler::new(&mut host).apply(&snapshot).unwrap();

        // Swap order remotely
        snapshot[1].index = 1;
        snapshot[2].index = 0;
        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();
        assert!(outcome.moved >= 1);

        let tree = host.bookmark_tree().unwrap();
        let titles: Vec<_> = tree.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_duplicate_titles_disambiguated() {
        // Two remote folders with the same title under root: the second must
        // not claim the node matched by the first.
        let snapshot = vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node("s1", Some("s0"), 0, "News", NodeKind::Folder, None),
            server_node("s2", Some("s0"), 1, "News", NodeKind::Folder, None),
        ];

        let mut host = MemoryHost::new();
        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();
        assert_eq!(outcome.unresolved, 0);

        let tree = host.bookmark_tree().unwrap();
        assert_eq!(tree.children.len(), 2);
    }

    #[test]
    fn test_deletion_disabled_by_default() {
        let mut host = MemoryHost::new();
        TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();

        // Remote snapshot without the bookmark
        let snapshot = vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node("s1", Some("s0"), 0, "Dev", NodeKind::Folder, None),
        ];
        let before = host.node_count();
        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();

        assert_eq!(outcome.planned_deletions.len(), 1);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(host.node_count(), before);
    }

    #[test]
    fn test_deletion_executed_when_enabled() {
        let mut host = MemoryHost::new();
        TreeReconciler::new(&mut host)
            .apply(&sample_snapshot())
            .unwrap();

        let snapshot = vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node("s1", Some("s0"), 0, "Dev", NodeKind::Folder, None),
        ];
        let policy = ReconcilePolicy {
            allow_deletions: true,
            ..Default::default()
        };
        let outcome = TreeReconciler::with_policy(&mut host, policy)
            .apply(&snapshot)
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        let tree = host.bookmark_tree().unwrap();
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn test_separator_matched_by_index() {
        let snapshot = vec![
            server_node("s0", None, 0, "", NodeKind::Folder, None),
            server_node(
                "sa",
                Some("s0"),
                0,
                "A",
                NodeKind::Bookmark,
                Some("https://a.example/"),
            ),
            server_node("sep", Some("s0"), 1, "", NodeKind::Separator, None),
        ];

        let mut host = MemoryHost::new();
        TreeReconciler::new(&mut host).apply(&snapshot).unwrap();
        let before = host.node_count();

        let outcome = TreeReconciler::new(&mut host).apply(&snapshot).unwrap();
        assert_eq!(outcome.created, 0);
        assert_eq!(host.node_count(), before);
    }
}
