// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Local state capture
//!
//! Flattens the bookmark tree into an ordered list (pre-order: parent before
//! children, children in tree order) and merges the live tab list with the
//! previously synced tabs of other devices. The pre-order guarantee is what
//! lets the reconciler usually finish in a single pass, but the reconciler
//! does not depend on it for correctness.

use crate::browser::BrowserHost;
use crate::error::Result;
use crate::models::{BookmarkNode, BookmarkTreeNode, SyncPayload, TabRecord};
use crate::store::LocalStore;
use chrono::Utc;

/// Flatten a bookmark tree, parent emitted before its children.
pub fn flatten_tree(root: &BookmarkTreeNode) -> Vec<BookmarkNode> {
    let mut flat = Vec::new();
    push_node(root, &mut flat);
    flat
}

fn push_node(node: &BookmarkTreeNode, flat: &mut Vec<BookmarkNode>) {
    flat.push(BookmarkNode {
        id: node.id.clone(),
        parent_id: node.parent_id.clone(),
        index: node.index,
        title: node.title.clone(),
        url: node.url.clone(),
        kind: node.kind,
        date_added: node.date_added,
        date_group_modified: node.date_group_modified,
    });
    for child in &node.children {
        push_node(child, flat);
    }
}

/// Capture the current local state as a sync payload.
///
/// Tabs previously synced for this device's own browser id are discarded;
/// the fresh local query supersedes them.
pub fn capture(host: &dyn BrowserHost, store: &LocalStore) -> Result<SyncPayload> {
    let browser_id = store.browser_id()?;
    let now = Utc::now();

    let mut tabs: Vec<TabRecord> = host
        .tabs()?
        .into_iter()
        .map(|t| TabRecord {
            id: t.id,
            window_id: t.window_id,
            index: t.index,
            url: t.url,
            title: t.title,
            active: t.active,
            pinned: t.pinned,
            discarded: t.discarded,
            browser_id: browser_id.clone(),
            last_updated: now,
        })
        .collect();

    let other_devices: Vec<TabRecord> = store
        .remote_tabs()?
        .into_iter()
        .filter(|t| t.browser_id != browser_id)
        .collect();

    log::debug!(
        "State captured: {} local tabs, {} tabs from other devices",
        tabs.len(),
        other_devices.len()
    );
    tabs.extend(other_devices);

    let bookmarks = flatten_tree(&host.bookmark_tree()?);

    Ok(SyncPayload { bookmarks, tabs })
}

// =============================================================================
// Tests
// =============================================================================
