// Copyright (c) 2024-2026 Marksync contributors
// SPDX-License-Identifier: AGPL-3.0-only
//! Browser host capability
//!
//! The host's native bookmark/tab primitives are consumed through the
//! `BrowserHost` trait so the orchestrator and reconciler can be exercised
//! against fakes. Two implementations ship with the crate:
//!
//! - `MemoryHost` is an in-memory tree, used by tests
//! - `ProfileHost` reads and writes JSON files in a profile directory,
//!   used by the CLI

use crate::error::{Result, SyncError};
use crate::models::{BookmarkNode, BookmarkTreeNode, NodeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Identifier of the synthetic tree root. The root always exists and is
/// never created, moved, or removed.
pub const ROOT_ID: &str = "root";

/// A tab as reported by the host, before it is tagged with a device id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTab {
    pub id: u64,
    pub window_id: u64,
    pub index: usize,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub discarded: bool,
}

/// Properties for creating a bookmark node.
#[derive(Debug, Clone)]
pub struct CreateProperties {
    pub parent_id: String,
    pub index: usize,
    pub title: String,
    pub kind: NodeKind,
    pub url: Option<String>,
}

/// Host capability: read and mutate the bookmark tree, list and open tabs.
pub trait BrowserHost {
    fn bookmark_tree(&self) -> Result<BookmarkTreeNode>;
    fn create_bookmark(&mut self, props: &CreateProperties) -> Result<BookmarkNode>;
    /// Update title and/or url of an existing node.
    fn update_bookmark(&mut self, id: &str, title: Option<&str>, url: Option<&str>) -> Result<()>;
    fn move_bookmark(&mut self, id: &str, parent_id: &str, index: usize) -> Result<()>;
    fn remove_bookmark(&mut self, id: &str) -> Result<()>;
    fn tabs(&self) -> Result<Vec<HostTab>>;
    fn open_tab(&mut self, url: &str) -> Result<HostTab>;

    /// Re-read host state from its backing source, if it has one. Hosts
    /// without external backing keep this a no-op.
    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// In-memory Host
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemNode {
    id: String,
    title: String,
    kind: NodeKind,
    url: Option<String>,
    date_added: Option<DateTime<Utc>>,
}

/// In-memory bookmark tree and tab list.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    nodes: HashMap<String, MemNode>,
    /// Ordered children per folder id
    children: HashMap<String, Vec<String>>,
    tabs: Vec<HostTab>,
    next_id: u64,
    next_tab_id: u64,
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            MemNode {
                id: ROOT_ID.to_string(),
                title: String::new(),
                kind: NodeKind::Folder,
                url: None,
                date_added: None,
            },
        );
        let mut children = HashMap::new();
        children.insert(ROOT_ID.to_string(), Vec::new());
        Self {
            nodes,
            children,
            tabs: Vec::new(),
            next_id: 1,
            next_tab_id: 1,
        }
    }

    /// A tree with the usual top-level folders browsers ship with.
    pub fn with_standard_folders() -> Self {
        let mut host = Self::new();
        for title in ["Bookmarks Toolbar", "Other Bookmarks"] {
            host.create_bookmark(&CreateProperties {
                parent_id: ROOT_ID.to_string(),
                index: usize::MAX,
                title: title.to_string(),
                kind: NodeKind::Folder,
                url: None,
            })
            .expect("root folder creation cannot fail");
        }
        host
    }

    pub fn set_tabs(&mut self, tabs: Vec<HostTab>) {
        self.tabs = tabs;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn parent_of(&self, id: &str) -> Option<String> {
        self.children
            .iter()
            .find(|(_, kids)| kids.iter().any(|k| k == id))
            .map(|(parent, _)| parent.clone())
    }

    fn build_tree(&self, id: &str, parent_id: Option<String>, index: usize) -> BookmarkTreeNode {
        let node = &self.nodes[id];
        let children = self
            .children
            .get(id)
            .map(|kids| {
                kids.iter()
                    .enumerate()
                    .map(|(i, kid)| self.build_tree(kid, Some(id.to_string()), i))
                    .collect()
            })
            .unwrap_or_default();
        BookmarkTreeNode {
            id: node.id.clone(),
            parent_id,
            index,
            title: node.title.clone(),
            url: node.url.clone(),
            kind: node.kind,
            date_added: node.date_added,
            date_group_modified: None,
            children,
        }
    }

    fn remove_subtree(&mut self, id: &str) {
        if let Some(kids) = self.children.remove(id) {
            for kid in kids {
                self.remove_subtree(&kid);
            }
        }
        self.nodes.remove(id);
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserHost for MemoryHost {
    fn bookmark_tree(&self) -> Result<BookmarkTreeNode> {
        Ok(self.build_tree(ROOT_ID, None, 0))
    }

    fn create_bookmark(&mut self, props: &CreateProperties) -> Result<BookmarkNode> {
        if !matches!(
            self.nodes.get(&props.parent_id).map(|n| n.kind),
            Some(NodeKind::Folder)
        ) {
            return Err(SyncError::Host(format!(
                "Parent {} is not a folder",
                props.parent_id
            )));
        }
        let id = self.next_id.to_string();
        self.next_id += 1;

        self.nodes.insert(
            id.clone(),
            MemNode {
                id: id.clone(),
                title: props.title.clone(),
                kind: props.kind,
                url: props.url.clone(),
                date_added: Some(Utc::now()),
            },
        );
        if props.kind == NodeKind::Folder {
            self.children.insert(id.clone(), Vec::new());
        }
        let siblings = self.children.get_mut(&props.parent_id).unwrap();
        let index = props.index.min(siblings.len());
        siblings.insert(index, id.clone());

        Ok(BookmarkNode {
            id,
            parent_id: Some(props.parent_id.clone()),
            index,
            title: props.title.clone(),
            url: props.url.clone(),
            kind: props.kind,
            date_added: Some(Utc::now()),
            date_group_modified: None,
        })
    }

    fn update_bookmark(&mut self, id: &str, title: Option<&str>, url: Option<&str>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| SyncError::Host(format!("No such bookmark: {}", id)))?;
        if let Some(title) = title {
            node.title = title.to_string();
        }
        if let Some(url) = url {
            if node.kind != NodeKind::Bookmark {
                return Err(SyncError::Host(format!("Cannot set url on {:?}", node.kind)));
            }
            node.url = Some(url.to_string());
        }
        Ok(())
    }

    fn move_bookmark(&mut self, id: &str, parent_id: &str, index: usize) -> Result<()> {
        if id == ROOT_ID {
            return Err(SyncError::Host("Cannot move the root".to_string()));
        }
        if !self.nodes.contains_key(id) {
            return Err(SyncError::Host(format!("No such bookmark: {}", id)));
        }
        if !self.children.contains_key(parent_id) {
            return Err(SyncError::Host(format!("No such folder: {}", parent_id)));
        }
        let old_parent = self
            .parent_of(id)
            .ok_or_else(|| SyncError::Host(format!("Orphaned bookmark: {}", id)))?;
        let old_siblings = self.children.get_mut(&old_parent).unwrap();
        old_siblings.retain(|k| k != id);

        let siblings = self.children.get_mut(parent_id).unwrap();
        let index = index.min(siblings.len());
        siblings.insert(index, id.to_string());
        Ok(())
    }

    fn remove_bookmark(&mut self, id: &str) -> Result<()> {
        if id == ROOT_ID {
            return Err(SyncError::Host("Cannot remove the root".to_string()));
        }
        if !self.nodes.contains_key(id) {
            return Err(SyncError::Host(format!("No such bookmark: {}", id)));
        }
        if let Some(parent) = self.parent_of(id) {
            self.children.get_mut(&parent).unwrap().retain(|k| k != id);
        }
        self.remove_subtree(id);
        Ok(())
    }

    fn tabs(&self) -> Result<Vec<HostTab>> {
        Ok(self.tabs.clone())
    }

    fn open_tab(&mut self, url: &str) -> Result<HostTab> {
        let tab = HostTab {
            id: self.next_tab_id,
            window_id: 1,
            index: self.tabs.len(),
            url: url.to_string(),
            title: url.to_string(),
            active: true,
            pinned: false,
            discarded: false,
        };
        self.next_tab_id += 1;
        self.tabs.push(tab.clone());
        Ok(tab)
    }
}

// =============================================================================
// JSON Profile Host
// =============================================================================

const BOOKMARKS_FILE: &str = "bookmarks.json";
const TABS_FILE: &str = "tabs.json";

/// File-backed host: a profile directory with `bookmarks.json` and
/// `tabs.json`. Every mutation is written through to disk.
pub struct ProfileHost {
    dir: PathBuf,
    inner: MemoryHost,
}

impl ProfileHost {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let bookmarks_path = dir.join(BOOKMARKS_FILE);
        let inner = if bookmarks_path.exists() {
            let content = std::fs::read_to_string(&bookmarks_path)?;
            let tree: BookmarkTreeNode = serde_json::from_str(&content)
                .map_err(|e| SyncError::InvalidData(format!("Bad bookmarks file: {}", e)))?;
            Self::host_from_tree(&tree)?
        } else {
            MemoryHost::with_standard_folders()
        };

        let mut host = Self {
            dir: dir.to_path_buf(),
            inner,
        };

        let tabs_path = host.dir.join(TABS_FILE);
        if tabs_path.exists() {
            let content = std::fs::read_to_string(&tabs_path)?;
            let tabs: Vec<HostTab> = serde_json::from_str(&content).unwrap_or_default();
            host.inner.set_tabs(tabs);
        }

        host.persist()?;
        Ok(host)
    }

    fn host_from_tree(tree: &BookmarkTreeNode) -> Result<MemoryHost> {
        let mut host = MemoryHost::new();
        // Existing ids are preserved so file edits between runs stay stable
        let mut max_numeric = 0u64;
        Self::insert_children(&mut host, tree, ROOT_ID, &mut max_numeric)?;
        host.next_id = max_numeric + 1;
        Ok(host)
    }

    fn insert_children(
        host: &mut MemoryHost,
        node: &BookmarkTreeNode,
        local_parent: &str,
        max_numeric: &mut u64,
    ) -> Result<()> {
        for child in &node.children {
            if let Ok(n) = child.id.parse::<u64>() {
                *max_numeric = (*max_numeric).max(n);
            }
            host.nodes.insert(
                child.id.clone(),
                MemNode {
                    id: child.id.clone(),
                    title: child.title.clone(),
                    kind: child.kind,
                    url: child.url.clone(),
                    date_added: child.date_added,
                },
            );
            if child.kind == NodeKind::Folder {
                host.children.insert(child.id.clone(), Vec::new());
            }
            host.children
                .get_mut(local_parent)
                .ok_or_else(|| SyncError::InvalidData(format!("Parent {} missing", local_parent)))?
                .push(child.id.clone());
            Self::insert_children(host, child, &child.id, max_numeric)?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let tree = self.inner.bookmark_tree()?;
        std::fs::write(
            self.dir.join(BOOKMARKS_FILE),
            serde_json::to_string_pretty(&tree)?,
        )?;
        std::fs::write(
            self.dir.join(TABS_FILE),
            serde_json::to_string_pretty(&self.inner.tabs)?,
        )?;
        Ok(())
    }
}

impl BrowserHost for ProfileHost {
    fn bookmark_tree(&self) -> Result<BookmarkTreeNode> {
        self.inner.bookmark_tree()
    }

    fn create_bookmark(&mut self, props: &CreateProperties) -> Result<BookmarkNode> {
        let node = self.inner.create_bookmark(props)?;
        self.persist()?;
        Ok(node)
    }

    fn update_bookmark(&mut self, id: &str, title: Option<&str>, url: Option<&str>) -> Result<()> {
        self.inner.update_bookmark(id, title, url)?;
        self.persist()
    }

    fn move_bookmark(&mut self, id: &str, parent_id: &str, index: usize) -> Result<()> {
        self.inner.move_bookmark(id, parent_id, index)?;
        self.persist()
    }

    fn remove_bookmark(&mut self, id: &str) -> Result<()> {
        self.inner.remove_bookmark(id)?;
        self.persist()
    }

    fn tabs(&self) -> Result<Vec<HostTab>> {
        self.inner.tabs()
    }

    fn open_tab(&mut self, url: &str) -> Result<HostTab> {
        let tab = self.inner.open_tab(url)?;
        self.persist()?;
        Ok(tab)
    }

    /// Pick up edits made to the profile files since the host was opened.
    fn refresh(&mut self) -> Result<()> {
        let reloaded = Self::open(&self.dir)?;
        self.inner = reloaded.inner;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
