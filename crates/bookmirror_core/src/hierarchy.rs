use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

pub const DEFAULT_FORBIDDEN_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

const REPLACEMENT_CHAR: char = '_';
/// Replaced regardless of the configured forbidden characters.
const PATH_SEPARATORS: &[char] = &['/', '\\', std::path::MAIN_SEPARATOR];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Shelf,
    Book,
    Chapter,
    Page,
    Attachment,
    Image,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shelf => "shelf",
            Self::Book => "book",
            Self::Chapter => "chapter",
            Self::Page => "page",
            Self::Attachment => "attachment",
            Self::Image => "image",
        }
    }
}

/// Direct download details for gallery images. The storage path is the one
/// reported by the API and is unrelated to the node's hierarchy path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub url: String,
    pub storage_path: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub id: i64,
    pub name: String,
    pub last_edit: DateTime<Utc>,
    pub file: Option<FileRef>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewNode<'a> {
    pub kind: NodeKind,
    pub id: i64,
    pub name: &'a str,
    pub last_edit: DateTime<Utc>,
}

/// Arena holding every node of one catalog run.
///
/// Parents are always inserted before their children, so the structure is a
/// forest and every walk up or down terminates.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<Node>,
    forbidden_chars: Vec<char>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new(DEFAULT_FORBIDDEN_CHARS)
    }
}

impl Hierarchy {
    pub fn new(forbidden_chars: &[char]) -> Self {
        Self {
            nodes: Vec::new(),
            forbidden_chars: forbidden_chars.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node, registering it with `parent` when one is given.
    pub fn insert(&mut self, new: NewNode<'_>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind: new.kind,
            id: new.id,
            name: sanitize_name(new.name, &self.forbidden_chars),
            last_edit: new.last_edit,
            file: None,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.add_child(parent, id);
        }
        id
    }

    /// Insert a flat gallery file. Files never take part in the parent tree.
    pub fn insert_file(&mut self, new: NewNode<'_>, file: FileRef) -> NodeId {
        let id = self.insert(new, None);
        self.nodes[id.0].file = Some(file);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Attach a parentless node to `parent`.
    ///
    /// Re-attaching to the current parent is a no-op; moving a node that
    /// already has a different parent, or attaching it below one of its own
    /// descendants, is rejected.
    pub fn set_parent(&mut self, id: NodeId, parent: NodeId) -> Result<()> {
        match self.nodes[id.0].parent {
            Some(current) if current == parent => return Ok(()),
            Some(current) => bail!(
                "{} {} already belongs to {} {}",
                self.nodes[id.0].kind.as_str(),
                self.nodes[id.0].id,
                self.nodes[current.0].kind.as_str(),
                self.nodes[current.0].id
            ),
            None => {}
        }
        if self.is_ancestor_or_self(id, parent) {
            bail!(
                "attaching {} {} below {} {} would create a cycle",
                self.nodes[id.0].kind.as_str(),
                self.nodes[id.0].id,
                self.nodes[parent.0].kind.as_str(),
                self.nodes[parent.0].id
            );
        }
        self.nodes[id.0].parent = Some(parent);
        self.add_child(parent, id);
        Ok(())
    }

    fn add_child(&mut self, parent: NodeId, child: NodeId) {
        let children = &mut self.nodes[parent.0].children;
        if !children.contains(&child) {
            children.push(child);
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Number of nodes in the subtree rooted at `id` (inclusive) edited
    /// strictly after `timestamp`.
    pub fn changed_since(&self, id: NodeId, timestamp: DateTime<Utc>) -> usize {
        let node = &self.nodes[id.0];
        let own = usize::from(node.last_edit > timestamp);
        own + node
            .children
            .iter()
            .map(|child| self.changed_since(*child, timestamp))
            .sum::<usize>()
    }

    /// Directory of the node relative to the export root: its ancestors'
    /// names in root-to-parent order. Roots map to the empty path.
    pub fn relative_dir(&self, id: NodeId) -> PathBuf {
        let mut segments = Vec::new();
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            segments.push(self.nodes[parent.0].name.as_str());
            current = self.nodes[parent.0].parent;
        }
        segments.iter().rev().collect()
    }

    /// Number of ancestors above the node.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent.0].parent;
        }
        depth
    }
}

/// Replace forbidden characters with `_` so the name can be used as a single
/// path segment. Path separators and control characters are always replaced.
pub fn sanitize_name(name: &str, forbidden_chars: &[char]) -> String {
    let sanitized: String = name
        .chars()
        .map(|ch| {
            if ch.is_control() || PATH_SEPARATORS.contains(&ch) || forbidden_chars.contains(&ch) {
                REPLACEMENT_CHAR
            } else {
                ch
            }
        })
        .collect();
    match sanitized.as_str() {
        "" | "." | ".." => REPLACEMENT_CHAR.to_string(),
        _ => sanitized,
    }
}
