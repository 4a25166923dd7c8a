use std::collections::HashMap;

use anyhow::{bail, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

pub type NodeId = usize;

/// One element in a parsed page snapshot.
///
/// Shadow subtrees hang off their host via `shadow`; shadow roots have no
/// parent, so ancestor walks stop at the shadow boundary just like they
/// stop at a document boundary.
#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub shadow: Option<NodeId>,
}

impl Node {
    fn new(tag: &str, parent: Option<NodeId>) -> Self {
        Node {
            tag: tag.to_lowercase(),
            attrs: HashMap::new(),
            text: String::new(),
            parent,
            children: Vec::new(),
            shadow: None,
        }
    }
}

/// Arena-backed element tree. Built either from an XHTML page snapshot
/// (`parse_snapshot`) or directly through the builder methods in tests.
#[derive(Debug, Clone)]
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
}

pub const SHADOW_ROOT_TAG: &str = "#shadow-root";

impl Dom {
    pub fn new(tag: &str) -> Dom {
        Dom {
            nodes: vec![Node::new(tag, None)],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn add_child(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(tag, Some(parent)));
        self.nodes[parent].children.push(id);
        id
    }

    /// Attach a shadow subtree to `host` and return its root container.
    /// The container has no parent, so it marks a traversal boundary.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(SHADOW_ROOT_TAG, None));
        self.nodes[host].shadow = Some(id);
        id
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        self.nodes[id]
            .attrs
            .insert(key.to_lowercase(), value.to_string());
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        self.nodes[id].text = text.to_string();
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.nodes[id].tag
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.nodes[id].attrs.get(key).map(|v| v.as_str())
    }

    pub fn has_attr(&self, id: NodeId, key: &str) -> bool {
        self.nodes[id].attrs.contains_key(key)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn shadow_root(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].shadow
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id].parent?;
        let siblings = &self.nodes[parent].children;
        let pos = siblings.iter().position(|&c| c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// Concatenated text of a node and its light descendants, in document
    /// order. Shadow subtrees are excluded, matching `textContent`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push_str(&self.nodes[n].text);
            for &c in self.nodes[n].children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Parse an XHTML page snapshot. Declarative shadow roots
    /// (`<template shadowrootmode="...">`) attach to their host element as
    /// shadow subtrees instead of light children.
    pub fn parse_snapshot(xml: &str) -> Result<Dom> {
        let mut reader = Reader::from_str(xml);
        let mut nodes: Vec<Node> = Vec::new();
        let mut root: Option<NodeId> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = open_element(&mut nodes, &mut root, &stack, &e)?;
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    open_element(&mut nodes, &mut root, &stack, &e)?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(&top) = stack.last() {
                        nodes[top].text.push_str(&e.unescape()?);
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.into()),
                _ => {}
            }
        }

        match root {
            Some(root) => Ok(Dom { nodes, root }),
            None => bail!("snapshot contains no elements"),
        }
    }
}

/// Create a node for a Start/Empty tag and wire it into the tree.
fn open_element(
    nodes: &mut Vec<Node>,
    root: &mut Option<NodeId>,
    stack: &[NodeId],
    e: &quick_xml::events::BytesStart,
) -> Result<NodeId> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_lowercase();
        attrs.insert(key, attr.unescape_value()?.to_string());
    }

    let id = nodes.len();
    let host = stack.last().copied();

    // <template shadowrootmode> becomes a shadow subtree on its host
    if tag == "template" && attrs.contains_key("shadowrootmode") {
        match host {
            Some(host) => {
                nodes.push(Node::new(SHADOW_ROOT_TAG, None));
                nodes[host].shadow = Some(id);
            }
            None => bail!("shadow root template without a host element"),
        }
        return Ok(id);
    }

    let mut node = Node::new(&tag, host);
    node.attrs = attrs;
    nodes.push(node);

    match host {
        Some(host) => nodes[host].children.push(id),
        None if root.is_none() => *root = Some(id),
        // Sibling of the document element: keep it reachable from nothing
        // rather than guessing a parent; extraction starts at `root`.
        None => {}
    }
    Ok(id)
}

// ── Tests ──
