//! Read-only document tree
//!
//! Nodes live in one arena vector in document (pre-)order, so a node's
//! descendants are always the contiguous id range right after it. That makes
//! subtree walks allocation-free and trivially restartable.

use std::fmt;
use url::Url;

/// Index of a node inside its `DocumentTree`; ordering equals document order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element name and attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            attributes,
        }
    }

    /// Lower-cased local name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }
}

/// One node of the tree
///
/// `Document` only ever appears as the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeData {
    node: Node,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Position among the parent's children
    sibling_index: usize,
    depth: usize,
    /// Exclusive end of this node's subtree in the arena
    subtree_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTree {
    nodes: Vec<NodeData>,
    base_url: Option<Url>,
}

impl DocumentTree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0].node
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id) {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.nodes[id.0].depth
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let data = &self.nodes[id.0];
        let parent = data.parent?;
        data.sibling_index
            .checked_sub(1)
            .map(|i| self.nodes[parent.0].children[i])
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let data = &self.nodes[id.0];
        let parent = data.parent?;
        self.nodes[parent.0].children.get(data.sibling_index + 1).copied()
    }

    /// All nodes below `id` in document order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Descendants {
        Descendants {
            next: id.0 + 1,
            end: self.nodes[id.0].subtree_end,
        }
    }

    /// Parent chain from the direct parent up to the root
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |&current| self.parent(current))
    }

    /// Whether `node` lies strictly inside the subtree rooted at `scope`
    pub fn is_descendant_of(&self, node: NodeId, scope: NodeId) -> bool {
        node.0 > scope.0 && node.0 < self.nodes[scope.0].subtree_end
    }

    /// Element children only
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| matches!(self.node(child), Node::Element(_)))
    }

    /// Concatenated text of every text node in the subtree
    pub fn text(&self, id: NodeId) -> String {
        match self.node(id) {
            Node::Text(text) => text.clone(),
            Node::Comment(_) => String::new(),
            Node::Document | Node::Element(_) => self
                .descendants(id)
                .filter_map(|n| match self.node(n) {
                    Node::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Text of the direct text children only
    pub fn own_text(&self, id: NodeId) -> String {
        match self.node(id) {
            Node::Text(text) => text.clone(),
            _ => self
                .children(id)
                .iter()
                .filter_map(|&n| match self.node(n) {
                    Node::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Resolve a possibly relative link against the document's base URL
    pub fn resolve_url(&self, link: &str) -> Option<Url> {
        let link = link.trim();
        match &self.base_url {
            Some(base) => base.join(link).ok(),
            None => Url::parse(link).ok(),
        }
    }

    /// 1-based position of an element among its siblings with the same name,
    /// and the number of such siblings
    pub fn position_of_type(&self, id: NodeId) -> Option<(usize, usize)> {
        let name = self.element(id)?.name();
        let Some(parent) = self.parent(id) else {
            return Some((1, 1));
        };
        let mut position = 0;
        let mut total = 0;
        for sibling in self.element_children(parent) {
            if self.element(sibling).is_some_and(|e| e.name() == name) {
                total += 1;
                if sibling == id {
                    position = total;
                }
            }
        }
        Some((position, total))
    }
}

/// Document-order walk over one subtree
#[derive(Debug, Clone)]
pub struct Descendants {
    next: usize,
    end: usize,
}

impl Iterator for Descendants {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        (self.next < self.end).then(|| {
            self.next += 1;
            NodeId(self.next - 1)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Descendants {}

/// Builds a tree in document order
///
/// Children must be appended depth-first: every node's whole subtree is
/// appended before its next sibling.
#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                node: Node::Document,
                parent: None,
                children: Vec::new(),
                sibling_index: 0,
                depth: 0,
                subtree_end: 1,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.nodes[id.0].depth
    }

    pub fn append(&mut self, parent: NodeId, node: Node) -> NodeId {
        debug_assert!(
            !matches!(node, Node::Document),
            "document node can only be the root"
        );
        let id = NodeId(self.nodes.len());
        let parent_data = &mut self.nodes[parent.0];
        let sibling_index = parent_data.children.len();
        let depth = parent_data.depth + 1;
        parent_data.children.push(id);

        self.nodes.push(NodeData {
            node,
            parent: Some(parent),
            children: Vec::new(),
            sibling_index,
            depth,
            subtree_end: id.0 + 1,
        });
        id
    }

    pub fn finish(mut self, base_url: Option<Url>) -> DocumentTree {
        // Children always have larger ids than their parent, so a reverse
        // sweep sees every child's final extent first.
        for i in (0..self.nodes.len()).rev() {
            if let Some(&last) = self.nodes[i].children.last() {
                self.nodes[i].subtree_end = self.nodes[last.0].subtree_end;
            }
        }
        DocumentTree {
            nodes: self.nodes,
            base_url,
        }
    }
}
