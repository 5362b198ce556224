//! Minimal Newick tree used to feed the external tools.
//!
//! Only what the run subsystem needs lives here: parse, write, list leaves,
//! resolve polytomies, normalize branch metrics and prune to a leaf set.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TreeError {
    #[error("invalid Newick at byte {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    #[error("tree has no leaves left after pruning")]
    EmptyAfterPrune,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: Option<String>,
    pub length: Option<f64>,
    pub support: Option<f64>,
    pub children: Vec<usize>,
}

impl Node {
    fn leaf(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            length: None,
            support: None,
            children: Vec::new(),
        }
    }

    fn internal(children: Vec<usize>) -> Self {
        Self {
            name: None,
            length: None,
            support: None,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// How much of the branch metadata to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewickFormat {
    /// Leaf names, internal supports and all branch lengths.
    Full,
    /// Leaf names and branch lengths, no internal labels.
    Lengths,
}

/// Arena-backed rooted tree. Node 0 is not necessarily the root; use `root`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    pub fn parse(text: &str) -> Result<Self, TreeError> {
        let mut parser = NewickParser {
            src: text.as_bytes(),
            pos: 0,
            nodes: Vec::new(),
        };
        parser.skip_ws();
        let root = parser.subtree()?;
        parser.skip_ws();
        if parser.peek() == Some(b';') {
            parser.pos += 1;
        } else {
            return Err(parser.error("expected ';'"));
        }
        parser.skip_ws();
        if parser.pos != parser.src.len() {
            return Err(parser.error("trailing content after ';'"));
        }
        Ok(Self {
            nodes: parser.nodes,
            root,
        })
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text)?)
    }

    /// Ladder-shaped tree over `names` in the order given: `((a,b),c);`.
    pub fn caterpillar<S: AsRef<str>>(names: &[S]) -> Result<Self, TreeError> {
        let mut nodes = Vec::new();
        let mut iter = names.iter();
        let first = iter.next().ok_or(TreeError::EmptyAfterPrune)?;
        nodes.push(Node::leaf(first.as_ref()));
        let mut root = 0;
        for name in iter {
            nodes.push(Node::leaf(name.as_ref()));
            let leaf = nodes.len() - 1;
            nodes.push(Node::internal(vec![root, leaf]));
            root = nodes.len() - 1;
        }
        Ok(Self { nodes, root })
    }

    /// Node indices reachable from the root, parents before children.
    pub fn preorder(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev());
        }
        out
    }

    /// Leaf names in left-to-right order. Unnamed leaves are skipped.
    pub fn leaf_names(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .filter(|&i| self.nodes[i].is_leaf())
            .filter_map(|i| self.nodes[i].name.clone())
            .collect()
    }

    pub fn is_bifurcating(&self) -> bool {
        self.preorder()
            .into_iter()
            .all(|i| matches!(self.nodes[i].children.len(), 0 | 2))
    }

    /// Split every node with more than two children into a ladder of
    /// binary nodes, keeping the first child at the top.
    ///
    /// The split is arbitrary but deterministic. It exists because the
    /// reconciliation tool only accepts binary trees; the new internal
    /// branches get length 0 and carry no support.
    pub fn resolve_polytomies(&mut self) {
        for idx in self.preorder() {
            self.split_ladder(idx);
        }
    }

    fn split_ladder(&mut self, mut idx: usize) {
        while self.nodes[idx].children.len() > 2 {
            let rest = self.nodes[idx].children.split_off(1);
            let mut inner = Node::internal(rest);
            inner.length = Some(0.0);
            self.nodes.push(inner);
            let new_idx = self.nodes.len() - 1;
            self.nodes[idx].children.push(new_idx);
            idx = new_idx;
        }
    }

    /// Overwrite every branch length and support value.
    pub fn set_all_branch_metrics(&mut self, value: f64) {
        for idx in self.preorder() {
            let node = &mut self.nodes[idx];
            node.length = Some(value);
            node.support = Some(value);
        }
    }

    /// Copy of the tree restricted to leaves named in `keep`. Nodes left
    /// with a single child are collapsed and their branch lengths summed.
    pub fn prune_to(&self, keep: &HashSet<&str>) -> Result<Self, TreeError> {
        let mut nodes = Vec::new();
        let root = self
            .copy_pruned(self.root, keep, &mut nodes)
            .ok_or(TreeError::EmptyAfterPrune)?;
        Ok(Self { nodes, root })
    }

    fn copy_pruned(&self, idx: usize, keep: &HashSet<&str>, out: &mut Vec<Node>) -> Option<usize> {
        let node = &self.nodes[idx];
        if node.is_leaf() {
            let name = node.name.as_deref()?;
            if !keep.contains(name) {
                return None;
            }
            out.push(node.clone());
            return Some(out.len() - 1);
        }

        let kept: Vec<usize> = node
            .children
            .iter()
            .filter_map(|&c| self.copy_pruned(c, keep, out))
            .collect();

        match kept.as_slice() {
            [] => None,
            [only] => {
                let only = *only;
                if let (Some(a), Some(b)) = (out[only].length, node.length) {
                    out[only].length = Some(a + b);
                }
                Some(only)
            }
            _ => {
                let mut copy = node.clone();
                copy.children = kept;
                out.push(copy);
                Some(out.len() - 1)
            }
        }
    }

    pub fn to_newick(&self, format: NewickFormat) -> String {
        let mut out = String::new();
        self.write_node(self.root, format, &mut out);
        out.push(';');
        out
    }

    pub fn write(&self, path: &Path, format: NewickFormat) -> std::io::Result<()> {
        std::fs::write(path, format!("{}\n", self.to_newick(format)))
    }

    fn write_node(&self, idx: usize, format: NewickFormat, out: &mut String) {
        let node = &self.nodes[idx];
        if node.is_leaf() {
            out.push_str(node.name.as_deref().unwrap_or(""));
        } else {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_node(child, format, out);
            }
            out.push(')');
            if format == NewickFormat::Full {
                if let Some(support) = node.support {
                    out.push_str(&support.to_string());
                } else if let Some(name) = node.name.as_deref() {
                    out.push_str(name);
                }
            }
        }
        if let Some(length) = node.length {
            out.push(':');
            out.push_str(&length.to_string());
        }
    }
}

struct NewickParser<'a> {
    src: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl NewickParser<'_> {
    fn error(&self, msg: &str) -> TreeError {
        TreeError::Parse {
            pos: self.pos,
            msg: msg.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                // [comments] are ignored
                Some(b'[') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == b']' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn subtree(&mut self) -> Result<usize, TreeError> {
        self.skip_ws();
        let mut node = if self.peek() == Some(b'(') {
            self.pos += 1;
            let mut children = vec![self.subtree()?];
            loop {
                self.skip_ws();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        children.push(self.subtree()?);
                    }
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
            let mut node = Node::internal(children);
            if let Some(label) = self.label()? {
                // Numeric internal labels are branch supports.
                match label.parse::<f64>() {
                    Ok(support) => node.support = Some(support),
                    Err(_) => node.name = Some(label),
                }
            }
            node
        } else {
            let label = self.label()?.ok_or_else(|| self.error("expected leaf name"))?;
            Node::leaf(&label)
        };

        self.skip_ws();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_ws();
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
            let length = text
                .parse::<f64>()
                .map_err(|_| self.error("invalid branch length"))?;
            node.length = Some(length);
        }

        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    fn label(&mut self) -> Result<Option<String>, TreeError> {
        self.skip_ws();
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == b'\'' {
                    let label = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                    self.pos += 1;
                    return Ok(Some(label));
                }
                self.pos += 1;
            }
            return Err(self.error("unterminated quoted label"));
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'(' | b')' | b',' | b':' | b';' | b'[') || c.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&self.src[start..self.pos]).into_owned(),
        ))
    }
}
