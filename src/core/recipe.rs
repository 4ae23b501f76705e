//! RC-006: Recipe and execution tree.
//!
//! A recipe is the compiled plan for one record type: a tree mirroring the
//! type's mapped fields, the arity and walk mode shared by every operation
//! in it, and the strategy its results flow into.

use super::operation::{OperationRef, ResolvedOperation};
use super::record::{ChildAddress, FieldAccessor, RecordType};
use super::types::{Arity, MultiOpPolicy, Shape, WalkMode};
use super::walk::{Applier, Combiner, Transformer};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Where a recipe's operation results go.
#[derive(Clone)]
pub enum Strategy {
    Combine(Arc<dyn Combiner>),
    Apply(Arc<dyn Applier>),
    Transform(Arc<dyn Transformer>),
}

impl Strategy {
    pub fn mode(&self) -> WalkMode {
        match self {
            Self::Combine(_) => WalkMode::Combine,
            Self::Apply(_) => WalkMode::Apply,
            Self::Transform(_) => WalkMode::Transform,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strategy::{}", self.mode())
    }
}

/// Leaf body: the operations bound to one terminal field.
#[derive(Clone)]
pub struct Leaf {
    pub refs: Vec<OperationRef>,
    /// Empty until the recipe is resolved.
    pub resolved: Vec<ResolvedOperation>,
    pub policy: MultiOpPolicy,
    pub accessor: FieldAccessor,
}

#[derive(Clone)]
pub enum Node {
    /// Nested record. `address` is absent on the root.
    Record {
        children: Vec<ExecTree>,
        address: Option<Arc<dyn ChildAddress>>,
    },
    Leaf(Leaf),
}

/// One node of the execution tree.
#[derive(Clone)]
pub struct ExecTree {
    pub name: String,
    /// Declaration index within the parent record.
    pub index: usize,
    pub shape: Shape,
    pub node: Node,
}

impl ExecTree {
    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf(_))
    }

    pub fn children(&self) -> &[ExecTree] {
        match &self.node {
            Node::Record { children, .. } => children,
            Node::Leaf(_) => &[],
        }
    }

    pub fn leaf(&self) -> Option<&Leaf> {
        match &self.node {
            Node::Leaf(leaf) => Some(leaf),
            Node::Record { .. } => None,
        }
    }

    /// Node at a dotted path relative to this node (`"Meta.Flag"`).
    pub fn find(&self, path: &str) -> Option<&ExecTree> {
        path.split('.').try_fold(self, |node, segment| {
            node.children().iter().find(|child| child.name == segment)
        })
    }

    /// Number of leaves below (or at) this node.
    pub fn leaf_count(&self) -> usize {
        match &self.node {
            Node::Leaf(_) => 1,
            Node::Record { children, .. } => children.iter().map(ExecTree::leaf_count).sum(),
        }
    }

    fn write_outline(&self, prefix: &str, out: &mut String) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", prefix, self.name)
        };
        match &self.node {
            Node::Record { children, .. } => {
                let _ = writeln!(out, "{} #{} {}", path, self.index, self.shape);
                for child in children {
                    child.write_outline(&path, out);
                }
            }
            Node::Leaf(leaf) => {
                let ops: Vec<String> = leaf
                    .refs
                    .iter()
                    .map(|r| {
                        let mut op = r.name.clone();
                        for (key, value) in r.options.iter() {
                            let _ = write!(op, ",{}={}", key, value);
                        }
                        op
                    })
                    .collect();
                let _ = writeln!(
                    out,
                    "{} #{} {} {} [{}] {}",
                    path,
                    self.index,
                    self.shape,
                    if leaf.accessor.is_fast() { "fast" } else { "generic" },
                    ops.join(" "),
                    leaf.policy
                );
            }
        }
    }
}

impl fmt::Debug for ExecTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ExecTree");
        s.field("name", &self.name)
            .field("index", &self.index)
            .field("shape", &self.shape);
        match &self.node {
            Node::Record { children, .. } => s.field("children", children),
            Node::Leaf(leaf) => s
                .field("refs", &leaf.refs)
                .field("resolved", &leaf.resolved.len())
                .field("policy", &leaf.policy),
        };
        s.finish()
    }
}

/// Compiled plan for one record type.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub root: ExecTree,
    pub arity: Arity,
    pub walk_mode: WalkMode,
    pub resolved: bool,
    pub record_type: RecordType,
    pub strategy: Strategy,
}

impl Recipe {
    /// Deterministic textual rendering of the tree, one line per node.
    /// Two builds of the same type produce identical outlines.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} {}",
            self.record_type.short_name(),
            self.walk_mode,
            self.arity
        );
        for child in self.root.children() {
            child.write_outline("", &mut out);
        }
        out
    }

    pub fn operation_count(&self) -> usize {
        fn count(node: &ExecTree) -> usize {
            match &node.node {
                Node::Leaf(leaf) => leaf.refs.len(),
                Node::Record { children, .. } => children.iter().map(count).sum(),
            }
        }
        count(&self.root)
    }
}
