//! RC-012: Operation resolution.
//!
//! Binds every operation reference in a recipe to its registered callable,
//! checking that each one has the recipe's arity. Resolution works on a copy;
//! the input recipe is never modified.

use super::error::{Error, Result};
use super::operation::{OpRegistry, ResolvedOperation};
use super::recipe::{ExecTree, Leaf, Node, Recipe};
use super::types::Arity;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<OpRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<OpRegistry> {
        &self.registry
    }

    /// Resolved copy of `recipe`. Already-resolved recipes come back as-is.
    pub fn resolve(&self, recipe: &Recipe) -> Result<Recipe> {
        if recipe.resolved {
            return Ok(recipe.clone());
        }
        let root = self.bind(&recipe.root, recipe.arity)?;
        debug!(
            record = recipe.record_type.short_name(),
            operations = recipe.operation_count(),
            "resolved recipe"
        );
        Ok(Recipe {
            root,
            resolved: true,
            ..recipe.clone()
        })
    }

    fn bind(&self, tree: &ExecTree, arity: Arity) -> Result<ExecTree> {
        let node = match &tree.node {
            Node::Record { children, address } => Node::Record {
                children: children
                    .iter()
                    .map(|child| self.bind(child, arity).map_err(|e| e.in_field(&child.name)))
                    .collect::<Result<Vec<_>>>()?,
                address: address.clone(),
            },
            Node::Leaf(leaf) => Node::Leaf(Leaf {
                resolved: self.bind_leaf(leaf, arity)?,
                ..leaf.clone()
            }),
        };
        Ok(ExecTree {
            name: tree.name.clone(),
            index: tree.index,
            shape: tree.shape,
            node,
        })
    }

    fn bind_leaf(&self, leaf: &Leaf, arity: Arity) -> Result<Vec<ResolvedOperation>> {
        leaf.refs
            .iter()
            .map(|reference| {
                let resolved = self.registry.resolve(reference)?;
                if resolved.arity() != arity {
                    return Err(Error::ArityMismatch {
                        found: resolved.arity(),
                        expected: arity,
                    }
                    .in_operation(&reference.name));
                }
                Ok(resolved)
            })
            .collect()
    }
}
