//! RC-013: Executor — combine and apply walks over a resolved recipe.
//!
//! Each call: check instances → get or build the recipe → resolve and
//! publish it once → walk. Combine folds every leaf's results into one
//! value; apply writes results into the addressed fields.
//!
//! Children are visited in declaration order, operations in grammar order.

use super::builder::Builder;
use super::cache::RecipeCache;
use super::error::{AccessError, Error, Result};
use super::operation::{self, OpRegistry, ResolvedOperation};
use super::recipe::{ExecTree, Leaf, Node, Recipe, Strategy};
use super::record::{parse_default, RecordType, Walked};
use super::resolver::Resolver;
use super::types::{MultiOpPolicy, Shape, Value, WalkMode};
use super::walk::{Applier, Combiner, FieldSlot, Transformer};
use crate::grammar::Grammar;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// ============================================================================
// Per-call context
// ============================================================================

/// Per-call strategy overrides. Never stored in the recipe.
#[derive(Clone, Default)]
pub struct ExecContext {
    combiner: Option<Arc<dyn Combiner>>,
    applier: Option<Arc<dyn Applier>>,
    transformer: Option<Arc<dyn Transformer>>,
    branches: FxHashMap<String, Arc<dyn Combiner>>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_combiner(mut self, combiner: Arc<dyn Combiner>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn with_applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Carry a transformer for transform-mode callers. The combine and apply
    /// walks never read it.
    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Fold the subtree at a dotted field path (`"Meta"`, `"Meta.Flag"`)
    /// with `combiner`. The subtree's result is folded into its parent with
    /// the parent's combiner.
    pub fn with_branch_combiner(
        mut self,
        path: impl Into<String>,
        combiner: Arc<dyn Combiner>,
    ) -> Self {
        self.branches.insert(path.into(), combiner);
        self
    }

    /// Transformer override set with [`ExecContext::with_transformer`].
    pub fn transformer(&self) -> Option<&Arc<dyn Transformer>> {
        self.transformer.as_ref()
    }

    fn branch(&self, path: &str) -> Option<&Arc<dyn Combiner>> {
        self.branches.get(path)
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut branches: Vec<&str> = self.branches.keys().map(String::as_str).collect();
        branches.sort_unstable();
        f.debug_struct("ExecContext")
            .field("combiner", &self.combiner.is_some())
            .field("applier", &self.applier.is_some())
            .field("transformer", &self.transformer.is_some())
            .field("branches", &branches)
            .finish()
    }
}

// ============================================================================
// Operation outcomes
// ============================================================================

enum Outcome {
    Produced(Value),
    /// Succeeded or failed, but an execution modifier dropped the result.
    Omitted,
    Failed(Error),
}

/// Run one operation and apply its execution modifiers. A `default` is
/// converted to the field's `shape` before the omit checks see it.
fn run_operation(op: &ResolvedOperation, shape: Shape, sources: &[Value]) -> Outcome {
    let options = op.options();
    let value = match op.execute(sources) {
        Ok(value) => value,
        Err(_) if options.flag(operation::OMIT_ERR) => return Outcome::Omitted,
        Err(e) => return Outcome::Failed(Error::Op(e).in_operation(op.name())),
    };
    let value = match options.text(operation::DEFAULT) {
        Some(default) if value.is_empty() => match parse_default(shape, default) {
            Ok(value) => value,
            Err(e) => return Outcome::Failed(Error::from(e).in_operation(op.name())),
        },
        _ => value,
    };
    if value.is_null() && options.flag(operation::OMIT_NIL) {
        return Outcome::Omitted;
    }
    if value.is_empty() && options.flag(operation::OMIT_EMPTY) {
        return Outcome::Omitted;
    }
    Outcome::Produced(value)
}

/// Tracks failures of a first-success leaf. The leaf fails only when every
/// operation failed.
#[derive(Default)]
struct FailureTally {
    failed: usize,
    last: Option<Error>,
}

impl FailureTally {
    fn record(&mut self, err: Error) {
        self.failed += 1;
        self.last = Some(err);
    }

    fn finish(self, total: usize) -> Result<()> {
        match self.last {
            Some(err) if self.failed == total => Err(err),
            _ => Ok(()),
        }
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Walks recipes for one grammar. Shared across threads behind `Arc`.
#[derive(Debug)]
pub struct Executor {
    cache: Arc<RecipeCache>,
    resolver: Resolver,
}

impl Executor {
    pub fn new(grammar: Arc<dyn Grammar>, registry: Arc<OpRegistry>) -> Self {
        Self::from_parts(
            Arc::new(RecipeCache::new(Builder::new(grammar))),
            Resolver::new(registry),
        )
    }

    pub fn from_parts(cache: Arc<RecipeCache>, resolver: Resolver) -> Self {
        Self { cache, resolver }
    }

    pub fn cache(&self) -> &Arc<RecipeCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Resolved recipe for the type, building, resolving and publishing it
    /// on first use.
    pub fn prepare(&self, record_type: RecordType) -> Result<Arc<Recipe>> {
        let recipe = self.cache.get_or_build(record_type)?;
        if recipe.resolved {
            return Ok(recipe);
        }
        let resolved = self.resolver.resolve(&recipe)?;
        Ok(self.cache.publish_resolved(resolved))
    }

    /// Fold every mapped field of `instances` into one value.
    pub fn combine(&self, ctx: &ExecContext, instances: &[&dyn Walked]) -> Result<Value> {
        let record_type = common_record_type(instances.iter().map(|i| i.record_type()))?;
        let recipe = self.prepare(record_type)?;
        check_walk_mode(&recipe, WalkMode::Combine)?;
        let combiner = match (&ctx.combiner, &recipe.strategy) {
            (Some(combiner), _) => Arc::clone(combiner),
            (None, Strategy::Combine(combiner)) => Arc::clone(combiner),
            (None, strategy) => {
                return Err(Error::WalkTypeMismatch {
                    recipe: strategy.mode(),
                    requested: WalkMode::Combine,
                })
            }
        };
        if !recipe.arity.accepts(instances.len()) {
            return Err(Error::SourceCount {
                arity: recipe.arity,
                count: instances.len(),
            });
        }

        let owners: Vec<&dyn Any> = instances.iter().map(|i| i.as_any()).collect();
        let result =
            combine_children(recipe.root.children(), "", &owners, combiner.as_ref(), ctx)?;
        Ok(combiner.combine(combiner.zero(), result))
    }

    /// Write operation results derived from `sources` into every instance.
    /// Writes already made stay in place when a later field fails.
    pub fn apply(
        &self,
        ctx: &ExecContext,
        instances: &mut [&mut dyn Walked],
        sources: &[Value],
    ) -> Result<()> {
        let record_type = common_record_type(instances.iter().map(|i| i.record_type()))?;
        let recipe = self.prepare(record_type)?;
        check_walk_mode(&recipe, WalkMode::Apply)?;
        let applier = match (&ctx.applier, &recipe.strategy) {
            (Some(applier), _) => Arc::clone(applier),
            (None, Strategy::Apply(applier)) => Arc::clone(applier),
            (None, strategy) => {
                return Err(Error::WalkTypeMismatch {
                    recipe: strategy.mode(),
                    requested: WalkMode::Apply,
                })
            }
        };
        if !recipe.arity.accepts(sources.len()) {
            return Err(Error::SourceCount {
                arity: recipe.arity,
                count: sources.len(),
            });
        }

        let mut owners: Vec<&mut dyn Any> =
            instances.iter_mut().map(|i| i.as_any_mut()).collect();
        apply_children(recipe.root.children(), &mut owners, sources, applier.as_ref())
    }
}

fn common_record_type(mut types: impl Iterator<Item = RecordType>) -> Result<RecordType> {
    let first = types.next().ok_or(Error::NoInstances)?;
    for (offset, other) in types.enumerate() {
        if other != first {
            return Err(Error::InstanceTypeMismatch {
                index: offset + 1,
                expected: first.name(),
                found: other.name(),
            });
        }
    }
    Ok(first)
}

fn check_walk_mode(recipe: &Recipe, requested: WalkMode) -> Result<()> {
    if recipe.walk_mode != requested {
        return Err(Error::WalkTypeMismatch {
            recipe: recipe.walk_mode,
            requested,
        });
    }
    Ok(())
}

fn combine_children(
    children: &[ExecTree],
    path: &str,
    owners: &[&dyn Any],
    combiner: &dyn Combiner,
    ctx: &ExecContext,
) -> Result<Value> {
    let mut acc = combiner.zero();
    for child in children {
        let path = child_path(path, &child.name);
        let branch = ctx.branch(&path).map(Arc::as_ref).unwrap_or(combiner);
        let value = match &child.node {
            Node::Record {
                children: nested,
                address: Some(address),
            } => owners
                .iter()
                .map(|owner| address.address(*owner))
                .collect::<Result<Vec<_>, AccessError>>()
                .map_err(Error::from)
                .and_then(|narrowed| combine_children(nested, &path, &narrowed, branch, ctx)),
            Node::Record {
                children: nested,
                address: None,
            } => combine_children(nested, &path, owners, branch, ctx),
            Node::Leaf(leaf) => combine_leaf(&path, child.shape, leaf, owners, branch),
        }
        .map_err(|e| e.in_field(&child.name))?;
        acc = combiner.combine(acc, value);
    }
    Ok(acc)
}

fn combine_leaf(
    path: &str,
    shape: Shape,
    leaf: &Leaf,
    owners: &[&dyn Any],
    combiner: &dyn Combiner,
) -> Result<Value> {
    if leaf.resolved.is_empty() {
        return Ok(combiner.zero());
    }
    let sources = owners
        .iter()
        .map(|owner| leaf.accessor.read(*owner))
        .collect::<Result<Vec<_>, AccessError>>()?;
    trace!(
        field = path,
        operations = leaf.resolved.len(),
        policy = %leaf.policy,
        "combine leaf"
    );

    match leaf.policy {
        MultiOpPolicy::FirstSuccess => {
            let mut tally = FailureTally::default();
            for op in &leaf.resolved {
                match run_operation(op, shape, &sources) {
                    Outcome::Produced(value) => return Ok(value),
                    Outcome::Omitted => {}
                    Outcome::Failed(err) => tally.record(err),
                }
            }
            tally.finish(leaf.resolved.len())?;
            Ok(combiner.zero())
        }
        MultiOpPolicy::AllOrNothing => {
            let mut acc = combiner.zero();
            for op in &leaf.resolved {
                match run_operation(op, shape, &sources) {
                    Outcome::Produced(value) => acc = combiner.combine(acc, value),
                    Outcome::Omitted => {}
                    Outcome::Failed(err) => return Err(err),
                }
            }
            Ok(acc)
        }
    }
}

fn apply_children(
    children: &[ExecTree],
    owners: &mut [&mut dyn Any],
    sources: &[Value],
    applier: &dyn Applier,
) -> Result<()> {
    for child in children {
        match &child.node {
            Node::Record {
                children: nested,
                address,
            } => {
                let result = match address {
                    Some(address) => owners
                        .iter_mut()
                        .map(|owner| address.address_mut(&mut **owner))
                        .collect::<Result<Vec<_>, AccessError>>()
                        .map_err(Error::from)
                        .and_then(|mut narrowed| {
                            apply_children(nested, &mut narrowed, sources, applier)
                        }),
                    None => apply_children(nested, owners, sources, applier),
                };
                result.map_err(|e| e.in_field(&child.name))?;
            }
            Node::Leaf(leaf) => {
                let slot = FieldSlot {
                    name: &child.name,
                    shape: child.shape,
                    accessor: &leaf.accessor,
                };
                apply_leaf(&slot, leaf, owners, sources, applier)
                    .map_err(|e| e.in_field(&child.name))?;
            }
        }
    }
    Ok(())
}

fn apply_leaf(
    slot: &FieldSlot<'_>,
    leaf: &Leaf,
    owners: &mut [&mut dyn Any],
    sources: &[Value],
    applier: &dyn Applier,
) -> Result<()> {
    if leaf.resolved.is_empty() {
        return Ok(());
    }
    trace!(
        field = slot.name,
        operations = leaf.resolved.len(),
        policy = %leaf.policy,
        "apply leaf"
    );

    let mut tally = FailureTally::default();
    for op in &leaf.resolved {
        match run_operation(op, slot.shape, sources) {
            Outcome::Produced(value) => {
                for owner in owners.iter_mut() {
                    applier.apply(&mut **owner, slot, value.clone())?;
                }
                if leaf.policy == MultiOpPolicy::FirstSuccess {
                    return Ok(());
                }
            }
            Outcome::Omitted => {}
            Outcome::Failed(err) if leaf.policy == MultiOpPolicy::AllOrNothing => return Err(err),
            Outcome::Failed(err) => tally.record(err),
        }
    }
    tally.finish(leaf.resolved.len())
}
