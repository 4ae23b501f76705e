//! tagrecipe — tag-driven recipes over nested record types.
//!
//! A record type declares its fields once. A grammar reads one tag key on
//! those fields into operation references. The builder compiles that into a
//! [`Recipe`], cached per type and resolved against an [`OpRegistry`] on
//! first use. The [`Executor`] then replays it against live instances,
//! folding results into one value (combine) or writing them into fields
//! (apply).
//!
//! ```ignore
//! let grammar = FlatGrammar::from_yaml("key: op\nwalk_mode: combine\ncombiner: bool_and\n")?;
//! let executor = Executor::new(Arc::new(grammar), Arc::new(registry));
//! let valid = executor.combine(&ExecContext::new(), &[&user])?;
//! ```

pub mod core;
pub mod grammar;

pub use crate::core::builder::Builder;
pub use crate::core::cache::RecipeCache;
pub use crate::core::error::{
    AccessError, Error, ErrorKind, GrammarBuildStage, GrammarError, OpError, Result,
};
pub use crate::core::executor::{ExecContext, Executor};
pub use crate::core::operation::{
    FnOperation, OpOptions, OpRegistry, Operation, OperationRef, ResolvedOperation,
};
pub use crate::core::recipe::{ExecTree, Leaf, Node, Recipe, Strategy};
pub use crate::core::record::{
    ChildAddress, FieldAccess, FieldAccessor, FieldDef, Layout, Record, RecordType, Scalar, Tag,
    Walked,
};
pub use crate::core::resolver::Resolver;
pub use crate::core::types::{Arity, MultiOpPolicy, Shape, Value, WalkMode};
pub use crate::core::walk::{
    Applier, BoolAndCombiner, CollectCombiner, Combiner, FieldSlot, SetterApplier,
    StringConcatCombiner, Transformer,
};
pub use crate::grammar::{FlatGrammar, Grammar, GrammarConfig};
