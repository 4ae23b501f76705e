//! RC-007: Grammars — how tags on record fields become operation references.
//!
//! The builder only talks to the [`Grammar`] trait. [`FlatGrammar`] is the
//! stock implementation, compiled from a YAML [`GrammarConfig`].

pub mod config;
pub mod flat;

pub use config::{
    ApplierKind, CombinerKind, FlatFormat, FlatPreset, GrammarConfig, ModifierKind, OperationDecl,
    OrderingKind,
};
pub use flat::{FlatGrammar, Ordering};

use crate::core::error::GrammarError;
use crate::core::operation::OperationRef;
use crate::core::types::{Arity, MultiOpPolicy, WalkMode};
use crate::core::walk::{Applier, Combiner, Transformer};
use std::sync::Arc;

/// Rules for reading one tag key into operation references.
pub trait Grammar: Send + Sync {
    /// Tag key the grammar reads (`op` in `op:"trim;upper"`).
    fn key(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn walk_mode(&self) -> WalkMode;

    /// Arity every operation bound under this grammar must have.
    fn arity(&self) -> Arity;

    fn combiner(&self) -> Result<Arc<dyn Combiner>, GrammarError> {
        Err(not_applicable(self, "combiner"))
    }

    fn applier(&self) -> Result<Arc<dyn Applier>, GrammarError> {
        Err(not_applicable(self, "applier"))
    }

    fn transformer(&self) -> Result<Arc<dyn Transformer>, GrammarError> {
        Err(not_applicable(self, "transformer"))
    }

    /// Split a tag value into one string per operation.
    fn split(&self, tag: &str) -> Result<Vec<String>, GrammarError>;

    /// Parse one operation string.
    fn parse(&self, op: &str) -> Result<OperationRef, GrammarError>;

    /// Put a field's operations into execution order.
    fn order(&self, ops: Vec<OperationRef>) -> Result<Vec<OperationRef>, GrammarError> {
        Ok(ops)
    }

    /// Multi-operation policy for a field with these operations.
    fn policy(&self, _ops: &[OperationRef]) -> Result<MultiOpPolicy, GrammarError> {
        Ok(MultiOpPolicy::default())
    }
}

pub(crate) fn not_applicable<G: Grammar + ?Sized>(
    grammar: &G,
    strategy: &'static str,
) -> GrammarError {
    GrammarError::NotApplicable {
        key: grammar.key().to_string(),
        strategy,
        mode: grammar.walk_mode(),
    }
}
