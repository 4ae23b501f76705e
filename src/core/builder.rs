//! RC-010: Plan builder — record layout + grammar → recipe.
//!
//! Building is pure: it reads the record's declared layout and the grammar,
//! never touches the cache, and produces the same tree every time.

use super::error::{Error, Result};
use super::operation::OperationRef;
use super::recipe::{ExecTree, Leaf, Node, Recipe, Strategy};
use super::record::{FieldDef, FieldKind, RecordType};
use super::types::{MultiOpPolicy, Shape, WalkMode};
use crate::grammar::Grammar;
use std::sync::Arc;
use tracing::debug;

/// Builds recipes with one grammar.
#[derive(Clone)]
pub struct Builder {
    grammar: Arc<dyn Grammar>,
}

impl Builder {
    pub fn new(grammar: Arc<dyn Grammar>) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    /// Build an unresolved recipe for `record_type`.
    pub fn build(&self, record_type: RecordType) -> Result<Recipe> {
        let root = self.build_tree(record_type)?;
        let strategy = self.strategy()?;
        let recipe = Recipe {
            root,
            arity: self.grammar.arity(),
            walk_mode: self.grammar.walk_mode(),
            resolved: false,
            record_type,
            strategy,
        };
        debug!(
            record = record_type.short_name(),
            grammar = self.grammar.key(),
            leaves = recipe.root.leaf_count(),
            operations = recipe.operation_count(),
            "built recipe"
        );
        Ok(recipe)
    }

    /// Build only the execution tree.
    pub fn build_tree(&self, record_type: RecordType) -> Result<ExecTree> {
        let fields = record_type
            .fields()
            .ok_or(Error::NotARecordType(record_type.name()))?;
        Ok(ExecTree {
            name: record_type.short_name().to_string(),
            index: 0,
            shape: Shape::Record,
            node: Node::Record {
                children: self.build_children(&fields)?,
                address: None,
            },
        })
    }

    fn strategy(&self) -> Result<Strategy> {
        let strategy = match self.grammar.walk_mode() {
            WalkMode::Combine => Strategy::Combine(self.grammar.combiner()?),
            WalkMode::Apply => Strategy::Apply(self.grammar.applier()?),
            WalkMode::Transform => Strategy::Transform(self.grammar.transformer()?),
        };
        Ok(strategy)
    }

    fn build_children(&self, fields: &[FieldDef]) -> Result<Vec<ExecTree>> {
        let mut children = Vec::new();
        for (index, def) in fields.iter().enumerate() {
            let node = match &def.kind {
                FieldKind::Nested { record, address } => {
                    let nested = record
                        .fields()
                        .ok_or(Error::NotARecordType(record.name()))
                        .and_then(|nested| self.build_children(&nested))
                        .map_err(|e| e.in_field(def.name))?;
                    // Nested records with nothing mapped are dropped like untagged fields.
                    if nested.is_empty() {
                        continue;
                    }
                    Node::Record {
                        children: nested,
                        address: Some(Arc::clone(address)),
                    }
                }
                FieldKind::Leaf { accessor, .. } => {
                    match self.build_leaf(def).map_err(|e| e.in_field(def.name))? {
                        Some((refs, policy)) => Node::Leaf(Leaf {
                            refs,
                            resolved: Vec::new(),
                            policy,
                            accessor: accessor.clone(),
                        }),
                        None => continue,
                    }
                }
            };
            children.push(ExecTree {
                name: def.name.to_string(),
                index,
                shape: def.shape(),
                node,
            });
        }
        Ok(children)
    }

    fn build_leaf(
        &self,
        def: &FieldDef,
    ) -> Result<Option<(Vec<OperationRef>, MultiOpPolicy)>> {
        let tag = match def.tag.get(self.grammar.key()) {
            Some(tag) if !tag.trim().is_empty() && tag.trim() != "-" => tag,
            _ => return Ok(None),
        };
        let ops = self
            .grammar
            .split(&tag)?
            .iter()
            .map(|op| self.grammar.parse(op))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let ops = self.grammar.order(ops)?;
        let policy = self.grammar.policy(&ops)?;
        Ok(Some((ops, policy)))
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("grammar", &self.grammar.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ErrorKind, GrammarError};
    use crate::core::fixtures::{self, Meta, Profile, Sparse, User};
    use crate::core::record::{Layout, Record};
    use crate::core::types::Arity;

    fn builder(grammar: impl Grammar + 'static) -> Builder {
        Builder::new(Arc::new(grammar))
    }

    #[test]
    fn test_rc010_build_user_tree() {
        let recipe = builder(fixtures::combine_grammar("bool_and"))
            .build(RecordType::of::<User>())
            .unwrap();
        assert!(!recipe.resolved);
        assert_eq!(recipe.walk_mode, WalkMode::Combine);
        assert_eq!(recipe.arity, Arity::Unary);
        assert_eq!(recipe.record_type, RecordType::of::<User>());
        assert_eq!(recipe.strategy.mode(), WalkMode::Combine);

        let names: Vec<_> = recipe.root.children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ID", "Meta"]);

        let id = recipe.root.find("ID").unwrap();
        assert_eq!(id.index, 0);
        assert_eq!(id.shape, Shape::Text);
        let leaf = id.leaf().unwrap();
        assert_eq!(leaf.refs, vec![OperationRef::new("upper")]);
        assert!(leaf.resolved.is_empty());
        assert!(leaf.accessor.is_fast());

        let meta = recipe.root.find("Meta").unwrap();
        assert_eq!(meta.index, 2);
        assert!(!meta.is_leaf());
        assert!(matches!(meta.node, Node::Record { address: Some(_), .. }));
        let flag = recipe.root.find("Meta.Flag").unwrap();
        assert_eq!(flag.leaf().unwrap().refs[0].name, "istrue");
        assert!(recipe.root.find("Meta.Note").is_none());
        assert!(recipe.root.find("Age").is_none());
    }

    #[test]
    fn test_rc010_other_grammar_key() {
        let recipe = builder(fixtures::apply_grammar())
            .build(RecordType::of::<Meta>())
            .unwrap();
        let names: Vec<_> = recipe.root.children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Flag", "Note"]);
        assert_eq!(recipe.strategy.mode(), WalkMode::Apply);
    }

    #[test]
    fn test_rc010_empty_nested_record_is_dropped() {
        let recipe = builder(fixtures::combine_grammar("collect"))
            .build(RecordType::of::<Sparse>())
            .unwrap();
        assert_eq!(recipe.root.children().len(), 1);
        assert_eq!(recipe.root.leaf_count(), 1);
    }

    #[test]
    fn test_rc010_generic_accessors_for_compound_fields() {
        let recipe = builder(fixtures::combine_grammar("collect"))
            .build(RecordType::of::<Profile>())
            .unwrap();
        let tags = recipe.root.find("Tags").unwrap();
        assert_eq!(tags.shape, Shape::Seq);
        assert!(!tags.leaf().unwrap().accessor.is_fast());
        assert!(recipe.root.find("Score").is_none());
    }

    #[test]
    fn test_rc010_rejects_non_record() {
        let err = builder(fixtures::combine_grammar("bool_and"))
            .build(RecordType::of_value::<u32>(Shape::U32))
            .unwrap_err();
        assert!(matches!(err, Error::NotARecordType(_)));
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_rc010_deterministic_outline() {
        let b = builder(fixtures::combine_grammar("bool_and"));
        let first = b.build(RecordType::of::<User>()).unwrap().outline();
        let second = b.build(RecordType::of::<User>()).unwrap().outline();
        assert_eq!(first, second);
        assert!(first.starts_with("User combine unary\n"));
        assert!(first.contains("Meta.Flag #0 bool fast [istrue] first_success"));
    }

    #[derive(Debug, Default)]
    struct Deep {
        name: String,
    }

    impl Record for Deep {
        fn layout(fields: &mut Layout<Self>) {
            fields.field("Name", r#"op:"upper,bogus""#, |d| &d.name, |d| &mut d.name);
        }
    }

    #[derive(Debug, Default)]
    struct Middle {
        deep: Deep,
    }

    impl Record for Middle {
        fn layout(fields: &mut Layout<Self>) {
            fields.nested("Deep", |m| &m.deep, |m| &mut m.deep);
        }
    }

    #[derive(Debug, Default)]
    struct Top {
        middle: Middle,
    }

    impl Record for Top {
        fn layout(fields: &mut Layout<Self>) {
            fields.nested("Middle", |t| &t.middle, |t| &mut t.middle);
        }
    }

    #[test]
    fn test_rc010_errors_annotated_at_every_level() {
        let err = builder(fixtures::combine_grammar("bool_and"))
            .build(RecordType::of::<Top>())
            .unwrap_err();
        assert_eq!(err.path(), "Middle.Deep.Name");
        assert!(matches!(err.root(), Error::Grammar(GrammarError::Parse { .. })));
        assert_eq!(err.kind(), ErrorKind::Grammar);
    }

    #[derive(Debug, Default)]
    struct Twice {
        name: String,
    }

    impl Record for Twice {
        fn layout(fields: &mut Layout<Self>) {
            fields.field("Name", r#"op:"upper;lower;upper""#, |t| &t.name, |t| &mut t.name);
        }
    }

    #[test]
    fn test_rc010_duplicate_operations_fail_ordering() {
        let err = builder(fixtures::combine_grammar("bool_and"))
            .build(RecordType::of::<Twice>())
            .unwrap_err();
        assert_eq!(err.path(), "Name");
        assert!(matches!(err.root(), Error::Grammar(GrammarError::Order(_))));
    }

    #[derive(Debug, Default)]
    struct Policies {
        a: String,
        b: String,
    }

    impl Record for Policies {
        fn layout(fields: &mut Layout<Self>) {
            fields
                .field("A", r#"op:"upper;lower""#, |p| &p.a, |p| &mut p.a)
                .field("B", r#"op:"upper,policy=all;lower""#, |p| &p.b, |p| &mut p.b);
        }
    }

    #[test]
    fn test_rc010_policy_per_field() {
        let recipe = builder(fixtures::combine_grammar("collect"))
            .build(RecordType::of::<Policies>())
            .unwrap();
        let policy = |path: &str| recipe.root.find(path).unwrap().leaf().unwrap().policy;
        assert_eq!(policy("A"), MultiOpPolicy::FirstSuccess);
        assert_eq!(policy("B"), MultiOpPolicy::AllOrNothing);
    }

    struct TransformGrammar;

    impl Grammar for TransformGrammar {
        fn key(&self) -> &str {
            "op"
        }

        fn walk_mode(&self) -> WalkMode {
            WalkMode::Transform
        }

        fn arity(&self) -> Arity {
            Arity::Unary
        }

        fn split(&self, tag: &str) -> std::result::Result<Vec<String>, GrammarError> {
            Ok(vec![tag.to_string()])
        }

        fn parse(&self, op: &str) -> std::result::Result<OperationRef, GrammarError> {
            Ok(OperationRef::new(op))
        }
    }

    #[test]
    fn test_rc010_missing_strategy_fails_build() {
        let err = builder(TransformGrammar)
            .build(RecordType::of::<User>())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Grammar(GrammarError::NotApplicable {
                strategy: "transformer",
                mode: WalkMode::Transform,
                ..
            })
        ));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let tree = builder(TransformGrammar)
            .build_tree(RecordType::of::<User>())
            .unwrap();
        assert_eq!(tree.leaf_count(), 2);
    }
}
