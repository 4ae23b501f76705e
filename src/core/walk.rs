//! RC-005: Walk strategies — how operation results leave the tree.
//!
//! A combine walk folds results with a [`Combiner`]; an apply walk hands
//! each result to an [`Applier`] together with the field it belongs to.
//! [`Transformer`] is declared for recipes built in transform mode and is
//! never driven by the executor.

use super::error::Result;
use super::record::FieldAccessor;
use super::types::{Shape, Value};
use std::any::Any;

/// Folds operation results into one value.
pub trait Combiner: Send + Sync {
    /// Seed of every fold. Folding against it must not change a result.
    fn zero(&self) -> Value;

    fn combine(&self, acc: Value, result: Value) -> Value;
}

/// Writes an operation result into a field of one instance.
pub trait Applier: Send + Sync {
    fn apply(&self, instance: &mut dyn Any, field: &FieldSlot<'_>, value: Value) -> Result<()>;
}

/// Rewrites an instance in place.
pub trait Transformer: Send + Sync {
    fn transform(&self, instance: &mut dyn Any) -> Result<()>;
}

/// The field an applier is asked to write.
#[derive(Debug, Clone, Copy)]
pub struct FieldSlot<'a> {
    pub name: &'a str,
    pub shape: Shape,
    pub accessor: &'a FieldAccessor,
}

// ============================================================================
// Stock combiners
// ============================================================================

/// Logical AND over boolean results. `Null` leaves the accumulator alone;
/// any other non-boolean counts as true when it is non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolAndCombiner;

impl BoolAndCombiner {
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => true,
            other => !other.is_empty(),
        }
    }
}

impl Combiner for BoolAndCombiner {
    fn zero(&self) -> Value {
        Value::Bool(true)
    }

    fn combine(&self, acc: Value, result: Value) -> Value {
        Value::Bool(Self::truthy(&acc) && Self::truthy(&result))
    }
}

/// Concatenates results rendered as text, optionally separated.
/// Null and empty results add nothing.
#[derive(Debug, Clone, Default)]
pub struct StringConcatCombiner {
    separator: String,
}

impl StringConcatCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Combiner for StringConcatCombiner {
    fn zero(&self) -> Value {
        Value::Text(String::new())
    }

    fn combine(&self, acc: Value, result: Value) -> Value {
        let mut text = match acc {
            Value::Null => String::new(),
            Value::Text(s) => s,
            other => other.to_string(),
        };
        if result.is_empty() {
            return Value::Text(text);
        }
        if !text.is_empty() {
            text.push_str(&self.separator);
        }
        match result {
            Value::Text(s) => text.push_str(&s),
            other => text.push_str(&other.to_string()),
        }
        Value::Text(text)
    }
}

/// Collects results into a flat list in walk order. List results (nested
/// records folded with this combiner) are spliced in; nulls are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectCombiner;

impl Combiner for CollectCombiner {
    fn zero(&self) -> Value {
        Value::List(Vec::new())
    }

    fn combine(&self, acc: Value, result: Value) -> Value {
        let mut items = match acc {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        match result {
            Value::Null => {}
            Value::List(more) => items.extend(more),
            other => items.push(other),
        }
        Value::List(items)
    }
}

// ============================================================================
// Stock applier
// ============================================================================

/// Writes through the field's precompiled accessor, converting the value to
/// the field's shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetterApplier;

impl Applier for SetterApplier {
    fn apply(&self, instance: &mut dyn Any, field: &FieldSlot<'_>, value: Value) -> Result<()> {
        field.accessor.write(instance, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{AccessError, Error};
    use crate::core::record::{Layout, Record, RecordType};

    fn fold(combiner: &dyn Combiner, results: Vec<Value>) -> Value {
        results
            .into_iter()
            .fold(combiner.zero(), |acc, r| combiner.combine(acc, r))
    }

    #[test]
    fn test_rc005_bool_and() {
        let and = BoolAndCombiner;
        assert_eq!(fold(&and, vec![]), Value::Bool(true));
        assert_eq!(fold(&and, vec![true.into(), true.into()]), Value::Bool(true));
        assert_eq!(fold(&and, vec![true.into(), false.into(), true.into()]), Value::Bool(false));
        assert_eq!(fold(&and, vec![Value::Null]), Value::Bool(true));
        assert_eq!(fold(&and, vec![Value::from("")]), Value::Bool(false));
    }

    #[test]
    fn test_rc005_string_concat() {
        let concat = StringConcatCombiner::new();
        assert_eq!(fold(&concat, vec!["a".into(), "b".into()]), Value::from("ab"));
        assert_eq!(fold(&concat, vec![Value::Int(1), Value::Null]), Value::from("1"));

        let joined = StringConcatCombiner::with_separator(", ");
        assert_eq!(
            fold(&joined, vec!["a".into(), "".into(), "c".into()]),
            Value::from("a, c")
        );
    }

    #[test]
    fn test_rc005_collect_flattens() {
        let collect = CollectCombiner;
        let inner = fold(&collect, vec![Value::Int(2), Value::Int(3)]);
        let outer = fold(&collect, vec![Value::Int(1), inner, Value::Null]);
        assert_eq!(
            outer,
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_rc005_zero_is_identity() {
        let combiners: Vec<Box<dyn Combiner>> = vec![
            Box::new(BoolAndCombiner),
            Box::new(StringConcatCombiner::with_separator("-")),
            Box::new(CollectCombiner),
        ];
        let samples = [Value::Bool(false), Value::from("x"), Value::List(vec![Value::Int(1)])];
        for (combiner, sample) in combiners.iter().zip(samples) {
            let finished = combiner.combine(combiner.zero(), sample.clone());
            assert_eq!(finished, combiner.combine(sample, combiner.zero()));
        }
    }

    #[derive(Debug, Default)]
    struct Target {
        count: u8,
    }

    impl Record for Target {
        fn layout(fields: &mut Layout<Self>) {
            fields.field("Count", r#"bind:"n""#, |t| &t.count, |t| &mut t.count);
        }
    }

    #[test]
    fn test_rc005_setter_applier_converts() {
        let fields = RecordType::of::<Target>().fields().unwrap();
        let accessor = match &fields[0].kind {
            crate::core::record::FieldKind::Leaf { accessor, .. } => accessor.clone(),
            crate::core::record::FieldKind::Nested { .. } => unreachable!(),
        };
        let slot = FieldSlot {
            name: "Count",
            shape: Shape::U8,
            accessor: &accessor,
        };
        let mut target = Target::default();
        SetterApplier
            .apply(&mut target, &slot, Value::from("12"))
            .unwrap();
        assert_eq!(target.count, 12);

        let err = SetterApplier
            .apply(&mut target, &slot, Value::Int(300))
            .unwrap_err();
        assert!(matches!(err, Error::Access(AccessError::OutOfRange { .. })));
        assert_eq!(target.count, 12);
    }
}
