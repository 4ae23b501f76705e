//! Record types, operations and grammars shared by the unit tests.

use super::error::OpError;
use super::operation::OpRegistry;
use super::record::{Layout, Record};
use super::types::{Arity, Shape, Value};
use crate::grammar::FlatGrammar;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub flag: bool,
    pub note: String,
}

impl Record for Meta {
    fn layout(fields: &mut Layout<Self>) {
        fields
            .field("Flag", r#"op:"istrue" bind:"echo""#, |m| &m.flag, |m| &mut m.flag)
            .field("Note", r#"op:"-" bind:"echo""#, |m| &m.note, |m| &mut m.note);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: String,
    pub age: u8,
    pub meta: Meta,
}

impl Record for User {
    fn layout(fields: &mut Layout<Self>) {
        fields
            .field("ID", r#"op:"upper" bind:"echo""#, |u| &u.id, |u| &mut u.id)
            .field("Age", "", |u| &u.age, |u| &mut u.age)
            .nested("Meta", |u| &u.meta, |u| &mut u.meta);
    }
}

/// Record whose nested record has no mapped fields.
#[derive(Debug, Clone, Default)]
pub struct Sparse {
    pub name: String,
    pub untagged: Untagged,
}

#[derive(Debug, Clone, Default)]
pub struct Untagged {
    pub value: i32,
}

impl Record for Untagged {
    fn layout(fields: &mut Layout<Self>) {
        fields.field("Value", r#"json:"value""#, |u| &u.value, |u| &mut u.value);
    }
}

impl Record for Sparse {
    fn layout(fields: &mut Layout<Self>) {
        fields
            .field("Name", r#"op:"upper""#, |s| &s.name, |s| &mut s.name)
            .nested("Untagged", |s| &s.untagged, |s| &mut s.untagged);
    }
}

/// Record with compound fields.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub tags: Vec<String>,
    pub attrs: IndexMap<String, i64>,
    pub score: Option<f64>,
}

impl Record for Profile {
    fn layout(fields: &mut Layout<Self>) {
        fields
            .generic("Tags", r#"op:"count" bind:"echo""#, Shape::Seq, |p| &p.tags, |p| &mut p.tags)
            .generic("Attrs", r#"op:"count""#, Shape::Map, |p| &p.attrs, |p| &mut p.attrs)
            .optional("Score", r#"bind:"echo""#, |p| &p.score, |p| &mut p.score);
    }
}

fn text(sources: &[Value]) -> Result<String, OpError> {
    match sources.first() {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(OpError::new("no source value")),
    }
}

/// Registry with the operations used across tests. `calls` counts every
/// invocation of `tracked`.
pub fn registry(calls: Arc<AtomicUsize>) -> OpRegistry {
    let registry = OpRegistry::new();
    registry.register_fn("upper", Arity::Unary, |_, sources| {
        Ok(Value::Text(text(sources)?.to_uppercase()))
    });
    registry.register_fn("lower", Arity::Unary, |_, sources| {
        Ok(Value::Text(text(sources)?.to_lowercase()))
    });
    registry.register_fn("istrue", Arity::Unary, |_, sources| match sources.first() {
        Some(Value::Bool(b)) => Ok(Value::Bool(*b)),
        _ => Err(OpError::new("expected a bool")),
    });
    registry.register_fn("nonempty", Arity::Unary, |_, sources| {
        Ok(Value::Bool(!sources.first().map(Value::is_empty).unwrap_or(true)))
    });
    registry.register_fn("count", Arity::Unary, |_, sources| match sources.first() {
        Some(Value::List(items)) => Ok(Value::Uint(items.len() as u64)),
        Some(Value::Map(entries)) => Ok(Value::Uint(entries.len() as u64)),
        _ => Err(OpError::new("expected a collection")),
    });
    registry.register_fn("echo", Arity::Unary, |_, sources| {
        sources
            .first()
            .cloned()
            .ok_or_else(|| OpError::new("no source value"))
    });
    registry.register_fn("null", Arity::Unary, |_, _| Ok(Value::Null));
    registry.register_fn("empty", Arity::Unary, |_, _| Ok(Value::Text(String::new())));
    registry.register_fn("fail", Arity::Unary, |_, _| Err(OpError::new("always fails")));
    registry.register_fn("join", Arity::Variadic, |_, sources| {
        let parts: Vec<String> = sources.iter().map(Value::to_string).collect();
        Ok(Value::Text(parts.join("+")))
    });
    registry.register_fn("tracked", Arity::Unary, move |_, sources| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Text(text(sources)?))
    });
    registry
}

/// Combine grammar over the `op` key with the given combiner kind.
pub fn combine_grammar(combiner: &str) -> FlatGrammar {
    let yaml = format!("key: op\nwalk_mode: combine\ncombiner: {}\n", combiner);
    grammar_from_yaml(&yaml)
}

/// Apply grammar over the `bind` key with the setter applier.
pub fn apply_grammar() -> FlatGrammar {
    grammar_from_yaml("key: bind\nwalk_mode: apply\napplier: setter\n")
}

pub fn grammar_from_yaml(yaml: &str) -> FlatGrammar {
    FlatGrammar::from_yaml(yaml).unwrap()
}
