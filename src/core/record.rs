//! RC-003: Record layout — how a type describes its fields to the builder.
//!
//! A record type implements [`Record`] and declares, once, the fields that
//! participate in recipes: name, tag string, shape and typed accessor
//! functions. The builder turns those declarations into precompiled
//! accessors, so the walk never needs generic reflection for scalar fields.
//!
//! ```ignore
//! impl Record for User {
//!     fn layout(fields: &mut Layout<Self>) {
//!         fields
//!             .field("ID", r#"op:"upper""#, |u| &u.id, |u| &mut u.id)
//!             .nested("Meta", |u| &u.meta, |u| &mut u.meta);
//!     }
//! }
//! ```

use super::error::AccessError;
use super::types::{Shape, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ============================================================================
// Record trait and descriptor
// ============================================================================

/// A type whose fields can be walked by recipes.
pub trait Record: Any + Send + Sync + Sized {
    /// Declare the participating fields in declaration order.
    fn layout(fields: &mut Layout<Self>);
}

/// Type descriptor used as the recipe cache key.
///
/// Descriptors for non-record types exist so callers holding a type-erased
/// value can ask for a recipe and get `NotARecordType` back.
#[derive(Clone, Copy)]
pub struct RecordType {
    id: TypeId,
    name: &'static str,
    shape: Shape,
    layout: Option<fn() -> Vec<FieldDef>>,
}

impl RecordType {
    pub fn of<R: Record>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: type_name::<R>(),
            shape: Shape::Record,
            layout: Some(collect_layout::<R>),
        }
    }

    /// Descriptor for a value that is not a record.
    pub fn of_value<T: Any>(shape: Shape) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            shape,
            layout: None,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn is_record(&self) -> bool {
        self.layout.is_some()
    }

    /// Field declarations, or `None` when the type is not a record.
    pub fn fields(&self) -> Option<Vec<FieldDef>> {
        self.layout.map(|layout| layout())
    }

    /// Last path segment of the type name (`my_crate::User` → `User`).
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordType {}

impl Hash for RecordType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish()
    }
}

fn collect_layout<R: Record>() -> Vec<FieldDef> {
    let mut layout = Layout::new();
    R::layout(&mut layout);
    layout.fields
}

// ============================================================================
// Tags
// ============================================================================

/// A field's tag string in Go struct-tag syntax: `key:"value" other:"v2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(&'static str);

impl Tag {
    pub fn new(raw: &'static str) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &'static str {
        self.0
    }

    /// Value associated with `key`, unquoted. `None` when the key is absent
    /// or the tag is malformed from that point on.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut rest = self.0;
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                return None;
            }

            let name_len = rest
                .find(|c: char| c <= ' ' || c == ':' || c == '"' || c == '\x7f')
                .unwrap_or(rest.len());
            if name_len == 0 || !rest[name_len..].starts_with(":\"") {
                return None;
            }
            let name = &rest[..name_len];
            rest = &rest[name_len + 1..];

            let close = closing_quote(rest)?;
            let quoted = &rest[..=close];
            rest = &rest[close + 1..];

            if name == key {
                return unquote(quoted);
            }
        }
    }
}

/// Byte index of the quote closing the string that starts at `s[0]`.
fn closing_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn unquote(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            other => out.push(other),
        }
    }
    Some(out)
}

// ============================================================================
// Scalars
// ============================================================================

/// Field types read and written through the fast accessor path.
pub trait Scalar: Any + Send + Sync + Sized {
    const SHAPE: Shape;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, AccessError>;
}

fn incompatible(shape: Shape, value: &Value) -> AccessError {
    AccessError::Incompatible {
        shape,
        found: value.kind_name(),
    }
}

macro_rules! impl_signed {
    ($($ty:ty => $shape:ident),* $(,)?) => {$(
        impl Scalar for $ty {
            const SHAPE: Shape = Shape::$shape;

            fn to_value(&self) -> Value {
                Value::Int(*self as i64)
            }

            fn from_value(value: Value) -> Result<Self, AccessError> {
                let out_of_range = |v: &dyn fmt::Display| AccessError::OutOfRange {
                    shape: Shape::$shape,
                    value: v.to_string(),
                };
                match value {
                    Value::Int(n) => <$ty>::try_from(n).map_err(|_| out_of_range(&n)),
                    Value::Uint(n) => <$ty>::try_from(n).map_err(|_| out_of_range(&n)),
                    Value::Text(s) => s.trim().parse::<$ty>().map_err(|_| AccessError::Parse {
                        shape: Shape::$shape,
                        text: s,
                    }),
                    other => Err(incompatible(Shape::$shape, &other)),
                }
            }
        }
    )*};
}

macro_rules! impl_unsigned {
    ($($ty:ty => $shape:ident),* $(,)?) => {$(
        impl Scalar for $ty {
            const SHAPE: Shape = Shape::$shape;

            fn to_value(&self) -> Value {
                Value::Uint(*self as u64)
            }

            fn from_value(value: Value) -> Result<Self, AccessError> {
                let out_of_range = |v: &dyn fmt::Display| AccessError::OutOfRange {
                    shape: Shape::$shape,
                    value: v.to_string(),
                };
                match value {
                    Value::Uint(n) => <$ty>::try_from(n).map_err(|_| out_of_range(&n)),
                    Value::Int(n) => <$ty>::try_from(n).map_err(|_| out_of_range(&n)),
                    Value::Text(s) => s.trim().parse::<$ty>().map_err(|_| AccessError::Parse {
                        shape: Shape::$shape,
                        text: s,
                    }),
                    other => Err(incompatible(Shape::$shape, &other)),
                }
            }
        }
    )*};
}

macro_rules! impl_float {
    ($($ty:ty => $shape:ident),* $(,)?) => {$(
        impl Scalar for $ty {
            const SHAPE: Shape = Shape::$shape;

            fn to_value(&self) -> Value {
                Value::Float(*self as f64)
            }

            fn from_value(value: Value) -> Result<Self, AccessError> {
                match value {
                    Value::Float(f) => Ok(f as $ty),
                    Value::Int(n) => Ok(n as $ty),
                    Value::Uint(n) => Ok(n as $ty),
                    Value::Text(s) => s.trim().parse::<$ty>().map_err(|_| AccessError::Parse {
                        shape: Shape::$shape,
                        text: s,
                    }),
                    other => Err(incompatible(Shape::$shape, &other)),
                }
            }
        }
    )*};
}

impl_signed!(i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => Isize);
impl_unsigned!(u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => Usize);
impl_float!(f32 => F32, f64 => F64);

impl Scalar for bool {
    const SHAPE: Shape = Shape::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, AccessError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(AccessError::Parse {
                    shape: Shape::Bool,
                    text: s,
                }),
            },
            other => Err(incompatible(Shape::Bool, &other)),
        }
    }
}

impl Scalar for String {
    const SHAPE: Shape = Shape::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, AccessError> {
        match value {
            Value::Text(s) => Ok(s),
            v @ (Value::Bool(_) | Value::Int(_) | Value::Uint(_) | Value::Float(_)) => {
                Ok(v.to_string())
            }
            other => Err(incompatible(Shape::Text, &other)),
        }
    }
}

/// Value of a `default=` modifier for a field of `shape`, parsed with the
/// rules the setter applies on write. Text stays text only for text fields.
pub(crate) fn parse_default(shape: Shape, text: &str) -> Result<Value, AccessError> {
    let raw = || Value::Text(text.to_string());
    let value = match shape {
        Shape::Bool => bool::from_value(raw())?.to_value(),
        Shape::I8 => i8::from_value(raw())?.to_value(),
        Shape::I16 => i16::from_value(raw())?.to_value(),
        Shape::I32 => i32::from_value(raw())?.to_value(),
        Shape::I64 => i64::from_value(raw())?.to_value(),
        Shape::Isize => isize::from_value(raw())?.to_value(),
        Shape::U8 => u8::from_value(raw())?.to_value(),
        Shape::U16 => u16::from_value(raw())?.to_value(),
        Shape::U32 => u32::from_value(raw())?.to_value(),
        Shape::U64 => u64::from_value(raw())?.to_value(),
        Shape::Usize => usize::from_value(raw())?.to_value(),
        Shape::F32 => f32::from_value(raw())?.to_value(),
        Shape::F64 => f64::from_value(raw())?.to_value(),
        Shape::Seq | Shape::Array | Shape::Map => {
            Value::from(serde_json::from_str::<serde_json::Value>(text)?)
        }
        Shape::Ref | Shape::Dynamic => infer_scalar(text),
        Shape::Text | Shape::Record => raw(),
    };
    Ok(value)
}

/// Literal scalar for fields whose concrete type is only known on write.
fn infer_scalar(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        Value::Bool(b)
    } else if let Ok(n) = trimmed.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(n) = trimmed.parse::<u64>() {
        Value::Uint(n)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Text(text.to_string())
    }
}

// ============================================================================
// Accessors
// ============================================================================

/// Precompiled read/write access to one field of a type-erased owner.
pub trait FieldAccess: Send + Sync {
    fn read(&self, owner: &dyn Any) -> Result<Value, AccessError>;

    fn write(&self, owner: &mut dyn Any, value: Value) -> Result<(), AccessError>;
}

/// Field accessor chosen at build time from the field's shape.
#[derive(Clone)]
pub enum FieldAccessor {
    /// Typed, fixed-layout access for scalar, text and optional shapes.
    Fast(Arc<dyn FieldAccess>),
    /// Serde-backed access for sequence, array, map and dynamic shapes.
    Generic(Arc<dyn FieldAccess>),
}

impl FieldAccessor {
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast(_))
    }

    pub fn read(&self, owner: &dyn Any) -> Result<Value, AccessError> {
        match self {
            Self::Fast(access) | Self::Generic(access) => access.read(owner),
        }
    }

    pub fn write(&self, owner: &mut dyn Any, value: Value) -> Result<(), AccessError> {
        match self {
            Self::Fast(access) | Self::Generic(access) => access.write(owner, value),
        }
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast(_) => write!(f, "Fast"),
            Self::Generic(_) => write!(f, "Generic"),
        }
    }
}

/// Precompiled addressing of a nested record inside its parent.
pub trait ChildAddress: Send + Sync {
    fn address<'a>(&self, parent: &'a dyn Any) -> Result<&'a dyn Any, AccessError>;

    fn address_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<&'a mut dyn Any, AccessError>;
}

struct ScalarSlot<R, F> {
    get: fn(&R) -> &F,
    get_mut: fn(&mut R) -> &mut F,
}

impl<R: Any, F: Scalar> FieldAccess for ScalarSlot<R, F> {
    fn read(&self, owner: &dyn Any) -> Result<Value, AccessError> {
        Ok((self.get)(downcast::<R>(owner)?).to_value())
    }

    fn write(&self, owner: &mut dyn Any, value: Value) -> Result<(), AccessError> {
        let converted = F::from_value(value)?;
        *(self.get_mut)(downcast_mut::<R>(owner)?) = converted;
        Ok(())
    }
}

struct OptionalSlot<R, F> {
    get: fn(&R) -> &Option<F>,
    get_mut: fn(&mut R) -> &mut Option<F>,
}

impl<R: Any, F: Scalar> FieldAccess for OptionalSlot<R, F> {
    fn read(&self, owner: &dyn Any) -> Result<Value, AccessError> {
        Ok(match (self.get)(downcast::<R>(owner)?) {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        })
    }

    fn write(&self, owner: &mut dyn Any, value: Value) -> Result<(), AccessError> {
        let converted = match value {
            Value::Null => None,
            other => Some(F::from_value(other)?),
        };
        *(self.get_mut)(downcast_mut::<R>(owner)?) = converted;
        Ok(())
    }
}

struct SerdeSlot<R, F> {
    get: fn(&R) -> &F,
    get_mut: fn(&mut R) -> &mut F,
}

impl<R, F> FieldAccess for SerdeSlot<R, F>
where
    R: Any,
    F: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn read(&self, owner: &dyn Any) -> Result<Value, AccessError> {
        let json = serde_json::to_value((self.get)(downcast::<R>(owner)?))?;
        Ok(Value::from(json))
    }

    fn write(&self, owner: &mut dyn Any, value: Value) -> Result<(), AccessError> {
        let converted: F = serde_json::from_value(value.to_json())?;
        *(self.get_mut)(downcast_mut::<R>(owner)?) = converted;
        Ok(())
    }
}

struct NestedSlot<P, C> {
    get: fn(&P) -> &C,
    get_mut: fn(&mut P) -> &mut C,
}

impl<P: Any, C: Any> ChildAddress for NestedSlot<P, C> {
    fn address<'a>(&self, parent: &'a dyn Any) -> Result<&'a dyn Any, AccessError> {
        let child: &C = (self.get)(downcast::<P>(parent)?);
        Ok(child)
    }

    fn address_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<&'a mut dyn Any, AccessError> {
        let child: &mut C = (self.get_mut)(downcast_mut::<P>(parent)?);
        Ok(child)
    }
}

fn downcast<R: Any>(owner: &dyn Any) -> Result<&R, AccessError> {
    owner
        .downcast_ref::<R>()
        .ok_or(AccessError::OwnerMismatch {
            expected: type_name::<R>(),
        })
}

fn downcast_mut<R: Any>(owner: &mut dyn Any) -> Result<&mut R, AccessError> {
    owner
        .downcast_mut::<R>()
        .ok_or(AccessError::OwnerMismatch {
            expected: type_name::<R>(),
        })
}

// ============================================================================
// Layout
// ============================================================================

/// One declared field.
#[derive(Clone)]
pub struct FieldDef {
    pub(crate) name: &'static str,
    pub(crate) tag: Tag,
    pub(crate) kind: FieldKind,
}

#[derive(Clone)]
pub(crate) enum FieldKind {
    Leaf {
        shape: Shape,
        accessor: FieldAccessor,
    },
    Nested {
        record: RecordType,
        address: Arc<dyn ChildAddress>,
    },
}

impl FieldDef {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn shape(&self) -> Shape {
        match &self.kind {
            FieldKind::Leaf { shape, .. } => *shape,
            FieldKind::Nested { .. } => Shape::Record,
        }
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("tag", &self.tag.raw())
            .field("shape", &self.shape())
            .finish()
    }
}

/// Field declarations collected by [`Record::layout`].
pub struct Layout<R> {
    fields: Vec<FieldDef>,
    _record: std::marker::PhantomData<fn(R)>,
}

impl<R: Record> Layout<R> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            _record: std::marker::PhantomData,
        }
    }

    /// Scalar or text field, read and written through the fast path.
    pub fn field<F: Scalar>(
        &mut self,
        name: &'static str,
        tag: &'static str,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
    ) -> &mut Self {
        self.push_leaf(
            name,
            tag,
            F::SHAPE,
            FieldAccessor::Fast(Arc::new(ScalarSlot { get, get_mut })),
        )
    }

    /// `Option<scalar>` field; `None` reads as [`Value::Null`].
    pub fn optional<F: Scalar>(
        &mut self,
        name: &'static str,
        tag: &'static str,
        get: fn(&R) -> &Option<F>,
        get_mut: fn(&mut R) -> &mut Option<F>,
    ) -> &mut Self {
        self.push_leaf(
            name,
            tag,
            Shape::Ref,
            FieldAccessor::Fast(Arc::new(OptionalSlot { get, get_mut })),
        )
    }

    /// Compound field (sequence, array, map, dynamic) accessed through serde.
    /// Scalar and record shapes belong to `field`, `optional` and `nested`.
    pub fn generic<F>(
        &mut self,
        name: &'static str,
        tag: &'static str,
        shape: Shape,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
    ) -> &mut Self
    where
        F: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        debug_assert!(
            !shape.is_fast() && !shape.is_record(),
            "generic field `{}` needs a compound shape, got {}",
            name,
            shape
        );
        self.push_leaf(
            name,
            tag,
            shape,
            FieldAccessor::Generic(Arc::new(SerdeSlot { get, get_mut })),
        )
    }

    /// Nested record; its own layout is walked recursively.
    pub fn nested<C: Record>(
        &mut self,
        name: &'static str,
        get: fn(&R) -> &C,
        get_mut: fn(&mut R) -> &mut C,
    ) -> &mut Self {
        self.fields.push(FieldDef {
            name,
            tag: Tag::new(""),
            kind: FieldKind::Nested {
                record: RecordType::of::<C>(),
                address: Arc::new(NestedSlot { get, get_mut }),
            },
        });
        self
    }

    fn push_leaf(
        &mut self,
        name: &'static str,
        tag: &'static str,
        shape: Shape,
        accessor: FieldAccessor,
    ) -> &mut Self {
        self.fields.push(FieldDef {
            name,
            tag: Tag::new(tag),
            kind: FieldKind::Leaf { shape, accessor },
        });
        self
    }
}

// ============================================================================
// Type-erased instances
// ============================================================================

/// Object-safe view of a record instance handed to the executor.
pub trait Walked: Any + Send + Sync {
    fn record_type(&self) -> RecordType;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<R: Record> Walked for R {
    fn record_type(&self) -> RecordType {
        RecordType::of::<R>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[derive(Debug, Default)]
    struct Inner {
        flag: bool,
    }

    impl Record for Inner {
        fn layout(fields: &mut Layout<Self>) {
            fields.field("Flag", r#"op:"istrue""#, |r| &r.flag, |r| &mut r.flag);
        }
    }

    #[derive(Debug, Default)]
    struct Outer {
        id: String,
        count: u16,
        score: Option<f64>,
        tags: Vec<String>,
        attrs: IndexMap<String, i64>,
        inner: Inner,
    }

    impl Record for Outer {
        fn layout(fields: &mut Layout<Self>) {
            fields
                .field("ID", r#"op:"upper""#, |r| &r.id, |r| &mut r.id)
                .field("Count", "", |r| &r.count, |r| &mut r.count)
                .optional("Score", r#"op:"-""#, |r| &r.score, |r| &mut r.score)
                .generic("Tags", r#"op:"join""#, Shape::Seq, |r| &r.tags, |r| &mut r.tags)
                .generic("Attrs", "", Shape::Map, |r| &r.attrs, |r| &mut r.attrs)
                .nested("Inner", |r| &r.inner, |r| &mut r.inner);
        }
    }

    fn leaf(fields: &[FieldDef], name: &str) -> FieldAccessor {
        let def = fields.iter().find(|f| f.name == name).unwrap();
        match &def.kind {
            FieldKind::Leaf { accessor, .. } => accessor.clone(),
            FieldKind::Nested { .. } => panic!("{} is nested", name),
        }
    }

    #[test]
    fn test_rc003_tag_lookup() {
        let tag = Tag::new(r#"json:"id,omitempty" op:"[trim][upper]" mask:"a\"b""#);
        assert_eq!(tag.get("json").as_deref(), Some("id,omitempty"));
        assert_eq!(tag.get("op").as_deref(), Some("[trim][upper]"));
        assert_eq!(tag.get("mask").as_deref(), Some("a\"b"));
        assert_eq!(tag.get("missing"), None);
    }

    #[test]
    fn test_rc003_tag_malformed() {
        assert_eq!(Tag::new("op").get("op"), None);
        assert_eq!(Tag::new(r#"op:"unterminated"#).get("op"), None);
        assert_eq!(Tag::new("").get("op"), None);
    }

    #[test]
    fn test_rc003_layout_declaration_order_and_shapes() {
        let fields = RecordType::of::<Outer>().fields().unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["ID", "Count", "Score", "Tags", "Attrs", "Inner"]);
        let shapes: Vec<_> = fields.iter().map(|f| f.shape()).collect();
        assert_eq!(
            shapes,
            vec![Shape::Text, Shape::U16, Shape::Ref, Shape::Seq, Shape::Map, Shape::Record]
        );
    }

    #[test]
    fn test_rc003_fast_and_generic_accessors() {
        let fields = RecordType::of::<Outer>().fields().unwrap();
        assert!(leaf(&fields, "ID").is_fast());
        assert!(leaf(&fields, "Score").is_fast());
        assert!(!leaf(&fields, "Tags").is_fast());

        let mut outer = Outer {
            id: "abc".into(),
            tags: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        assert_eq!(leaf(&fields, "ID").read(&outer).unwrap(), Value::from("abc"));
        assert_eq!(leaf(&fields, "Score").read(&outer).unwrap(), Value::Null);
        assert_eq!(
            leaf(&fields, "Tags").read(&outer).unwrap(),
            Value::List(vec!["x".into(), "y".into()])
        );

        leaf(&fields, "Count").write(&mut outer, Value::Text("42".into())).unwrap();
        leaf(&fields, "Score").write(&mut outer, Value::Int(3)).unwrap();
        leaf(&fields, "Tags")
            .write(&mut outer, Value::List(vec!["z".into()]))
            .unwrap();
        assert_eq!(outer.count, 42);
        assert_eq!(outer.score, Some(3.0));
        assert_eq!(outer.tags, vec!["z".to_string()]);
    }

    #[test]
    fn test_rc003_write_rejects_incompatible_values() {
        let fields = RecordType::of::<Outer>().fields().unwrap();
        let mut outer = Outer::default();
        let err = leaf(&fields, "Count").write(&mut outer, Value::Int(70_000)).unwrap_err();
        assert!(matches!(err, AccessError::OutOfRange { shape: Shape::U16, .. }));
        let err = leaf(&fields, "Count")
            .write(&mut outer, Value::List(vec![]))
            .unwrap_err();
        assert!(matches!(err, AccessError::Incompatible { .. }));
        let err = leaf(&fields, "Tags").write(&mut outer, Value::Int(1)).unwrap_err();
        assert!(matches!(err, AccessError::Serde(_)));
    }

    #[test]
    fn test_rc003_accessor_rejects_foreign_owner() {
        let fields = RecordType::of::<Outer>().fields().unwrap();
        let inner = Inner::default();
        let err = leaf(&fields, "ID").read(&inner).unwrap_err();
        assert!(matches!(err, AccessError::OwnerMismatch { .. }));
    }

    #[test]
    fn test_rc003_nested_address() {
        let fields = RecordType::of::<Outer>().fields().unwrap();
        let address = match &fields[5].kind {
            FieldKind::Nested { address, record } => {
                assert_eq!(*record, RecordType::of::<Inner>());
                address.clone()
            }
            FieldKind::Leaf { .. } => panic!("expected nested"),
        };
        let mut outer = Outer::default();
        address
            .address_mut(&mut outer)
            .unwrap()
            .downcast_mut::<Inner>()
            .unwrap()
            .flag = true;
        let inner = address.address(&outer).unwrap().downcast_ref::<Inner>().unwrap();
        assert!(inner.flag);
    }

    #[test]
    fn test_rc003_record_type_identity() {
        let a = RecordType::of::<Outer>();
        assert_eq!(a, RecordType::of::<Outer>());
        assert_ne!(a, RecordType::of::<Inner>());
        assert!(a.is_record());
        assert_eq!(a.short_name(), "Outer");
        let scalar = RecordType::of_value::<u32>(Shape::U32);
        assert!(!scalar.is_record());
        assert!(scalar.fields().is_none());
    }

    #[test]
    fn test_rc003_walked_reports_record_type() {
        let outer = Outer::default();
        let walked: &dyn Walked = &outer;
        assert_eq!(walked.record_type(), RecordType::of::<Outer>());
        assert!(walked.as_any().is::<Outer>());
    }

    #[test]
    fn test_rc003_scalar_conversions() {
        assert_eq!(bool::from_value(Value::Text("yes".into())).unwrap(), true);
        assert!(bool::from_value(Value::Text("maybe".into())).is_err());
        assert_eq!(i8::from_value(Value::Uint(7)).unwrap(), 7);
        assert!(u8::from_value(Value::Int(-1)).is_err());
        assert_eq!(String::from_value(Value::Int(5)).unwrap(), "5");
        assert_eq!(f32::from_value(Value::Int(2)).unwrap(), 2.0);
    }

    #[test]
    fn test_rc003_default_follows_field_shape() {
        assert_eq!(parse_default(Shape::Bool, "false").unwrap(), Value::Bool(false));
        assert_eq!(parse_default(Shape::U8, "7").unwrap(), Value::Uint(7));
        assert_eq!(parse_default(Shape::I16, "-3").unwrap(), Value::Int(-3));
        assert_eq!(parse_default(Shape::F64, "1.5").unwrap(), Value::Float(1.5));
        assert_eq!(parse_default(Shape::Text, "false").unwrap(), Value::from("false"));
        assert_eq!(parse_default(Shape::Ref, "true").unwrap(), Value::Bool(true));
        assert_eq!(parse_default(Shape::Ref, "n/a").unwrap(), Value::from("n/a"));
        assert_eq!(
            parse_default(Shape::Seq, "[1, 2]").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert!(matches!(
            parse_default(Shape::Bool, "maybe"),
            Err(AccessError::Parse { shape: Shape::Bool, .. })
        ));
        assert!(matches!(
            parse_default(Shape::U8, "300"),
            Err(AccessError::Parse { shape: Shape::U8, .. })
        ));
        assert!(matches!(parse_default(Shape::Map, "{"), Err(AccessError::Serde(_))));
    }

    #[derive(Debug, Default)]
    struct Misdeclared {
        flag: bool,
    }

    impl Record for Misdeclared {
        fn layout(fields: &mut Layout<Self>) {
            fields.generic("Flag", "", Shape::Bool, |r| &r.flag, |r| &mut r.flag);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "generic field `Flag` needs a compound shape")]
    fn test_rc003_generic_rejects_scalar_shape() {
        RecordType::of::<Misdeclared>().fields();
    }
}
