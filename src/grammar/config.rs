//! RC-008: Grammar configuration loaded from YAML.
//!
//! ```yaml
//! key: op
//! description: field validation
//! walk_mode: combine
//! arity: unary
//! format: pair_square
//! combiner: bool_and
//! operations:
//!   upper: {}
//!   mask:
//!     modifiers: { keep: uint }
//! ```

use crate::core::error::GrammarError;
use crate::core::types::{Arity, MultiOpPolicy, WalkMode};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Declarative description of a flat grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarConfig {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub walk_mode: WalkMode,
    #[serde(default)]
    pub arity: Arity,
    /// Policy for fields that do not set `policy=` themselves.
    #[serde(default)]
    pub policy: MultiOpPolicy,
    #[serde(default = "default_max_operations")]
    pub max_operations: usize,
    #[serde(default)]
    pub format: FlatFormat,
    #[serde(default)]
    pub ordering: OrderingKind,
    /// Operation names in execution order when `ordering: priority`.
    #[serde(default)]
    pub priority: Vec<String>,
    /// Modifiers accepted on every operation, on top of the built-in ones.
    #[serde(default)]
    pub modifiers: IndexMap<String, ModifierKind>,
    /// Allow-list of operations. Empty accepts any name.
    #[serde(default)]
    pub operations: IndexMap<String, OperationDecl>,
    #[serde(default)]
    pub combiner: Option<CombinerKind>,
    /// Separator for `string_concat`.
    #[serde(default)]
    pub separator: String,
    #[serde(default)]
    pub applier: Option<ApplierKind>,
}

fn default_max_operations() -> usize {
    4
}

impl GrammarConfig {
    /// Minimal config: delimited by `;`, declared order, built-in modifiers.
    pub fn new(key: impl Into<String>, walk_mode: WalkMode) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            walk_mode,
            arity: Arity::default(),
            policy: MultiOpPolicy::default(),
            max_operations: default_max_operations(),
            format: FlatFormat::default(),
            ordering: OrderingKind::default(),
            priority: Vec::new(),
            modifiers: IndexMap::new(),
            operations: IndexMap::new(),
            combiner: None,
            separator: String::new(),
            applier: None,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, GrammarError> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| GrammarError::Config(format!("YAML parse error: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self, GrammarError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrammarError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }
}

/// How a tag value is cut into operation strings. In YAML either a map
/// (`{ separator: "|" }`, `{ open: "[", close: "]" }`) or a preset name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FlatFormat {
    /// `op:"trim;lower"`
    Delimited { separator: String },
    /// `op:"[trim][lower,omitempty]"`
    Enclosed { open: String, close: String },
}

impl Default for FlatFormat {
    fn default() -> Self {
        FlatPreset::InlineSemi.into()
    }
}

impl<'de> Deserialize<'de> for FlatFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FormatDecl::deserialize(deserializer).map(Self::from)
    }
}

/// Named flat formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatPreset {
    /// `op:"trim,lower"`. Commas leave no room for modifiers.
    InlineComma,
    /// `op:"trim;lower"`
    InlineSemi,
    /// `op:"trim|lower"`
    InlinePipe,
    /// `op:"[trim][lower]"`
    PairSquare,
    /// `op:"{trim}{lower}"`
    PairCurly,
    /// `op:"(trim)(lower)"`
    PairParen,
}

impl From<FlatPreset> for FlatFormat {
    fn from(preset: FlatPreset) -> Self {
        let delimited = |separator: &str| Self::Delimited {
            separator: separator.to_string(),
        };
        let enclosed = |open: &str, close: &str| Self::Enclosed {
            open: open.to_string(),
            close: close.to_string(),
        };
        match preset {
            FlatPreset::InlineComma => delimited(","),
            FlatPreset::InlineSemi => delimited(";"),
            FlatPreset::InlinePipe => delimited("|"),
            FlatPreset::PairSquare => enclosed("[", "]"),
            FlatPreset::PairCurly => enclosed("{", "}"),
            FlatPreset::PairParen => enclosed("(", ")"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormatDecl {
    Preset(FlatPreset),
    Delimited { separator: String },
    Enclosed { open: String, close: String },
}

impl From<FormatDecl> for FlatFormat {
    fn from(decl: FormatDecl) -> Self {
        match decl {
            FormatDecl::Preset(preset) => preset.into(),
            FormatDecl::Delimited { separator } => Self::Delimited { separator },
            FormatDecl::Enclosed { open, close } => Self::Enclosed { open, close },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingKind {
    #[default]
    Declared,
    Lexical,
    Priority,
}

/// Value type a modifier accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    /// Key alone means true; `key=false` is accepted.
    Bool,
    Int,
    Uint,
    Float,
    String,
    /// Kept as text and converted to the field's shape when written.
    Converted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationDecl {
    #[serde(default)]
    pub description: String,
    /// Modifiers accepted only by this operation.
    #[serde(default)]
    pub modifiers: IndexMap<String, ModifierKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinerKind {
    BoolAnd,
    StringConcat,
    Collect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplierKind {
    Setter,
}
