//! RC-009: Flat grammar — one level of operations per tag value.
//!
//! Operation strings read `name[,modifier...]`. A modifier is either a bare
//! key (boolean true) or `key=value` / `key:value`, the value optionally
//! double-quoted. Every modifier must be declared, either as one of the
//! shared modifiers or on the operation itself.

use super::config::{
    ApplierKind, CombinerKind, FlatFormat, GrammarConfig, ModifierKind, OrderingKind,
};
use super::{not_applicable, Grammar};
use crate::core::error::{GrammarBuildStage, GrammarError};
use crate::core::operation::{self, OpOptions, OperationRef};
use crate::core::types::{Arity, MultiOpPolicy, Value, WalkMode};
use crate::core::walk::{
    Applier, BoolAndCombiner, CollectCombiner, Combiner, SetterApplier, StringConcatCombiner,
};
use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

const NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.\-]*$";
const MODIFIER_PATTERN: &str = r"(?s)^\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*(?:([=:])\s*(.*?))?\s*$";

/// Execution order of a field's operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    Declared,
    Lexical,
    /// Listed names first, in list order; the rest keep declared order.
    Priority(Vec<String>),
}

pub struct FlatGrammar {
    key: String,
    description: String,
    walk_mode: WalkMode,
    arity: Arity,
    policy: MultiOpPolicy,
    max_operations: usize,
    format: FlatFormat,
    ordering: Ordering,
    shared: IndexMap<String, ModifierKind>,
    operations: IndexMap<String, IndexMap<String, ModifierKind>>,
    combiner: Option<Arc<dyn Combiner>>,
    applier: Option<Arc<dyn Applier>>,
    name_pattern: Regex,
    modifier_pattern: Regex,
}

fn builtin_modifiers() -> IndexMap<String, ModifierKind> {
    [
        (operation::OMIT_NIL, ModifierKind::Bool),
        (operation::OMIT_EMPTY, ModifierKind::Bool),
        (operation::OMIT_ERR, ModifierKind::Bool),
        (operation::DEFAULT, ModifierKind::Converted),
        (operation::POLICY, ModifierKind::String),
    ]
    .into_iter()
    .map(|(name, kind)| (name.to_string(), kind))
    .collect()
}

fn build_error(stage: GrammarBuildStage, reason: impl Into<String>) -> GrammarError {
    GrammarError::Build {
        stage,
        reason: reason.into(),
    }
}

impl FlatGrammar {
    /// Validate and compile a config. Checks run in stages: format,
    /// modifiers, operations, then finalization.
    pub fn from_config(config: GrammarConfig) -> Result<Self, GrammarError> {
        let name_pattern = Regex::new(NAME_PATTERN)
            .map_err(|e| build_error(GrammarBuildStage::Finalization, e.to_string()))?;
        let modifier_pattern = Regex::new(MODIFIER_PATTERN)
            .map_err(|e| build_error(GrammarBuildStage::Finalization, e.to_string()))?;

        validate_format(&config)?;
        let shared = validate_modifiers(&config, &name_pattern)?;
        let ordering = validate_operations(&config, &name_pattern)?;

        if config.max_operations == 0 {
            return Err(build_error(
                GrammarBuildStage::Finalization,
                "max_operations must be at least 1",
            ));
        }

        let combiner: Option<Arc<dyn Combiner>> = config.combiner.map(|kind| match kind {
            CombinerKind::BoolAnd => Arc::new(BoolAndCombiner) as Arc<dyn Combiner>,
            CombinerKind::StringConcat => {
                Arc::new(StringConcatCombiner::with_separator(config.separator.clone()))
            }
            CombinerKind::Collect => Arc::new(CollectCombiner),
        });
        let applier: Option<Arc<dyn Applier>> = config.applier.map(|kind| match kind {
            ApplierKind::Setter => Arc::new(SetterApplier) as Arc<dyn Applier>,
        });

        match config.walk_mode {
            WalkMode::Combine if combiner.is_none() => {
                return Err(build_error(
                    GrammarBuildStage::Finalization,
                    "combine walks need a combiner",
                ))
            }
            WalkMode::Apply if applier.is_none() => {
                return Err(build_error(
                    GrammarBuildStage::Finalization,
                    "apply walks need an applier",
                ))
            }
            WalkMode::Transform => {
                return Err(build_error(
                    GrammarBuildStage::Finalization,
                    "flat grammars do not support transform walks",
                ))
            }
            _ => {}
        }

        let operations = config
            .operations
            .into_iter()
            .map(|(name, decl)| (name, decl.modifiers))
            .collect();

        Ok(Self {
            key: config.key,
            description: config.description,
            walk_mode: config.walk_mode,
            arity: config.arity,
            policy: config.policy,
            max_operations: config.max_operations,
            format: config.format,
            ordering,
            shared,
            operations,
            combiner,
            applier,
            name_pattern,
            modifier_pattern,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, GrammarError> {
        Self::from_config(GrammarConfig::from_yaml(yaml)?)
    }

    /// Replace the configured combiner.
    pub fn with_combiner(mut self, combiner: Arc<dyn Combiner>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// Replace the configured applier.
    pub fn with_applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    fn modifier_kind(&self, op: &str, modifier: &str) -> Option<ModifierKind> {
        self.operations
            .get(op)
            .and_then(|mods| mods.get(modifier))
            .or_else(|| self.shared.get(modifier))
            .copied()
    }

    fn parse_error(op: &str, reason: impl Into<String>) -> GrammarError {
        GrammarError::Parse {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

fn validate_format(config: &GrammarConfig) -> Result<(), GrammarError> {
    let stage = GrammarBuildStage::Format;
    if config.key.is_empty() {
        return Err(build_error(stage, "tag key must not be empty"));
    }
    if config
        .key
        .chars()
        .any(|c| c <= ' ' || c == ':' || c == '"' || c == '\x7f')
    {
        return Err(build_error(
            stage,
            format!("tag key '{}' is not a valid struct tag key", config.key),
        ));
    }
    match &config.format {
        FlatFormat::Delimited { separator } if separator.is_empty() => {
            Err(build_error(stage, "separator must not be empty"))
        }
        FlatFormat::Enclosed { open, close } if open.is_empty() || close.is_empty() => {
            Err(build_error(stage, "enclosing markers must not be empty"))
        }
        FlatFormat::Enclosed { open, close } if open == close => Err(build_error(
            stage,
            format!("opening and closing markers are both '{}'", open),
        )),
        _ => Ok(()),
    }
}

fn validate_modifiers(
    config: &GrammarConfig,
    name_pattern: &Regex,
) -> Result<IndexMap<String, ModifierKind>, GrammarError> {
    let stage = GrammarBuildStage::Modifier;
    let mut shared = builtin_modifiers();
    for (name, kind) in &config.modifiers {
        if !name_pattern.is_match(name) {
            return Err(build_error(stage, format!("invalid modifier name '{}'", name)));
        }
        match shared.get(name) {
            Some(existing) if existing != kind => {
                return Err(build_error(
                    stage,
                    format!("modifier '{}' redeclared with a different kind", name),
                ))
            }
            _ => {
                shared.insert(name.clone(), *kind);
            }
        }
    }
    for (op, decl) in &config.operations {
        for name in decl.modifiers.keys() {
            if !name_pattern.is_match(name) {
                return Err(build_error(
                    stage,
                    format!("invalid modifier name '{}' on operation '{}'", name, op),
                ));
            }
        }
    }
    Ok(shared)
}

fn validate_operations(
    config: &GrammarConfig,
    name_pattern: &Regex,
) -> Result<Ordering, GrammarError> {
    let stage = GrammarBuildStage::Operation;
    for name in config.operations.keys() {
        if !name_pattern.is_match(name) {
            return Err(build_error(stage, format!("invalid operation name '{}'", name)));
        }
    }
    match config.ordering {
        OrderingKind::Declared => Ok(Ordering::Declared),
        OrderingKind::Lexical => Ok(Ordering::Lexical),
        OrderingKind::Priority => {
            if config.priority.is_empty() {
                return Err(build_error(stage, "priority ordering needs a priority list"));
            }
            let mut seen = FxHashSet::default();
            for name in &config.priority {
                if !seen.insert(name.as_str()) {
                    return Err(build_error(
                        stage,
                        format!("'{}' listed twice in priority", name),
                    ));
                }
                if !config.operations.is_empty() && !config.operations.contains_key(name) {
                    return Err(build_error(
                        stage,
                        format!("priority names undeclared operation '{}'", name),
                    ));
                }
            }
            Ok(Ordering::Priority(config.priority.clone()))
        }
    }
}

impl Grammar for FlatGrammar {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn walk_mode(&self) -> WalkMode {
        self.walk_mode
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn combiner(&self) -> Result<Arc<dyn Combiner>, GrammarError> {
        match (&self.combiner, self.walk_mode) {
            (Some(combiner), WalkMode::Combine) => Ok(Arc::clone(combiner)),
            _ => Err(not_applicable(self, "combiner")),
        }
    }

    fn applier(&self) -> Result<Arc<dyn Applier>, GrammarError> {
        match (&self.applier, self.walk_mode) {
            (Some(applier), WalkMode::Apply) => Ok(Arc::clone(applier)),
            _ => Err(not_applicable(self, "applier")),
        }
    }

    fn split(&self, tag: &str) -> Result<Vec<String>, GrammarError> {
        let split_error = |reason: String| GrammarError::Split {
            tag: tag.to_string(),
            reason,
        };
        let parts: Vec<String> = match &self.format {
            FlatFormat::Delimited { separator } => split_unquoted(tag, separator)
                .map_err(split_error)?
                .into_iter()
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            FlatFormat::Enclosed { open, close } => split_enclosed(tag, open, close)
                .map_err(split_error)?
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        if parts.is_empty() {
            return Err(split_error("tag holds no operations".to_string()));
        }
        if parts.len() > self.max_operations {
            return Err(GrammarError::TooManyOperations {
                count: parts.len(),
                max: self.max_operations,
            });
        }
        Ok(parts)
    }

    fn parse(&self, op: &str) -> Result<OperationRef, GrammarError> {
        let pieces = split_unquoted(op, ",").map_err(|reason| Self::parse_error(op, reason))?;
        let name = pieces.first().map(|p| p.trim()).unwrap_or_default();
        if !self.name_pattern.is_match(name) {
            return Err(Self::parse_error(
                op,
                format!("invalid operation name '{}'", name),
            ));
        }
        if !self.operations.is_empty() && !self.operations.contains_key(name) {
            return Err(Self::parse_error(
                op,
                format!("operation '{}' is not declared", name),
            ));
        }

        let mut options = OpOptions::new();
        for piece in pieces.iter().skip(1) {
            let caps = self.modifier_pattern.captures(piece).ok_or_else(|| {
                Self::parse_error(op, format!("malformed modifier '{}'", piece.trim()))
            })?;
            let key = &caps[1];
            let raw = caps.get(3).map(|m| unquote_value(m.as_str()));
            let kind = self.modifier_kind(name, key).ok_or_else(|| {
                Self::parse_error(op, format!("undeclared modifier '{}'", key))
            })?;
            let value = convert_modifier(kind, key, raw)
                .map_err(|reason| Self::parse_error(op, reason))?;
            if options.get(key).is_some() {
                return Err(Self::parse_error(
                    op,
                    format!("modifier '{}' given twice", key),
                ));
            }
            options.insert(key, value);
        }
        Ok(OperationRef::with_options(name, options))
    }

    fn order(&self, mut ops: Vec<OperationRef>) -> Result<Vec<OperationRef>, GrammarError> {
        let mut seen = FxHashSet::default();
        for op in &ops {
            if !seen.insert(op.name.as_str()) {
                return Err(GrammarError::Order(format!(
                    "operation '{}' appears more than once",
                    op.name
                )));
            }
        }
        match &self.ordering {
            Ordering::Declared => {}
            Ordering::Lexical => ops.sort_by(|a, b| a.name.cmp(&b.name)),
            Ordering::Priority(list) => ops.sort_by_key(|op| {
                list.iter()
                    .position(|name| *name == op.name)
                    .unwrap_or(usize::MAX)
            }),
        }
        Ok(ops)
    }

    fn policy(&self, ops: &[OperationRef]) -> Result<MultiOpPolicy, GrammarError> {
        let mut chosen: Option<MultiOpPolicy> = None;
        for op in ops {
            let Some(text) = op.options.text(operation::POLICY) else {
                continue;
            };
            let policy: MultiOpPolicy = text.parse().map_err(GrammarError::UnknownPolicy)?;
            match chosen {
                Some(first) if first != policy => {
                    return Err(GrammarError::ConflictingPolicy {
                        first,
                        second: policy,
                    })
                }
                _ => chosen = Some(policy),
            }
        }
        Ok(chosen.unwrap_or(self.policy))
    }
}

impl fmt::Debug for FlatGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatGrammar")
            .field("key", &self.key)
            .field("walk_mode", &self.walk_mode)
            .field("arity", &self.arity)
            .field("policy", &self.policy)
            .field("format", &self.format)
            .field("ordering", &self.ordering)
            .finish()
    }
}

// ============================================================================
// Scanning helpers
// ============================================================================

/// Byte index of the first `pat` outside double quotes.
fn find_unquoted(s: &str, pat: &str) -> Result<Option<usize>, String> {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if quoted {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                quoted = false;
            }
            continue;
        }
        if c == '"' {
            quoted = true;
        } else if s[i..].starts_with(pat) {
            return Ok(Some(i));
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    Ok(None)
}

fn split_unquoted<'a>(s: &'a str, sep: &str) -> Result<Vec<&'a str>, String> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(at) = find_unquoted(rest, sep)? {
        parts.push(&rest[..at]);
        rest = &rest[at + sep.len()..];
    }
    parts.push(rest);
    Ok(parts)
}

fn split_enclosed<'a>(s: &'a str, open: &str, close: &str) -> Result<Vec<&'a str>, String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let body = rest
            .strip_prefix(open)
            .ok_or_else(|| format!("expected '{}' before '{}'", open, rest))?;
        let end = find_unquoted(body, close)?.ok_or_else(|| format!("missing '{}'", close))?;
        let part = body[..end].trim();
        if part.is_empty() {
            return Err(format!("empty '{}{}'", open, close));
        }
        parts.push(part);
        rest = body[end + close.len()..].trim_start();
    }
    Ok(parts)
}

fn unquote_value(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            other => out.push(other),
        }
    }
    out
}

fn convert_modifier(kind: ModifierKind, key: &str, raw: Option<String>) -> Result<Value, String> {
    let Some(raw) = raw else {
        return match kind {
            ModifierKind::Bool => Ok(Value::Bool(true)),
            _ => Err(format!("modifier '{}' requires a value", key)),
        };
    };
    let mismatch = |expected: &str| format!("modifier '{}' expects {}, got '{}'", key, expected, raw);
    match kind {
        ModifierKind::Bool => raw.parse().map(Value::Bool).map_err(|_| mismatch("a bool")),
        ModifierKind::Int => raw.parse().map(Value::Int).map_err(|_| mismatch("an integer")),
        ModifierKind::Uint => raw
            .parse()
            .map(Value::Uint)
            .map_err(|_| mismatch("an unsigned integer")),
        ModifierKind::Float => raw.parse().map(Value::Float).map_err(|_| mismatch("a number")),
        ModifierKind::String | ModifierKind::Converted => Ok(Value::Text(raw)),
    }
}
