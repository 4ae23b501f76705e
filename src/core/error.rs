//! RC-002: Error taxonomy.
//!
//! Every failure surfaces as one [`Error`]. Recursive stages wrap the
//! underlying failure in [`Error::Field`] / [`Error::Operation`] at each
//! level, so the rendered message reads as a path from the recipe root down
//! to the failing operation.

use super::types::{Arity, MultiOpPolicy, Shape, WalkMode};
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("type `{0}` is not a record")]
    NotARecordType(&'static str),

    #[error("field `{field}`: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<Error>,
    },

    #[error("operation `{operation}`: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("operation `{0}` is not registered")]
    OperationNotFound(String),

    #[error("arity {found} does not match recipe arity {expected}")]
    ArityMismatch { found: Arity, expected: Arity },

    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("recipe walk mode is {recipe}, requested {requested}")]
    WalkTypeMismatch { recipe: WalkMode, requested: WalkMode },

    #[error("no instances supplied")]
    NoInstances,

    #[error("instance {index} is `{found}`, expected `{expected}`")]
    InstanceTypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{arity} recipe cannot take {count} source value(s)")]
    SourceCount { arity: Arity, count: usize },
}

/// Failure category, independent of annotation depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input or field is not shaped as the recipe expects.
    Shape,
    /// Malformed tag, operation string, or ordering.
    Grammar,
    /// Unknown operation or arity mismatch.
    Resolution,
    /// An operation or an applier write failed.
    Execution,
    /// Walk mode, policy, instance mix or source count is wrong for the call.
    Configuration,
}

impl Error {
    /// Wrap with the field the error occurred in.
    pub fn in_field(self, field: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Wrap with the operation the error occurred in.
    pub fn in_operation(self, operation: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Innermost, unannotated error.
    pub fn root(&self) -> &Error {
        let mut current = self;
        loop {
            match current {
                Self::Field { source, .. } | Self::Operation { source, .. } => {
                    current = source.as_ref()
                }
                other => return other,
            }
        }
    }

    /// Dotted field path collected from the annotation wrappers.
    pub fn path(&self) -> String {
        let mut segments = Vec::new();
        let mut current = self;
        loop {
            match current {
                Self::Field { field, source } => {
                    segments.push(field.as_str());
                    current = source.as_ref();
                }
                Self::Operation { source, .. } => current = source.as_ref(),
                _ => break,
            }
        }
        segments.join(".")
    }

    /// Name of the operation the error occurred in, if any.
    pub fn operation(&self) -> Option<&str> {
        let mut current = self;
        loop {
            match current {
                Self::Operation { operation, .. } => return Some(operation),
                Self::Field { source, .. } => current = source.as_ref(),
                _ => return None,
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::NotARecordType(_) => ErrorKind::Shape,
            Self::Access(AccessError::OwnerMismatch { .. }) => ErrorKind::Shape,
            Self::Access(_) | Self::Op(_) => ErrorKind::Execution,
            Self::Grammar(GrammarError::UnknownPolicy(_))
            | Self::Grammar(GrammarError::ConflictingPolicy { .. })
            | Self::Grammar(GrammarError::NotApplicable { .. }) => ErrorKind::Configuration,
            Self::Grammar(_) => ErrorKind::Grammar,
            Self::OperationNotFound(_) | Self::ArityMismatch { .. } => ErrorKind::Resolution,
            Self::WalkTypeMismatch { .. }
            | Self::NoInstances
            | Self::InstanceTypeMismatch { .. }
            | Self::SourceCount { .. } => ErrorKind::Configuration,
            Self::Field { .. } | Self::Operation { .. } => ErrorKind::Configuration,
        }
    }
}

// ============================================================================
// Operation failures
// ============================================================================

/// Failure reported by an operation's own logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OpError {
    message: String,
}

impl OpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// Field access failures
// ============================================================================

/// Failure reading or writing a field through its accessor.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("instance is not `{expected}`")]
    OwnerMismatch { expected: &'static str },

    #[error("cannot store {found} value in {shape} field")]
    Incompatible { shape: Shape, found: &'static str },

    #[error("value {value} is out of range for {shape} field")]
    OutOfRange { shape: Shape, value: String },

    #[error("cannot parse '{text}' as {shape}")]
    Parse { shape: Shape, text: String },

    #[error("generic field conversion failed: {0}")]
    Serde(#[from] serde_json::Error),
}

// ============================================================================
// Grammar failures
// ============================================================================

/// Stage of grammar compilation a build error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarBuildStage {
    Format,
    Modifier,
    Operation,
    Finalization,
}

impl fmt::Display for GrammarBuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format => write!(f, "format validation"),
            Self::Modifier => write!(f, "modifier validation"),
            Self::Operation => write!(f, "operation validation"),
            Self::Finalization => write!(f, "finalization"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
    #[error("cannot split tag '{tag}': {reason}")]
    Split { tag: String, reason: String },

    #[error("cannot parse operation '{op}': {reason}")]
    Parse { op: String, reason: String },

    #[error("cannot order operations: {0}")]
    Order(String),

    #[error("{count} operations exceed the limit of {max}")]
    TooManyOperations { count: usize, max: usize },

    #[error("{0}")]
    UnknownPolicy(String),

    #[error("conflicting multi-operation policies {first} and {second}")]
    ConflictingPolicy {
        first: MultiOpPolicy,
        second: MultiOpPolicy,
    },

    #[error("grammar `{key}` has no {strategy} for {mode} walks")]
    NotApplicable {
        key: String,
        strategy: &'static str,
        mode: WalkMode,
    },

    #[error("grammar build failed during {stage}: {reason}")]
    Build {
        stage: GrammarBuildStage,
        reason: String,
    },

    #[error("cannot load grammar config: {0}")]
    Config(String),
}
