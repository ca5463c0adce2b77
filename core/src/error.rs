//! Error types for plan parsing, dependency resolution, and workspace
//! discovery.

use std::path::PathBuf;

use thiserror::Error;

/// A single structured plan-file error with its source position.
///
/// The accumulating parser collects these instead of failing; the
/// fail-fast variant promotes the first one into a [`PlanFileError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number in the plan file.
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

/// What went wrong on a plan line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("missing %project= header")]
    MissingProject,
    #[error("header {0:?} out of order")]
    HeaderOutOfOrder(String),
    #[error("unknown header {0:?}")]
    UnknownHeader(String),
    #[error("invalid change name {0:?}")]
    InvalidChangeName(String),
    #[error("invalid tag name {0:?}")]
    InvalidTagName(String),
    #[error("invalid dependency reference {0:?}")]
    InvalidDependency(String),
    #[error("duplicate change name {0:?}")]
    DuplicateChange(String),
    #[error("duplicate tag name {0:?}")]
    DuplicateTag(String),
    #[error("tag {0:?} has no preceding change")]
    DanglingTag(String),
    #[error("malformed plan line")]
    MalformedLine,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Fail-fast plan loading error, used by execution paths where a broken
/// plan is always fatal.
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("failed to read plan {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {error}", .path.display())]
    Parse { path: PathBuf, error: ParseError },
}

/// Dependency-graph errors. Always fatal.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The exact edge that closes the cycle.
    #[error("Circular reference detected: {from} \u{2192} {to}")]
    CircularReference { from: String, to: String },

    /// A reference that matches no local change, workspace module, or
    /// known native extension. `suggestion` is empty or a pre-formatted
    /// " Did you mean ...?" fragment.
    #[error("Module \"{reference}\" not found in modules list.{suggestion}")]
    ModuleNotFound {
        reference: String,
        suggestion: String,
    },

    #[error("tag @{tag} not found in project {project}")]
    TagNotFound { project: String, tag: String },

    #[error("invalid dependency reference {0:?}")]
    InvalidReference(String),

    #[error("module {module} has no plan or deploy scripts under {}", .path.display())]
    EmptyModule { module: String, path: PathBuf },

    #[error(transparent)]
    Plan(#[from] PlanFileError),

    #[error("failed to scan {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Workspace discovery and configuration errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no workspace configuration found above {}", .0.display())]
    NotFound(PathBuf),

    #[error("unknown module {0:?}")]
    UnknownModule(String),

    /// Self- or cycle-producing module dependency, rejected at write time.
    #[error("Circular reference detected: {from} \u{2192} {to}")]
    CircularReference { from: String, to: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },

    #[error(transparent)]
    Plan(#[from] PlanFileError),
}
