//! Error types for migration execution.

use thiserror::Error;

/// Debug behavior, decided once at construction time and threaded
/// through the client and orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugOptions {
    /// Log every executed change and its dependency list.
    pub verbose: bool,
    /// Attach the full offending SQL to execution errors instead of a
    /// short preview.
    pub dump_sql: bool,
}

/// A failed database statement, with whatever context was available at
/// the call site.
#[derive(Debug)]
pub struct SqlError {
    /// SQLSTATE, when the server reported one.
    pub code: Option<String>,
    /// The SQL that failed: a preview, or the full text under
    /// [`DebugOptions::dump_sql`].
    pub query: Option<String>,
    pub underlying: sqlx::Error,
}

impl std::error::Error for SqlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.underlying)
    }
}

impl SqlError {
    pub fn new(underlying: sqlx::Error, sql: Option<&str>, debug: &DebugOptions) -> Self {
        let code = underlying
            .as_database_error()
            .and_then(|e| e.code())
            .map(|c| c.to_string());
        let query = sql.map(|s| {
            if debug.dump_sql || s.len() <= 200 {
                s.to_string()
            } else {
                let mut end = 200;
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}…", &s[..end])
            }
        });
        SqlError { code, query, underlying }
    }

    /// A targeted hint for SQLSTATEs that trip people up in migration
    /// scripts.
    pub fn hint(&self) -> Option<&'static str> {
        match self.code.as_deref()? {
            "25P02" => Some(
                "the transaction is already aborted; an earlier statement in this batch failed",
            ),
            "42P01" => Some("undefined table; is a required change missing from the dependency list?"),
            "42883" => Some("undefined function; check that required extensions and changes are deployed"),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "sql error [{code}]: {}", self.underlying)?,
            None => write!(f, "sql error: {}", self.underlying)?,
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nhint: {hint}")?;
        }
        if let Some(query) = &self.query {
            write!(f, "\nquery: {query}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Plan(#[from] slipway_core::PlanFileError),

    #[error(transparent)]
    Resolve(#[from] slipway_core::ResolveError),

    #[error(transparent)]
    Workspace(#[from] slipway_core::WorkspaceError),

    #[error("failed to connect to {database} at {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid database url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Sql(#[from] SqlError),

    /// A deploy halted at `change`. `deployed`/`skipped` describe what
    /// happened before the failure; with a transaction none of it
    /// persisted.
    #[error("deploy of {project}:{change} failed (hash {hash}, requires [{requires}]): {source}")]
    DeployFailed {
        project: String,
        change: String,
        hash: String,
        requires: String,
        deployed: Vec<String>,
        skipped: Vec<String>,
        #[source]
        source: SqlError,
    },

    #[error("revert of {project}:{change} failed: {source}")]
    RevertFailed {
        project: String,
        change: String,
        reverted: Vec<String>,
        skipped: Vec<String>,
        #[source]
        source: SqlError,
    },

    #[error("Cannot revert {change}: required by {dependent}")]
    RevertBlocked { change: String, dependent: String },

    #[error("verification failed for {count} change(s): {changes}")]
    VerifyFailed { count: usize, changes: String },

    #[error("unknown change {change:?} in project {project}")]
    UnknownChange { project: String, change: String },

    #[error("change {change:?} of project {project} is not deployed")]
    NotDeployed { project: String, change: String },

    #[error("target {target:?} does not belong to project {project}")]
    ForeignTarget { project: String, target: String },

    #[error("no target module given and none inferable from {}", .cwd.display())]
    NoTarget { cwd: std::path::PathBuf },

    #[error("{operation} failed for module {module}: {source}")]
    ModuleFailed {
        module: String,
        operation: &'static str,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("failed to read script {}: {source}", .path.display())]
    Script {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
