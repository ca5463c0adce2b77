//! Workspace orchestration.
//!
//! The entry points the CLI and other tooling call. Each resolves the
//! target module's extension/module closure, then drives the migration
//! client per module in closure order.
//!
//! Submodules:
//! - `deploy`: recursive deploy, fast path, extension installs
//! - `revert`: reverse-order revert, chronological delegation
//! - `verify`: per-module sweeps with one aggregate outcome

mod deploy;
mod revert;
mod verify;

pub use deploy::deploy_modules;
pub use revert::revert_modules;
pub use verify::verify_modules;

use std::path::PathBuf;

use slipway_core::resolver::DependencySource;
use slipway_core::workspace::{ProjectContext, Workspace};
use slipway_core::{ChangeRef, WorkspaceError};

use crate::config::PgConfig;
use crate::error::{DebugOptions, MigrateError};

/// Options shared by `deploy_modules` / `revert_modules` /
/// `verify_modules`.
#[derive(Debug, Clone)]
pub struct ModuleOperation {
    pub database: PgConfig,
    /// Directory the operation was invoked from; module and workspace
    /// context are probed from here.
    pub cwd: PathBuf,
    /// Expand the target's dependency closure instead of operating on
    /// the target alone.
    pub recursive: bool,
    /// Target module. Accepts `module`, `module:change`, and
    /// `module:@tag`; absent means the module at `cwd`.
    pub project_name: Option<String>,
    /// Boundary within the target module. A target embedded in
    /// `project_name` takes precedence.
    pub to_change: Option<String>,
    pub use_transaction: bool,
    /// Deploy dependency modules as pre-packaged batches.
    pub fast: bool,
    /// Read dependency edges from plan files rather than script headers.
    pub use_plan: bool,
    /// Cache fast-path packages across modules within this run.
    pub cache: bool,
    /// Record deploy metadata without executing script bodies
    /// (adoption of an existing database).
    pub log_only: bool,
    pub debug: DebugOptions,
}

impl Default for ModuleOperation {
    fn default() -> Self {
        Self {
            database: PgConfig::default(),
            cwd: PathBuf::from("."),
            recursive: true,
            project_name: None,
            to_change: None,
            use_transaction: true,
            fast: false,
            use_plan: true,
            cache: true,
            log_only: false,
            debug: DebugOptions::default(),
        }
    }
}

impl ModuleOperation {
    pub(crate) fn source(&self) -> DependencySource {
        if self.use_plan {
            DependencySource::Plan
        } else {
            DependencySource::Sql
        }
    }
}

/// The fully resolved shape of one operation: the workspace, the target
/// module, and the boundary (if any) within it.
pub(crate) struct ResolvedTarget {
    pub workspace: Workspace,
    pub module: String,
    pub to_change: Option<String>,
}

/// Probe context, load the workspace (or fall back to a standalone
/// single-module map), and split a `module[:change|:@tag]` target.
pub(crate) fn resolve_target(op: &ModuleOperation) -> Result<ResolvedTarget, MigrateError> {
    let context = ProjectContext::probe(&op.cwd)?;

    let workspace = match Workspace::load(&op.cwd) {
        Ok(ws) => ws,
        Err(WorkspaceError::NotFound(_)) => match &context {
            ProjectContext::Module { dir, .. } => Workspace::standalone(dir)?,
            _ => {
                return Err(MigrateError::NoTarget { cwd: op.cwd.clone() });
            }
        },
        Err(err) => return Err(err.into()),
    };

    let (module, embedded) = match &op.project_name {
        Some(target) => split_target(target),
        None => (context.project().map(str::to_string), None),
    };
    let module = module.ok_or_else(|| MigrateError::NoTarget { cwd: op.cwd.clone() })?;
    workspace.module(&module)?;

    Ok(ResolvedTarget {
        workspace,
        module,
        to_change: embedded.or_else(|| op.to_change.clone()),
    })
}

/// Split `module:change` / `module:@tag` into the module and a
/// fully-qualified boundary; a bare module carries no boundary.
fn split_target(target: &str) -> (Option<String>, Option<String>) {
    match ChangeRef::parse(target) {
        Some(ChangeRef::CrossModule { project, .. })
        | Some(ChangeRef::CrossModuleTag { project, .. }) => {
            (Some(project), Some(target.to_string()))
        }
        Some(ChangeRef::Local { name }) => (Some(name), None),
        _ => (Some(target.to_string()), None),
    }
}
