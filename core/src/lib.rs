//! slipway-core: plan files, dependency resolution, and script handling.
//!
//! A module is a directory with a `slipway.plan` file and `deploy/`,
//! `revert/`, `verify/` script trees. This crate owns everything that does
//! not need a database connection: the plan-file grammar, the change/tag
//! reference grammar, the dependency resolver with its tag-resolution
//! modes, workspace discovery, and the SQL cleaner that strips
//! transaction-control statements before execution.

pub mod clean;
pub mod error;
pub mod plan;
pub mod reference;
pub mod resolver;
pub mod script;
pub mod workspace;

pub use clean::{clean_sql, split_statements};
pub use error::{ParseError, ParseErrorKind, PlanFileError, ResolveError, WorkspaceError};
pub use plan::{Change, Plan, PlanFile, Tag, parse_plan_file, parse_plan_file_simple};
pub use reference::ChangeRef;
pub use resolver::{
    DependencyResult, DependencySource, ResolveOptions, TagResolution, resolve_dependencies,
};
pub use script::{ScriptKind, read_script, requires_from_script, script_hash, script_path};
pub use workspace::{ClosureEntry, ModuleInfo, ModuleMap, ProjectContext, Workspace};

/// Conventional plan file name at a module root.
pub const PLAN_FILE: &str = "slipway.plan";

/// Conventional workspace / module config file name.
pub const CONFIG_FILE: &str = "slipway.toml";
