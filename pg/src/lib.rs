//! slipway-pg: migration execution against Postgres.
//!
//! [`Migrator`] is the per-database client: deploy, revert, and verify
//! one module's changes with transactional semantics, tracking state in
//! the `slipway` metadata schema. The `ops` entry points —
//! [`deploy_modules`], [`revert_modules`], [`verify_modules`] — sit
//! above it and drive whole workspaces in dependency order.

pub mod config;
pub mod error;
pub mod migrate;
pub mod ops;
pub mod package;
pub mod schema;

pub use config::PgConfig;
pub use error::{DebugOptions, MigrateError, SqlError};
pub use migrate::{
    DeployOptions, DeployReport, DeployedChange, Migrator, RevertOptions, RevertReport,
    VerifyOptions, VerifyReport, verify_outcome,
};
pub use ops::{ModuleOperation, deploy_modules, revert_modules, verify_modules};
pub use package::{Package, PackageCache, PackageKey, package_module};
pub use schema::{BOOTSTRAP_SQL, METADATA_SCHEMA};
