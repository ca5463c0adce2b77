//! The migration client.
//!
//! One [`Migrator`] per target database. Deploy walks a module's
//! dependency-resolved change list forward, revert walks it backward,
//! verify sweeps it without halting; all three consult the metadata
//! schema's `is_deployed` before acting, so reruns are cheap no-ops.
//!
//! Submodules:
//! - `revert`: reverse-order revert, boundary modes, chronological revert
//! - `verify`: non-halting verification sweep

mod revert;
mod verify;

pub use revert::{RevertOptions, RevertReport};
pub use verify::{VerifyOptions, VerifyReport, verify_outcome};

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use slipway_core::plan::Plan;
use slipway_core::resolver::{
    DependencySource, ResolveOptions, TagResolution, resolve_dependencies,
};
use slipway_core::workspace::ModuleMap;
use slipway_core::{ChangeRef, PLAN_FILE, ScriptKind, clean_sql, script_hash, script_path};

use crate::config::PgConfig;
use crate::error::{DebugOptions, MigrateError, SqlError};
use crate::schema::BOOTSTRAP_SQL;

/// A deployed-change row from the metadata schema.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
pub struct DeployedChange {
    pub project: String,
    pub change_name: String,
    pub script_hash: String,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Deploy through this change (inclusive) and stop. Accepts a bare
    /// name or an `@tag` of the module's own project.
    pub to_change: Option<String>,
    /// Wrap the whole batch in one transaction (all-or-nothing).
    pub use_transaction: bool,
    /// Record metadata without executing script bodies, to adopt an
    /// existing database into tracking.
    pub log_only: bool,
    /// Read edges from the plan or from `-- requires:` script headers.
    pub source: DependencySource,
    /// Workspace module map for cross-module classification.
    pub modules: ModuleMap,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            to_change: None,
            use_transaction: true,
            log_only: false,
            source: DependencySource::Plan,
            modules: ModuleMap::new(),
        }
    }
}

/// What one deploy call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub deployed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Migrator {
    pool: PgPool,
    config: PgConfig,
    debug: DebugOptions,
}

impl Migrator {
    /// Connect and bootstrap the metadata schema on first use.
    pub async fn connect(config: PgConfig, debug: DebugOptions) -> Result<Self, MigrateError> {
        let pool = config.connect().await?;
        let migrator = Migrator { pool, config, debug };
        migrator.ensure_schema().await?;
        Ok(migrator)
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn debug(&self) -> &DebugOptions {
        &self.debug
    }

    async fn ensure_schema(&self) -> Result<(), MigrateError> {
        tracing::debug!("ensuring metadata schema");
        sqlx::raw_sql(BOOTSTRAP_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| SqlError::new(e, None, &self.debug))?;
        Ok(())
    }

    /// Sole source of truth consulted before every deploy/revert/verify
    /// decision.
    pub async fn is_deployed(&self, project: &str, change: &str) -> Result<bool, MigrateError> {
        let deployed: bool = sqlx::query_scalar("SELECT slipway.is_deployed($1, $2)")
            .bind(project)
            .bind(change)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SqlError::new(e, None, &self.debug))?;
        Ok(deployed)
    }

    /// Deployed changes, oldest first, optionally for one project.
    pub async fn status(&self, project: Option<&str>) -> Result<Vec<DeployedChange>, MigrateError> {
        let rows = sqlx::query_as::<_, DeployedChange>("SELECT * FROM slipway.status($1)")
            .bind(project)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SqlError::new(e, None, &self.debug))?;
        Ok(rows)
    }

    /// Direct dependencies recorded for a deployed change.
    pub async fn get_dependencies(
        &self,
        project: &str,
        change: &str,
    ) -> Result<Vec<String>, MigrateError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT d.requires FROM slipway.dependencies d \
             JOIN slipway.changes c ON c.change_id = d.change_id \
             WHERE c.project = $1 AND c.change_name = $2",
        )
        .bind(project)
        .bind(change)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SqlError::new(e, None, &self.debug))?;
        Ok(rows)
    }

    /// Deployed changes that depend on `project:change`.
    pub async fn get_dependents(
        &self,
        project: &str,
        change: &str,
    ) -> Result<Vec<(String, String)>, MigrateError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT * FROM slipway.get_dependents($1, $2)")
                .bind(project)
                .bind(change)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SqlError::new(e, None, &self.debug))?;
        Ok(rows)
    }

    /// Install a native extension. Issued by the orchestrator for
    /// external closure entries.
    pub async fn create_extension(&self, name: &str) -> Result<(), MigrateError> {
        let stmt = format!(
            "CREATE EXTENSION IF NOT EXISTS \"{}\" CASCADE",
            name.replace('"', "\"\"")
        );
        tracing::info!(extension = name, "creating extension");
        sqlx::raw_sql(&stmt)
            .execute(&self.pool)
            .await
            .map_err(|e| SqlError::new(e, Some(&stmt), &self.debug))?;
        Ok(())
    }

    /// Deploy a module's pending changes in dependency order.
    pub async fn deploy(
        &self,
        module_dir: &Path,
        opts: &DeployOptions,
    ) -> Result<DeployReport, MigrateError> {
        let plan = slipway_core::parse_plan_file_simple(&module_dir.join(PLAN_FILE))?;
        let resolution = resolve_dependencies(
            module_dir,
            &plan.project,
            &ResolveOptions {
                tag_resolution: TagResolution::Resolve,
                source: opts.source,
                load_plan_files: true,
                modules: opts.modules.clone(),
            },
        )?;
        let boundary = match &opts.to_change {
            Some(target) => Some(local_target(&plan, target)?),
            None => None,
        };

        let mut report = DeployReport::default();
        let mut tx = if opts.use_transaction {
            Some(
                self.pool
                    .begin()
                    .await
                    .map_err(|e| SqlError::new(e, None, &self.debug))?,
            )
        } else {
            None
        };

        for change in &resolution.resolved {
            if self.is_deployed(&plan.project, change).await? {
                report.skipped.push(change.clone());
                if boundary.as_deref() == Some(change) {
                    break;
                }
                continue;
            }

            let path = script_path(module_dir, ScriptKind::Deploy, change);
            let raw = std::fs::read_to_string(&path)
                .map_err(|source| MigrateError::Script { path, source })?;
            let sql = clean_sql(&raw);
            let hash = script_hash(&raw);
            let requires = resolution
                .deps
                .get(&format!("/deploy/{change}.sql"))
                .cloned()
                .unwrap_or_default();

            if self.debug.verbose {
                tracing::info!(project = %plan.project, change = %change, requires = ?requires, "deploying");
            } else {
                tracing::debug!(project = %plan.project, change = %change, "deploying");
            }

            let query = sqlx::query("CALL slipway.deploy($1, $2, $3, $4, $5, $6)")
                .bind(&plan.project)
                .bind(change)
                .bind(&hash)
                .bind(&requires)
                .bind(&sql)
                .bind(opts.log_only);
            let executed = match tx.as_mut() {
                Some(t) => query.execute(&mut **t).await,
                None => query.execute(&self.pool).await,
            };

            if let Err(err) = executed {
                let sql_err = SqlError::new(err, Some(&sql), &self.debug);
                if let Some(t) = tx.take() {
                    let _ = t.rollback().await;
                }
                // On a separate connection, so rollback cannot erase it.
                self.log_failure("deploy_fail", &plan.project, change, &sql_err).await;
                tracing::error!(project = %plan.project, change = %change, error = %sql_err, "deploy failed");
                return Err(MigrateError::DeployFailed {
                    project: plan.project,
                    change: change.clone(),
                    hash,
                    requires: requires.join(", "),
                    deployed: report.deployed,
                    skipped: report.skipped,
                    source: sql_err,
                });
            }

            report.deployed.push(change.clone());
            if boundary.as_deref() == Some(change) {
                break;
            }
        }

        if let Some(t) = tx {
            t.commit()
                .await
                .map_err(|e| SqlError::new(e, None, &self.debug))?;
        }
        tracing::info!(
            database = %self.config.database,
            deployed = report.deployed.len(),
            skipped = report.skipped.len(),
            "deploy complete"
        );
        Ok(report)
    }

    pub(crate) async fn log_failure(
        &self,
        event_type: &str,
        project: &str,
        change: &str,
        error: &SqlError,
    ) {
        let logged = sqlx::query(
            "INSERT INTO slipway.events \
             (event_type, change_name, project, error_message, error_code) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event_type)
        .bind(change)
        .bind(project)
        .bind(error.underlying.to_string())
        .bind(&error.code)
        .execute(&self.pool)
        .await;
        if let Err(err) = logged {
            tracing::warn!(error = %err, "could not record failure event");
        }
    }
}

/// Resolve a `to_change` target within a module's own plan: a bare
/// change name, `@tag`, or either form qualified with the module's own
/// project. Foreign-project targets are rejected here; the orchestrator
/// routes those to chronological revert instead.
pub(crate) fn local_target(plan: &Plan, target: &str) -> Result<String, MigrateError> {
    let reference =
        ChangeRef::parse(target).ok_or_else(|| MigrateError::UnknownChange {
            project: plan.project.clone(),
            change: target.to_string(),
        })?;
    if let Some(project) = reference.project() {
        if project != plan.project {
            return Err(MigrateError::ForeignTarget {
                project: plan.project.clone(),
                target: target.to_string(),
            });
        }
    }
    let change = match &reference {
        ChangeRef::Local { name } | ChangeRef::CrossModule { name, .. } => {
            plan.change(name).map(|c| c.name.clone())
        }
        ChangeRef::Tag { tag } | ChangeRef::CrossModuleTag { tag, .. } => {
            plan.tagged_change(tag).map(|c| c.name.clone())
        }
    };
    change.ok_or_else(|| MigrateError::UnknownChange {
        project: plan.project.clone(),
        change: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slipway_core::plan::{Change, Tag};

    fn plan() -> Plan {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Plan {
            project: "widgets".to_string(),
            uri: None,
            syntax_version: "1.0.0".to_string(),
            changes: vec![
                Change {
                    name: "schema".to_string(),
                    dependencies: vec![],
                    timestamp: ts,
                    planner: "ada".to_string(),
                    email: "ada@example.com".to_string(),
                    comment: String::new(),
                },
                Change {
                    name: "table".to_string(),
                    dependencies: vec!["schema".to_string()],
                    timestamp: ts,
                    planner: "ada".to_string(),
                    email: "ada@example.com".to_string(),
                    comment: String::new(),
                },
            ],
            tags: vec![Tag {
                name: "v1.0.0".to_string(),
                change_name: "table".to_string(),
                timestamp: ts,
                planner: "ada".to_string(),
                email: "ada@example.com".to_string(),
                comment: String::new(),
            }],
        }
    }

    #[test]
    fn local_target_accepts_every_same_project_form() {
        let plan = plan();
        assert_eq!(local_target(&plan, "table").unwrap(), "table");
        assert_eq!(local_target(&plan, "@v1.0.0").unwrap(), "table");
        assert_eq!(local_target(&plan, "widgets:table").unwrap(), "table");
        assert_eq!(local_target(&plan, "widgets:@v1.0.0").unwrap(), "table");
    }

    #[test]
    fn local_target_rejects_foreign_projects_and_unknowns() {
        let plan = plan();
        assert!(matches!(
            local_target(&plan, "auth:@v1.0.0"),
            Err(MigrateError::ForeignTarget { .. })
        ));
        assert!(matches!(
            local_target(&plan, "missing"),
            Err(MigrateError::UnknownChange { .. })
        ));
        assert!(matches!(
            local_target(&plan, "@v9.9.9"),
            Err(MigrateError::UnknownChange { .. })
        ));
    }
}
