//! Revert: reverse plan order, three termination modes.
//!
//! A bare name or bare `@tag` stops the walk exclusively; the target
//! stays deployed. A qualified `project:@tag` (or a foreign
//! `project:change`) switches to chronological revert: everything
//! deployed strictly after the target change's `deployed_at`, across
//! every project, newest first. Tag-based cross-module dependencies make
//! this necessary, since undoing an early change must also undo whatever
//! was deployed on top of it elsewhere.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use slipway_core::resolver::{
    DependencySource, ResolveOptions, TagResolution, resolve_dependencies,
};
use slipway_core::workspace::ModuleMap;
use slipway_core::{ChangeRef, PLAN_FILE, ScriptKind, clean_sql, script_path};

use crate::error::{MigrateError, SqlError};

use super::{Migrator, local_target};

#[derive(Debug, Clone)]
pub struct RevertOptions {
    /// Where to stop. `None` reverts the whole module.
    pub to_change: Option<String>,
    pub use_transaction: bool,
    /// Read edges from the plan or from script headers.
    pub source: DependencySource,
    /// Module map; chronological revert uses it to locate other
    /// modules' revert scripts.
    pub modules: ModuleMap,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self {
            to_change: None,
            use_transaction: true,
            source: DependencySource::Plan,
            modules: ModuleMap::new(),
        }
    }
}

/// What one revert call did. Entries are bare change names for a
/// single-project revert and `project:change` for chronological mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    pub reverted: Vec<String>,
    pub skipped: Vec<String>,
}

/// A change scheduled for revert, with everything needed to execute it.
struct PendingRevert {
    project: String,
    change: String,
    script_dir: std::path::PathBuf,
    /// How the change is reported: bare or `project:`-qualified.
    label: String,
}

impl Migrator {
    pub async fn revert(
        &self,
        module_dir: &Path,
        opts: &RevertOptions,
    ) -> Result<RevertReport, MigrateError> {
        let plan = slipway_core::parse_plan_file_simple(&module_dir.join(PLAN_FILE))?;

        // Qualified tag targets (and foreign change targets) switch
        // modes entirely.
        if let Some(target) = &opts.to_change {
            if let Some(reference) = ChangeRef::parse(target) {
                let chronological = match &reference {
                    ChangeRef::CrossModuleTag { .. } => true,
                    ChangeRef::CrossModule { project, .. } => *project != plan.project,
                    _ => false,
                };
                if chronological {
                    let cutoff = self.target_cutoff(&plan, &reference, opts).await?;
                    return self.revert_chronological(cutoff, opts).await;
                }
            }
        }

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

        let mut report = RevertReport::default();
        let mut pending = Vec::new();
        for change in resolution.resolved.iter().rev() {
            if boundary.as_deref() == Some(change) {
                break;
            }
            if self.is_deployed(&plan.project, change).await? {
                pending.push(PendingRevert {
                    project: plan.project.clone(),
                    change: change.clone(),
                    script_dir: module_dir.to_path_buf(),
                    label: change.clone(),
                });
            } else {
                report.skipped.push(change.clone());
            }
        }

        self.guard_dependents(&pending).await?;
        self.execute_reverts(pending, opts.use_transaction, report).await
    }

    /// `deployed_at` of the change a qualified target resolves to.
    async fn target_cutoff(
        &self,
        plan: &slipway_core::Plan,
        reference: &ChangeRef,
        opts: &RevertOptions,
    ) -> Result<DateTime<Utc>, MigrateError> {
        let (project, change) = match reference {
            ChangeRef::CrossModule { project, name } => (project.clone(), name.clone()),
            ChangeRef::CrossModuleTag { project, tag } if *project == plan.project => {
                let change = plan.tagged_change(tag).ok_or_else(|| {
                    MigrateError::Resolve(slipway_core::ResolveError::TagNotFound {
                        project: project.clone(),
                        tag: tag.clone(),
                    })
                })?;
                (project.clone(), change.name.clone())
            }
            ChangeRef::CrossModuleTag { project, tag } => {
                let info = opts.modules.get(project).ok_or_else(|| {
                    slipway_core::WorkspaceError::UnknownModule(project.clone())
                })?;
                let cross =
                    slipway_core::parse_plan_file_simple(&info.path.join(PLAN_FILE))?;
                let change = cross.tagged_change(tag).ok_or_else(|| {
                    MigrateError::Resolve(slipway_core::ResolveError::TagNotFound {
                        project: project.clone(),
                        tag: tag.clone(),
                    })
                })?;
                (project.clone(), change.name.clone())
            }
            _ => unreachable!("target_cutoff is only called for qualified references"),
        };

        let deployed_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT c.deployed_at FROM slipway.changes c \
             WHERE c.project = $1 AND c.change_name = $2",
        )
        .bind(&project)
        .bind(&change)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| SqlError::new(e, None, self.debug()))?;
        deployed_at.ok_or(MigrateError::NotDeployed { project, change })
    }

    /// Revert every change in any project deployed strictly after
    /// `cutoff`, newest first.
    async fn revert_chronological(
        &self,
        cutoff: DateTime<Utc>,
        opts: &RevertOptions,
    ) -> Result<RevertReport, MigrateError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT c.project, c.change_name FROM slipway.changes c \
             WHERE c.deployed_at > $1 ORDER BY c.deployed_at DESC",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(|e| SqlError::new(e, None, self.debug()))?;

        let mut pending = Vec::with_capacity(rows.len());
        for (project, change) in rows {
            let info = opts
                .modules
                .get(&project)
                .ok_or_else(|| slipway_core::WorkspaceError::UnknownModule(project.clone()))?;
            pending.push(PendingRevert {
                label: format!("{project}:{change}"),
                script_dir: info.path.clone(),
                project,
                change,
            });
        }

        self.guard_dependents(&pending).await?;
        self.execute_reverts(pending, opts.use_transaction, RevertReport::default())
            .await
    }

    /// Reject the whole batch when any planned change still has a
    /// deployed dependent outside the batch.
    async fn guard_dependents(&self, pending: &[PendingRevert]) -> Result<(), MigrateError> {
        for item in pending {
            let dependents = self.get_dependents(&item.project, &item.change).await?;
            for (dep_project, dep_change) in dependents {
                let planned = pending
                    .iter()
                    .any(|p| p.project == dep_project && p.change == dep_change);
                if !planned {
                    return Err(MigrateError::RevertBlocked {
                        change: item.change.clone(),
                        dependent: format!("{dep_project}:{dep_change}"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute_reverts(
        &self,
        pending: Vec<PendingRevert>,
        use_transaction: bool,
        mut report: RevertReport,
    ) -> Result<RevertReport, MigrateError> {
        let mut tx: Option<Transaction<'_, Postgres>> = if use_transaction {
            Some(
                self.pool()
                    .begin()
                    .await
                    .map_err(|e| SqlError::new(e, None, self.debug()))?,
            )
        } else {
            None
        };

        for item in pending {
            let path = script_path(&item.script_dir, ScriptKind::Revert, &item.change);
            let raw = std::fs::read_to_string(&path)
                .map_err(|source| MigrateError::Script { path, source })?;
            let sql = clean_sql(&raw);

            if self.debug().verbose {
                tracing::info!(project = %item.project, change = %item.change, "reverting");
            } else {
                tracing::debug!(project = %item.project, change = %item.change, "reverting");
            }

            let query = sqlx::query("CALL slipway.revert($1, $2, $3)")
                .bind(&item.project)
                .bind(&item.change)
                .bind(&sql);
            let executed = match tx.as_mut() {
                Some(t) => query.execute(&mut **t).await,
                None => query.execute(self.pool()).await,
            };

            if let Err(err) = executed {
                let sql_err = SqlError::new(err, Some(&sql), self.debug());
                if let Some(t) = tx.take() {
                    let _ = t.rollback().await;
                }
                self.log_failure("revert_fail", &item.project, &item.change, &sql_err)
                    .await;
                tracing::error!(project = %item.project, change = %item.change, error = %sql_err, "revert failed");
                return Err(MigrateError::RevertFailed {
                    project: item.project,
                    change: item.change,
                    reverted: report.reverted,
                    skipped: report.skipped,
                    source: sql_err,
                });
            }
            report.reverted.push(item.label);
        }

        if let Some(t) = tx {
            t.commit()
                .await
                .map_err(|e| SqlError::new(e, None, self.debug()))?;
        }
        Ok(report)
    }
}
