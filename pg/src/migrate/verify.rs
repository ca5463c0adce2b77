//! Verify: a forward sweep that never halts.
//!
//! Unlike deploy and revert, an individual verification failure only
//! marks that change and moves on; callers aggregate the failures into
//! one error at the end.

use std::path::Path;

use slipway_core::resolver::{
    DependencySource, ResolveOptions, TagResolution, resolve_dependencies,
};
use slipway_core::workspace::ModuleMap;
use slipway_core::{PLAN_FILE, ScriptKind, clean_sql, script_path};

use crate::error::{MigrateError, SqlError};

use super::{Migrator, local_target};

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Verify through this change (inclusive) and stop.
    pub to_change: Option<String>,
    pub source: DependencySource,
    pub modules: ModuleMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub verified: Vec<String>,
    pub failed: Vec<String>,
}

impl Migrator {
    /// Run every deployed change's verify script in dependency order.
    pub async fn verify(
        &self,
        module_dir: &Path,
        opts: &VerifyOptions,
    ) -> Result<VerifyReport, MigrateError> {
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

        let mut report = VerifyReport::default();
        for change in &resolution.resolved {
            if !self.is_deployed(&plan.project, change).await? {
                if boundary.as_deref() == Some(change) {
                    break;
                }
                continue;
            }

            let path = script_path(module_dir, ScriptKind::Verify, change);
            let outcome = match std::fs::read_to_string(&path) {
                Ok(raw) => {
                    let sql = clean_sql(&raw);
                    sqlx::query_scalar::<_, bool>("SELECT slipway.verify($1, $2, $3)")
                        .bind(&plan.project)
                        .bind(change)
                        .bind(&sql)
                        .fetch_one(self.pool())
                        .await
                        .map_err(|e| SqlError::new(e, Some(&sql), self.debug()))
                }
                Err(err) => {
                    tracing::warn!(change = %change, path = %path.display(), error = %err, "verify script unreadable");
                    Ok(false)
                }
            };

            match outcome {
                Ok(true) => report.verified.push(change.clone()),
                Ok(false) => report.failed.push(change.clone()),
                Err(err) => {
                    tracing::warn!(project = %plan.project, change = %change, error = %err, "verification failed");
                    report.failed.push(change.clone());
                }
            }

            if boundary.as_deref() == Some(change) {
                break;
            }
        }
        Ok(report)
    }
}

/// Collapse a report into the aggregate error callers throw.
pub fn verify_outcome(report: &VerifyReport) -> Result<(), MigrateError> {
    if report.failed.is_empty() {
        return Ok(());
    }
    Err(MigrateError::VerifyFailed {
        count: report.failed.len(),
        changes: report.failed.join(", "),
    })
}
