//! Recursive deploy across a module closure.

use slipway_core::workspace::ClosureEntry;

use crate::error::{MigrateError, SqlError};
use crate::migrate::{DeployOptions, Migrator};
use crate::package::{Package, PackageCache, PackageKey, package_module};

use super::{ModuleOperation, resolve_target};

/// Deploy a target module and (recursively) everything it requires.
///
/// External closure entries become `CREATE EXTENSION` calls; local
/// modules are deployed either via the fast path (one packaged batch
/// per module) or the full migration path. Only the originally
/// requested target honors `to_change`; dependency modules always
/// deploy in full.
pub async fn deploy_modules(op: &ModuleOperation) -> Result<(), MigrateError> {
    let target = resolve_target(op)?;
    let migrator = Migrator::connect(op.database.clone(), op.debug).await?;

    let closure = if op.recursive {
        target.workspace.module_closure(&target.module)?
    } else {
        vec![ClosureEntry::Module(target.module.clone())]
    };

    let mut cache = op.cache.then(PackageCache::new);

    for entry in closure {
        match entry {
            ClosureEntry::Extension(name) => {
                migrator
                    .create_extension(&name)
                    .await
                    .map_err(|source| MigrateError::ModuleFailed {
                        module: name.clone(),
                        operation: "extension install",
                        source: Box::new(source),
                    })?;
            }
            ClosureEntry::Module(name) => {
                let is_target = name == target.module;
                let boundary = if is_target { target.to_change.clone() } else { None };

                // Partial deploys need per-change boundaries, which the
                // packaged batch cannot honor.
                let outcome = if op.fast && boundary.is_none() {
                    deploy_fast(&migrator, op, &target.workspace, &name, cache.as_mut()).await
                } else {
                    let info = target.workspace.module(&name)?;
                    migrator
                        .deploy(
                            &info.path,
                            &DeployOptions {
                                to_change: boundary,
                                use_transaction: op.use_transaction,
                                log_only: op.log_only,
                                source: op.source(),
                                modules: target.workspace.modules.clone(),
                            },
                        )
                        .await
                        .map(|report| {
                            tracing::info!(
                                module = %name,
                                deployed = report.deployed.len(),
                                skipped = report.skipped.len(),
                                "module deployed"
                            );
                        })
                };
                outcome.map_err(|source| MigrateError::ModuleFailed {
                    module: name.clone(),
                    operation: "deploy",
                    source: Box::new(source),
                })?;
            }
        }
    }
    Ok(())
}

/// Fast path: execute the module's packaged SQL change by change,
/// registering each change log-only in the same transaction so the
/// metadata schema stays authoritative.
async fn deploy_fast(
    migrator: &Migrator,
    op: &ModuleOperation,
    workspace: &slipway_core::Workspace,
    module: &str,
    cache: Option<&mut PackageCache>,
) -> Result<(), MigrateError> {
    let key = PackageKey::new(migrator.config(), module);
    let package: Package = match cache {
        Some(cache) => match cache.get(&key) {
            Some(found) => found.clone(),
            None => {
                let built = package_module(workspace, module, op.source())?;
                cache.insert(key, built.clone());
                built
            }
        },
        None => package_module(workspace, module, op.source())?,
    };

    let mut tx = if op.use_transaction {
        Some(
            migrator
                .pool()
                .begin()
                .await
                .map_err(|e| SqlError::new(e, None, migrator.debug()))?,
        )
    } else {
        None
    };

    let mut applied = 0usize;
    for item in &package.changes {
        if migrator.is_deployed(module, &item.change).await? {
            continue;
        }
        let register = sqlx::query("CALL slipway.deploy($1, $2, $3, $4, $5, $6)")
            .bind(module)
            .bind(&item.change)
            .bind(&item.hash)
            .bind(&item.requires)
            .bind("")
            .bind(false);
        let executed = match tx.as_mut() {
            Some(t) => {
                let body = sqlx::raw_sql(&item.sql).execute(&mut **t).await;
                match body {
                    Ok(_) => register.execute(&mut **t).await,
                    Err(e) => Err(e),
                }
            }
            None => {
                let body = sqlx::raw_sql(&item.sql).execute(migrator.pool()).await;
                match body {
                    Ok(_) => register.execute(migrator.pool()).await,
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(err) = executed {
            let sql_err = SqlError::new(err, Some(&item.sql), migrator.debug());
            if let Some(t) = tx.take() {
                let _ = t.rollback().await;
            }
            migrator
                .log_failure("deploy_fail", module, &item.change, &sql_err)
                .await;
            return Err(MigrateError::DeployFailed {
                project: module.to_string(),
                change: item.change.clone(),
                hash: item.hash.clone(),
                requires: item.requires.join(", "),
                deployed: Vec::new(),
                skipped: Vec::new(),
                source: sql_err,
            });
        }
        applied += 1;
    }

    if let Some(t) = tx {
        t.commit()
            .await
            .map_err(|e| SqlError::new(e, None, migrator.debug()))?;
    }
    tracing::info!(module = %module, changes = applied, "module fast-deployed");
    Ok(())
}
