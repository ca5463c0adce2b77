//! Recursive revert across a module closure, in reverse order.

use slipway_core::workspace::ClosureEntry;

use crate::error::MigrateError;
use crate::migrate::{Migrator, RevertOptions};

use super::{ModuleOperation, resolve_target};

/// Revert a target module and (recursively) its dependency closure, in
/// reverse closure order. Extensions are left installed. Only the
/// requested target honors `to_change`; a qualified `module:@tag`
/// boundary delegates to chronological revert inside the client.
pub async fn revert_modules(op: &ModuleOperation) -> Result<(), MigrateError> {
    let target = resolve_target(op)?;
    let migrator = Migrator::connect(op.database.clone(), op.debug).await?;

    let closure = if op.recursive {
        target.workspace.module_closure(&target.module)?
    } else {
        vec![ClosureEntry::Module(target.module.clone())]
    };

    for entry in closure.into_iter().rev() {
        let ClosureEntry::Module(name) = entry else {
            continue;
        };
        let is_target = name == target.module;
        let boundary = if is_target { target.to_change.clone() } else { None };

        // Reverting up to a boundary inside the target leaves its
        // dependency modules alone; their turn only comes on a full
        // revert.
        if !is_target && target.to_change.is_some() {
            continue;
        }

        let info = target.workspace.module(&name)?;
        let report = migrator
            .revert(
                &info.path,
                &RevertOptions {
                    to_change: boundary,
                    use_transaction: op.use_transaction,
                    source: op.source(),
                    modules: target.workspace.modules.clone(),
                },
            )
            .await
            .map_err(|source| MigrateError::ModuleFailed {
                module: name.clone(),
                operation: "revert",
                source: Box::new(source),
            })?;
        tracing::info!(
            module = %name,
            reverted = report.reverted.len(),
            skipped = report.skipped.len(),
            "module reverted"
        );
    }
    Ok(())
}
