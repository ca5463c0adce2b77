//! Verify across a module closure with one aggregate outcome.

use slipway_core::workspace::ClosureEntry;

use crate::error::MigrateError;
use crate::migrate::{Migrator, VerifyOptions, VerifyReport, verify_outcome};

use super::{ModuleOperation, resolve_target};

/// Verify a target module and (recursively) its dependency closure, in
/// closure order. Individual failures never stop the sweep; the
/// combined failures become one error at the end.
pub async fn verify_modules(op: &ModuleOperation) -> Result<(), MigrateError> {
    let target = resolve_target(op)?;
    let migrator = Migrator::connect(op.database.clone(), op.debug).await?;

    let closure = if op.recursive {
        target.workspace.module_closure(&target.module)?
    } else {
        vec![ClosureEntry::Module(target.module.clone())]
    };

    let mut combined = VerifyReport::default();
    for entry in closure {
        let ClosureEntry::Module(name) = entry else {
            continue;
        };
        let is_target = name == target.module;
        let boundary = if is_target { target.to_change.clone() } else { None };

        let info = target.workspace.module(&name)?;
        let report = migrator
            .verify(
                &info.path,
                &VerifyOptions {
                    to_change: boundary,
                    source: op.source(),
                    modules: target.workspace.modules.clone(),
                },
            )
            .await
            .map_err(|source| MigrateError::ModuleFailed {
                module: name.clone(),
                operation: "verify",
                source: Box::new(source),
            })?;
        tracing::info!(
            module = %name,
            verified = report.verified.len(),
            failed = report.failed.len(),
            "module verified"
        );
        combined.verified.extend(
            report.verified.into_iter().map(|c| format!("{name}:{c}")),
        );
        combined
            .failed
            .extend(report.failed.into_iter().map(|c| format!("{name}:{c}")));
    }
    verify_outcome(&combined)
}
