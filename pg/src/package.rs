//! Fast-path packaging.
//!
//! Packages a module's entire resolved deploy SQL into one batch so a
//! dependency module can be installed in a single round-trip, then
//! registers every change log-only so the metadata schema still knows
//! what is deployed. Packages are cached per target database and module.

use std::collections::HashMap;

use slipway_core::resolver::{DependencySource, ResolveOptions, TagResolution, resolve_dependencies};
use slipway_core::workspace::Workspace;
use slipway_core::{ScriptKind, clean_sql, script_hash, script_path};

use crate::config::PgConfig;
use crate::error::MigrateError;

/// One change's slice of a package.
#[derive(Debug, Clone)]
pub struct PackagedChange {
    pub change: String,
    pub sql: String,
    pub hash: String,
    pub requires: Vec<String>,
}

/// A module's resolved SQL, ready to execute as one batch.
#[derive(Debug, Clone)]
pub struct Package {
    pub module: String,
    pub changes: Vec<PackagedChange>,
}

impl Package {
    /// The whole batch as one script, change boundaries commented.
    pub fn sql(&self) -> String {
        let mut out = String::new();
        for item in &self.changes {
            out.push_str(&format!("-- {}:{}\n", self.module, item.change));
            out.push_str(&item.sql);
            out.push_str("\n\n");
        }
        out
    }
}

/// Composite cache key. A struct rather than a formatted string, so the
/// key can never drift from the fields it is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageKey {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub module: String,
}

impl PackageKey {
    pub fn new(config: &PgConfig, module: &str) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            database: config.database.clone(),
            module: module.to_string(),
        }
    }
}

/// In-process package cache for repeated deploys within one run.
#[derive(Debug, Default)]
pub struct PackageCache {
    packages: HashMap<PackageKey, Package>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PackageKey) -> Option<&Package> {
        self.packages.get(key)
    }

    pub fn insert(&mut self, key: PackageKey, package: Package) -> &Package {
        self.packages.entry(key).or_insert(package)
    }
}

/// Resolve and concatenate a module's deploy scripts in dependency
/// order.
pub fn package_module(
    workspace: &Workspace,
    module: &str,
    source: DependencySource,
) -> Result<Package, MigrateError> {
    let info = workspace.module(module)?;
    let resolution = resolve_dependencies(
        &info.path,
        module,
        &ResolveOptions {
            tag_resolution: TagResolution::Resolve,
            source,
            load_plan_files: true,
            modules: workspace.modules.clone(),
        },
    )?;

    let mut changes = Vec::with_capacity(resolution.resolved.len());
    for change in &resolution.resolved {
        let path = script_path(&info.path, ScriptKind::Deploy, change);
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| MigrateError::Script { path, source })?;
        changes.push(PackagedChange {
            change: change.clone(),
            sql: clean_sql(&raw),
            hash: script_hash(&raw),
            requires: resolution
                .deps
                .get(&format!("/deploy/{change}.sql"))
                .cloned()
                .unwrap_or_default(),
        });
    }
    Ok(Package { module: module.to_string(), changes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn packages_cleaned_scripts_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            &root.join("slipway.plan"),
            "%project=widgets\n\n\
             schema 2023-01-02T10:00:00Z ada <a@b.c> # schema\n\
             table [schema] 2023-01-03T10:00:00Z ada <a@b.c> # table\n",
        );
        write(
            &root.join("deploy/schema.sql"),
            "BEGIN;\nCREATE SCHEMA widgets;\nCOMMIT;\n",
        );
        write(
            &root.join("deploy/table.sql"),
            "BEGIN;\nCREATE TABLE widgets.w (id int);\nCOMMIT;\n",
        );

        let ws = slipway_core::Workspace::standalone(root).unwrap();
        let package =
            package_module(&ws, "widgets", DependencySource::Plan).unwrap();
        assert_eq!(package.changes.len(), 2);
        assert_eq!(package.changes[0].change, "schema");
        assert_eq!(package.changes[1].change, "table");
        assert_eq!(package.changes[1].requires, vec!["schema"]);

        let sql = package.sql();
        assert!(!sql.contains("BEGIN"));
        assert!(!sql.contains("COMMIT"));
        let schema_pos = sql.find("CREATE SCHEMA widgets").unwrap();
        let table_pos = sql.find("CREATE TABLE widgets.w").unwrap();
        assert!(schema_pos < table_pos);
    }

    #[test]
    fn cache_keys_are_structural() {
        let config = PgConfig::default();
        let a = PackageKey::new(&config, "auth");
        let b = PackageKey::new(&config, "auth");
        let c = PackageKey::new(&config, "billing");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut cache = PackageCache::new();
        cache.insert(a.clone(), Package { module: "auth".to_string(), changes: vec![] });
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_none());
    }
}
