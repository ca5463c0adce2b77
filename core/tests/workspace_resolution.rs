//! On-disk fixtures: a two-module workspace exercised end to end
//! through plan parsing, workspace discovery, and both dependency
//! sources.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use slipway_core::resolver::{
    DependencySource, ResolveOptions, TagResolution, resolve_dependencies,
};
use slipway_core::workspace::{ClosureEntry, ProjectContext, Workspace};
use slipway_core::{PLAN_FILE, parse_plan_file};

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Workspace fixture:
///   auth     — users → roles, tagged @v1.0.0, requires citext
///   billing  — schema → invoices (invoices requires auth:@v1.0.0)
fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(&root.join("slipway.toml"), "[workspace]\nmodules = [\"packages\"]\n");

    let auth = root.join("packages/auth");
    write(
        &auth.join(PLAN_FILE),
        "%syntax-version=1.0.0\n\
         %project=auth\n\
         \n\
         users 2023-01-02T10:00:00Z ada <ada@example.com> # users table\n\
         roles [users] 2023-01-03T10:00:00Z ada <ada@example.com> # role mapping\n\
         @v1.0.0 2023-01-04T10:00:00Z ada <ada@example.com> # first release\n",
    );
    write(
        &auth.join("slipway.toml"),
        "[module]\nrequires = [\"citext\"]\n",
    );
    write(
        &auth.join("deploy/users.sql"),
        "-- Deploy auth:users to pg\n\nBEGIN;\nCREATE TABLE users (id int);\nCOMMIT;\n",
    );
    write(
        &auth.join("deploy/roles.sql"),
        "-- Deploy auth:roles to pg\n-- requires: users\n\nBEGIN;\nCREATE TABLE roles (id int);\nCOMMIT;\n",
    );
    write(&auth.join("revert/users.sql"), "DROP TABLE users;\n");
    write(&auth.join("revert/roles.sql"), "DROP TABLE roles;\n");

    let billing = root.join("packages/billing");
    write(
        &billing.join(PLAN_FILE),
        "%syntax-version=1.0.0\n\
         %project=billing\n\
         \n\
         schema 2023-02-01T10:00:00Z ada <ada@example.com> # billing schema\n\
         invoices [schema auth:@v1.0.0] 2023-02-02T10:00:00Z ada <ada@example.com> # invoices\n",
    );
    write(
        &billing.join("slipway.toml"),
        "[module]\nrequires = [\"auth\"]\n",
    );
    write(
        &billing.join("deploy/schema.sql"),
        "-- Deploy billing:schema to pg\n\nCREATE SCHEMA billing;\n",
    );
    write(
        &billing.join("deploy/invoices.sql"),
        "-- Deploy billing:invoices to pg\n-- requires: schema\n-- requires: auth:@v1.0.0\n\nCREATE TABLE billing.invoices (id int);\n",
    );

    dir
}

#[test]
fn workspace_scan_finds_both_modules() {
    let dir = fixture();
    let ws = Workspace::load(dir.path()).unwrap();
    let names: Vec<_> = ws.modules.keys().cloned().collect();
    assert_eq!(names, vec!["auth", "billing"]);
    assert_eq!(ws.modules["billing"].requires, vec!["auth"]);
    assert_eq!(ws.unknown_requires(), vec![]);
}

#[test]
fn closure_installs_auth_before_billing() {
    let dir = fixture();
    let ws = Workspace::load(dir.path()).unwrap();
    assert_eq!(
        ws.module_closure("billing").unwrap(),
        vec![
            ClosureEntry::Extension("citext".to_string()),
            ClosureEntry::Module("auth".to_string()),
            ClosureEntry::Module("billing".to_string()),
        ]
    );
}

#[test]
fn plan_and_sql_sources_agree() {
    let dir = fixture();
    let ws = Workspace::load(dir.path()).unwrap();
    let billing_dir = ws.modules["billing"].path.clone();

    let from_plan = resolve_dependencies(
        &billing_dir,
        "billing",
        &ResolveOptions {
            tag_resolution: TagResolution::Resolve,
            source: DependencySource::Plan,
            load_plan_files: true,
            modules: ws.modules.clone(),
        },
    )
    .unwrap();
    let from_sql = resolve_dependencies(
        &billing_dir,
        "billing",
        &ResolveOptions {
            tag_resolution: TagResolution::Resolve,
            source: DependencySource::Sql,
            load_plan_files: true,
            modules: ws.modules.clone(),
        },
    )
    .unwrap();

    assert_eq!(from_plan.resolved, vec!["schema", "invoices"]);
    assert_eq!(from_plan.resolved, from_sql.resolved);
    assert_eq!(from_plan.deps, from_sql.deps);
    assert_eq!(from_plan.resolved_tags["auth:@v1.0.0"], "auth:roles");
    assert_eq!(
        from_plan.deps["/deploy/invoices.sql"],
        vec!["schema", "auth:roles"]
    );
}

#[test]
fn context_probing_distinguishes_workspace_and_module() {
    let dir = fixture();
    let root = dir.path();

    assert_eq!(
        ProjectContext::probe(root).unwrap(),
        ProjectContext::Workspace { root: root.to_path_buf() }
    );

    let auth_dir = root.join("packages/auth");
    match ProjectContext::probe(&auth_dir).unwrap() {
        ProjectContext::ModuleInsideWorkspace { root: r, project, .. } => {
            assert_eq!(r, root);
            assert_eq!(project, "auth");
        }
        other => panic!("unexpected context {other:?}"),
    }

    let outside = TempDir::new().unwrap();
    assert_eq!(
        ProjectContext::probe(outside.path()).unwrap(),
        ProjectContext::Outside
    );
}

#[test]
fn standalone_module_probes_without_a_workspace() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join(PLAN_FILE),
        "%project=solo\n\none 2023-01-02T10:00:00Z ada <a@b.c> # first\n",
    );
    match ProjectContext::probe(dir.path()).unwrap() {
        ProjectContext::Module { project, .. } => assert_eq!(project, "solo"),
        other => panic!("unexpected context {other:?}"),
    }
    let ws = Workspace::standalone(dir.path()).unwrap();
    assert_eq!(ws.modules.len(), 1);
    assert!(ws.modules.contains_key("solo"));
}

#[test]
fn accumulating_parser_reports_file_errors_with_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(PLAN_FILE);
    write(
        &path,
        "%project=p\n\
         one 2023-01-02T10:00:00Z ada <a@b.c> # ok\n\
         one 2023-01-03T10:00:00Z ada <a@b.c> # duplicate\n",
    );
    let file = parse_plan_file(&path).unwrap();
    assert_eq!(file.errors.len(), 1);
    assert_eq!(file.errors[0].line, 3);
    assert_eq!(file.plan.changes.len(), 1);
}
