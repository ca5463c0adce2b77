//! Live-database properties.
//!
//! These need a scratch Postgres and are ignored by default:
//!
//! ```sh
//! SLIPWAY_TEST_DATABASE_URL=postgres://postgres@localhost/slipway_test \
//!     cargo test -p slipway-pg -- --ignored --test-threads=1
//! ```
//!
//! Run single-threaded: the tests share one database and clean up after
//! themselves, but not concurrently.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use slipway_core::PLAN_FILE;
use slipway_core::workspace::Workspace;
use slipway_pg::{
    DebugOptions, DeployOptions, MigrateError, Migrator, PgConfig, RevertOptions,
};

fn test_config() -> Option<PgConfig> {
    let url = std::env::var("SLIPWAY_TEST_DATABASE_URL").ok()?;
    PgConfig::from_url(&url).ok()
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn plan_line(name: &str, deps: &str, day: u32, comment: &str) -> String {
    let deps = if deps.is_empty() { String::new() } else { format!("[{deps}] ") };
    format!("{name} {deps}2023-03-{day:02}T10:00:00Z ada <ada@example.com> # {comment}\n")
}

/// A standalone three-change module: schema → table → index, all
/// against its own uniquely named schema so reruns start clean.
fn widgets_fixture(project: &str, break_third: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let mut plan = format!("%syntax-version=1.0.0\n%project={project}\n\n");
    plan.push_str(&plan_line("schema", "", 1, "schema"));
    plan.push_str(&plan_line("table", "schema", 2, "table"));
    plan.push_str(&plan_line("index", "table", 3, "index"));
    write(&root.join(PLAN_FILE), &plan);

    write(
        &root.join("deploy/schema.sql"),
        &format!("CREATE SCHEMA {project};\n"),
    );
    write(
        &root.join("deploy/table.sql"),
        &format!("CREATE TABLE {project}.widgets (id int PRIMARY KEY);\n"),
    );
    let index_sql = if break_third {
        // Duplicate table creation: fails with SQLSTATE 42P07.
        format!("CREATE TABLE {project}.widgets (id int);\n")
    } else {
        format!("CREATE INDEX widgets_idx ON {project}.widgets (id);\n")
    };
    write(&root.join("deploy/index.sql"), &index_sql);

    write(&root.join("revert/schema.sql"), &format!("DROP SCHEMA {project};\n"));
    write(&root.join("revert/table.sql"), &format!("DROP TABLE {project}.widgets;\n"));
    write(
        &root.join("revert/index.sql"),
        &format!("DROP INDEX {project}.widgets_idx;\n"),
    );
    for change in ["schema", "table", "index"] {
        write(
            &root.join(format!("verify/{change}.sql")),
            &format!("SELECT 1/count(*) FROM pg_namespace WHERE nspname = '{project}';\n"),
        );
    }
    dir
}

/// Best-effort cleanup so reruns start from nothing.
async fn scratch(config: &PgConfig, projects: &[&str]) {
    let pool = config.connect().await.expect("connect for cleanup");
    for project in projects {
        for stmt in [
            format!(
                "DELETE FROM slipway.dependencies d USING slipway.changes c \
                 WHERE d.change_id = c.change_id AND c.project = '{project}'"
            ),
            format!("DELETE FROM slipway.changes WHERE project = '{project}'"),
            format!("DELETE FROM slipway.events WHERE project = '{project}'"),
            format!("DELETE FROM slipway.projects WHERE project = '{project}'"),
            format!("DROP SCHEMA IF EXISTS \"{project}\" CASCADE"),
        ] {
            let _ = sqlx::raw_sql(&stmt).execute(&pool).await;
        }
    }
}

async fn event_count(config: &PgConfig, project: &str, event_type: &str) -> i64 {
    let pool = config.connect().await.expect("connect");
    sqlx::query_scalar(
        "SELECT count(*) FROM slipway.events WHERE project = $1 AND event_type = $2",
    )
    .bind(project)
    .bind(event_type)
    .fetch_one(&pool)
    .await
    .expect("count events")
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn deploy_is_idempotent() {
    let Some(config) = test_config() else { return };
    let fixture = widgets_fixture("idem_widgets", false);
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["idem_widgets"]).await;

    let first = migrator
        .deploy(fixture.path(), &DeployOptions::default())
        .await
        .expect("first deploy");
    assert_eq!(first.deployed, vec!["schema", "table", "index"]);
    assert!(first.skipped.is_empty());

    let second = migrator
        .deploy(fixture.path(), &DeployOptions::default())
        .await
        .expect("second deploy");
    assert!(second.deployed.is_empty());
    assert_eq!(second.skipped, vec!["schema", "table", "index"]);

    scratch(&config, &["idem_widgets"]).await;
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn revert_boundary_is_exclusive() {
    let Some(config) = test_config() else { return };
    let fixture = widgets_fixture("bound_widgets", false);
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["bound_widgets"]).await;

    migrator
        .deploy(fixture.path(), &DeployOptions::default())
        .await
        .expect("deploy");
    let report = migrator
        .revert(
            fixture.path(),
            &RevertOptions {
                to_change: Some("table".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("revert");
    assert_eq!(report.reverted, vec!["index"]);
    assert!(migrator.is_deployed("bound_widgets", "table").await.unwrap());
    assert!(migrator.is_deployed("bound_widgets", "schema").await.unwrap());
    assert!(!migrator.is_deployed("bound_widgets", "index").await.unwrap());

    scratch(&config, &["bound_widgets"]).await;
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn transactional_deploy_rolls_back_entirely() {
    let Some(config) = test_config() else { return };
    let fixture = widgets_fixture("txn_widgets", true);
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["txn_widgets"]).await;

    let err = migrator
        .deploy(fixture.path(), &DeployOptions::default())
        .await
        .expect_err("third change must fail");
    assert!(matches!(err, MigrateError::DeployFailed { ref change, .. } if change == "index"));

    let rows = migrator.status(Some("txn_widgets")).await.expect("status");
    assert!(rows.is_empty(), "rollback must leave zero changes");
    assert_eq!(event_count(&config, "txn_widgets", "deploy_fail").await, 1);

    scratch(&config, &["txn_widgets"]).await;
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn non_transactional_deploy_keeps_prior_changes() {
    let Some(config) = test_config() else { return };
    let fixture = widgets_fixture("part_widgets", true);
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["part_widgets"]).await;

    let err = migrator
        .deploy(
            fixture.path(),
            &DeployOptions { use_transaction: false, ..Default::default() },
        )
        .await
        .expect_err("third change must fail");
    let MigrateError::DeployFailed { deployed, .. } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(deployed, &["schema", "table"]);

    let rows = migrator.status(Some("part_widgets")).await.expect("status");
    assert_eq!(rows.len(), 2, "first two changes stay committed");
    assert_eq!(event_count(&config, "part_widgets", "deploy_fail").await, 1);

    scratch(&config, &["part_widgets"]).await;
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn log_only_records_without_executing() {
    let Some(config) = test_config() else { return };
    let fixture = widgets_fixture("log_widgets", false);
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["log_widgets"]).await;

    migrator
        .deploy(
            fixture.path(),
            &DeployOptions { log_only: true, ..Default::default() },
        )
        .await
        .expect("log-only deploy");
    assert!(migrator.is_deployed("log_widgets", "table").await.unwrap());

    let pool = config.connect().await.unwrap();
    let schema_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = 'log_widgets')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!schema_exists, "log-only must not touch the schema");

    scratch(&config, &["log_widgets"]).await;
}

/// Two projects: `chrono_a` tagged @v1.0.0 after its first change, and
/// `chrono_b` whose table depends on `chrono_a:@v1.0.0`.
fn cross_project_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(&root.join("slipway.toml"), "[workspace]\n");

    let a = root.join("chrono_a");
    let mut plan = "%syntax-version=1.0.0\n%project=chrono_a\n\n".to_string();
    plan.push_str(&plan_line("base_types", "", 1, "base types"));
    plan.push_str("@v1.0.0 2023-03-01T11:00:00Z ada <ada@example.com> # v1\n");
    plan.push_str(&plan_line("extras", "base_types", 2, "extras"));
    write(&a.join(PLAN_FILE), &plan);
    write(&a.join("deploy/base_types.sql"), "CREATE SCHEMA chrono_a;\n");
    write(
        &a.join("deploy/extras.sql"),
        "CREATE TABLE chrono_a.extras (id int);\n",
    );
    write(&a.join("revert/base_types.sql"), "DROP SCHEMA chrono_a;\n");
    write(&a.join("revert/extras.sql"), "DROP TABLE chrono_a.extras;\n");

    let b = root.join("chrono_b");
    let mut plan = "%syntax-version=1.0.0\n%project=chrono_b\n\n".to_string();
    plan.push_str(&plan_line("app_tables", "chrono_a:@v1.0.0", 3, "app tables"));
    write(&b.join(PLAN_FILE), &plan);
    write(&b.join("slipway.toml"), "[module]\nrequires = [\"chrono_a\"]\n");
    write(&b.join("deploy/app_tables.sql"), "CREATE SCHEMA chrono_b;\n");
    write(&b.join("revert/app_tables.sql"), "DROP SCHEMA chrono_b;\n");

    dir
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn cross_module_revert_is_guarded() {
    let Some(config) = test_config() else { return };
    let fixture = cross_project_fixture();
    let ws = Workspace::load(fixture.path()).expect("workspace");
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["chrono_a", "chrono_b"]).await;

    let a_dir = ws.modules["chrono_a"].path.clone();
    let b_dir = ws.modules["chrono_b"].path.clone();
    let deploy = DeployOptions { modules: ws.modules.clone(), ..Default::default() };
    migrator.deploy(&a_dir, &deploy).await.expect("deploy chrono_a");
    migrator.deploy(&b_dir, &deploy).await.expect("deploy chrono_b");

    // Reverting chrono_a in full would take base_types with it, but
    // chrono_b:app_tables still requires it.
    let err = migrator
        .revert(
            &a_dir,
            &RevertOptions { modules: ws.modules.clone(), ..Default::default() },
        )
        .await
        .expect_err("guard must block");
    assert_eq!(
        err.to_string(),
        "Cannot revert base_types: required by chrono_b:app_tables"
    );
    for (project, change) in [
        ("chrono_a", "base_types"),
        ("chrono_a", "extras"),
        ("chrono_b", "app_tables"),
    ] {
        assert!(migrator.is_deployed(project, change).await.unwrap());
    }

    migrator
        .revert(&b_dir, &RevertOptions { modules: ws.modules.clone(), ..Default::default() })
        .await
        .expect("revert chrono_b");
    migrator
        .revert(&a_dir, &RevertOptions { modules: ws.modules.clone(), ..Default::default() })
        .await
        .expect("revert chrono_a");
    scratch(&config, &["chrono_a", "chrono_b"]).await;
}

#[tokio::test]
#[ignore = "needs SLIPWAY_TEST_DATABASE_URL"]
async fn chronological_revert_crosses_projects() {
    let Some(config) = test_config() else { return };
    let fixture = cross_project_fixture();
    let ws = Workspace::load(fixture.path()).expect("workspace");
    let migrator = Migrator::connect(config.clone(), DebugOptions::default())
        .await
        .expect("connect");
    scratch(&config, &["chrono_a", "chrono_b"]).await;

    let a_dir = ws.modules["chrono_a"].path.clone();
    let b_dir = ws.modules["chrono_b"].path.clone();
    let deploy = DeployOptions { modules: ws.modules.clone(), ..Default::default() };
    migrator.deploy(&a_dir, &deploy).await.expect("deploy chrono_a");
    migrator.deploy(&b_dir, &deploy).await.expect("deploy chrono_b");

    // A qualified tag target reverts everything deployed after the tag's
    // change, in both projects, newest first.
    let report = migrator
        .revert(
            &a_dir,
            &RevertOptions {
                to_change: Some("chrono_a:@v1.0.0".to_string()),
                modules: ws.modules.clone(),
                ..Default::default()
            },
        )
        .await
        .expect("chronological revert");
    assert_eq!(report.reverted, vec!["chrono_b:app_tables", "chrono_a:extras"]);
    assert!(migrator.is_deployed("chrono_a", "base_types").await.unwrap());
    assert!(!migrator.is_deployed("chrono_a", "extras").await.unwrap());
    assert!(!migrator.is_deployed("chrono_b", "app_tables").await.unwrap());

    migrator
        .revert(&a_dir, &RevertOptions { modules: ws.modules.clone(), ..Default::default() })
        .await
        .expect("revert the rest");
    scratch(&config, &["chrono_a", "chrono_b"]).await;
}
