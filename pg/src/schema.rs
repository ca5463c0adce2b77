//! Metadata schema bootstrap.
//!
//! All deployment state lives in the `slipway` schema of the target
//! database. The DDL below is idempotent and re-applied on first use of
//! every client, so routine changes ship automatically.

/// Schema holding deployment state.
pub const METADATA_SCHEMA: &str = "slipway";

/// Idempotent bootstrap DDL: state tables plus the routines the client
/// calls. The `deploy`/`revert` procedures run the script body and
/// record state in the same transaction, so a rollback erases both.
pub const BOOTSTRAP_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS slipway;

CREATE TABLE IF NOT EXISTS slipway.projects (
    project     text PRIMARY KEY,
    uri         text,
    created_at  timestamptz NOT NULL DEFAULT clock_timestamp()
);

CREATE TABLE IF NOT EXISTS slipway.changes (
    change_id    serial PRIMARY KEY,
    project      text NOT NULL REFERENCES slipway.projects (project),
    change_name  text NOT NULL,
    script_hash  text NOT NULL,
    deployed_at  timestamptz NOT NULL DEFAULT clock_timestamp(),
    UNIQUE (project, change_name)
);

CREATE TABLE IF NOT EXISTS slipway.dependencies (
    change_id  int NOT NULL REFERENCES slipway.changes (change_id) ON DELETE CASCADE,
    requires   text NOT NULL
);

CREATE TABLE IF NOT EXISTS slipway.events (
    event_id       serial PRIMARY KEY,
    event_type     text NOT NULL,
    change_name    text NOT NULL,
    project        text NOT NULL,
    occurred_at    timestamptz NOT NULL DEFAULT clock_timestamp(),
    error_message  text,
    error_code     text
);

CREATE OR REPLACE FUNCTION slipway.is_deployed(p_project text, p_change text)
RETURNS boolean AS $$
    SELECT EXISTS (
        SELECT 1 FROM slipway.changes c
        WHERE c.project = p_project AND c.change_name = p_change
    );
$$ LANGUAGE sql STABLE;

CREATE OR REPLACE PROCEDURE slipway.deploy(
    p_project   text,
    p_change    text,
    p_hash      text,
    p_requires  text[],
    p_sql       text,
    p_log_only  boolean
) AS $$
DECLARE
    v_id int;
BEGIN
    INSERT INTO slipway.projects (project) VALUES (p_project)
    ON CONFLICT (project) DO NOTHING;

    IF NOT p_log_only AND p_sql <> '' THEN
        EXECUTE p_sql;
    END IF;

    INSERT INTO slipway.changes (project, change_name, script_hash)
    VALUES (p_project, p_change, p_hash)
    RETURNING change_id INTO v_id;

    INSERT INTO slipway.dependencies (change_id, requires)
    SELECT v_id, r FROM unnest(p_requires) AS r;

    INSERT INTO slipway.events (event_type, change_name, project)
    VALUES ('deploy', p_change, p_project);
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE PROCEDURE slipway.revert(
    p_project  text,
    p_change   text,
    p_sql      text
) AS $$
DECLARE
    v_id int;
BEGIN
    SELECT c.change_id INTO v_id FROM slipway.changes c
    WHERE c.project = p_project AND c.change_name = p_change;
    IF v_id IS NULL THEN
        RAISE EXCEPTION 'change % of project % is not deployed', p_change, p_project;
    END IF;

    IF p_sql <> '' THEN
        EXECUTE p_sql;
    END IF;

    DELETE FROM slipway.changes WHERE change_id = v_id;

    INSERT INTO slipway.events (event_type, change_name, project)
    VALUES ('revert', p_change, p_project);
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION slipway.verify(
    p_project  text,
    p_change   text,
    p_sql      text
) RETURNS boolean AS $$
BEGIN
    IF p_sql <> '' THEN
        EXECUTE p_sql;
    END IF;
    RETURN true;
END;
$$ LANGUAGE plpgsql;

CREATE OR REPLACE FUNCTION slipway.status(p_project text DEFAULT NULL)
RETURNS TABLE (
    project      text,
    change_name  text,
    script_hash  text,
    deployed_at  timestamptz
) AS $$
    SELECT c.project, c.change_name, c.script_hash, c.deployed_at
    FROM slipway.changes c
    WHERE p_project IS NULL OR c.project = p_project
    ORDER BY c.deployed_at;
$$ LANGUAGE sql STABLE;

CREATE OR REPLACE FUNCTION slipway.get_dependents(p_project text, p_change text)
RETURNS TABLE (
    project      text,
    change_name  text
) AS $$
    SELECT c.project, c.change_name
    FROM slipway.changes c
    JOIN slipway.dependencies d ON d.change_id = c.change_id
    WHERE d.requires = p_project || ':' || p_change
       OR (c.project = p_project AND d.requires = p_change);
$$ LANGUAGE sql STABLE;
"#;
