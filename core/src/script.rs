//! Script files for a change: `deploy/<name>.sql`, `revert/<name>.sql`,
//! `verify/<name>.sql` under a module root, nested path segments
//! mirrored as directories.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Which of a change's three scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Deploy,
    Revert,
    Verify,
}

impl ScriptKind {
    pub fn dir(self) -> &'static str {
        match self {
            ScriptKind::Deploy => "deploy",
            ScriptKind::Revert => "revert",
            ScriptKind::Verify => "verify",
        }
    }

    /// Capitalized verb used in script header comments.
    pub fn verb(self) -> &'static str {
        match self {
            ScriptKind::Deploy => "Deploy",
            ScriptKind::Revert => "Revert",
            ScriptKind::Verify => "Verify",
        }
    }
}

/// Path of a change's script of the given kind.
pub fn script_path(module_dir: &Path, kind: ScriptKind, change: &str) -> PathBuf {
    let mut path = module_dir.join(kind.dir());
    let mut segments = change.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            // Appended rather than set_extension, so names with dots
            // (`install.v2`) keep their full final segment.
            path.push(format!("{segment}.sql"));
        } else {
            path.push(segment);
        }
    }
    path
}

/// Read a change's script.
pub fn read_script(
    module_dir: &Path,
    kind: ScriptKind,
    change: &str,
) -> Result<String, std::io::Error> {
    std::fs::read_to_string(script_path(module_dir, kind, change))
}

/// SHA-256 of script contents, lowercase hex. Stored with each deployed
/// change as provenance.
pub fn script_hash(contents: &str) -> String {
    let digest = Sha256::digest(contents.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Collect `-- requires: <ref>` header lines from a script. Scanning
/// stops at the first non-comment, non-blank line; one reference per
/// line.
pub fn requires_from_script(sql: &str) -> Vec<String> {
    let mut requires = Vec::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix("--") {
            if let Some(reference) = comment.trim().strip_prefix("requires:") {
                let reference = reference.trim();
                if !reference.is_empty() {
                    requires.push(reference.to_string());
                }
            }
            continue;
        }
        break;
    }
    requires
}

/// Template for a fresh script, matching the header convention the
/// `sql` dependency source reads back.
pub fn script_template(kind: ScriptKind, project: &str, change: &str, requires: &[String]) -> String {
    let mut out = format!("-- {} {project}:{change} to pg\n", kind.verb());
    if kind == ScriptKind::Deploy {
        for dep in requires {
            out.push_str(&format!("-- requires: {dep}\n"));
        }
    }
    out.push('\n');
    out.push_str("BEGIN;\n\n");
    match kind {
        ScriptKind::Deploy | ScriptKind::Revert => out.push_str("-- XXX Add DDLs here.\n"),
        ScriptKind::Verify => out.push_str(&format!("SELECT 1; -- XXX verify {change}\n")),
    }
    out.push_str("\nCOMMIT;\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_change_names_map_to_nested_paths() {
        let path = script_path(Path::new("/mod"), ScriptKind::Deploy, "api/v1/endpoints");
        assert_eq!(path, Path::new("/mod/deploy/api/v1/endpoints.sql"));
    }

    #[test]
    fn requires_headers_are_collected_in_order() {
        let sql = "\
-- Deploy widgets:table to pg
-- requires: schema
-- requires: auth:users

CREATE TABLE widgets ();
-- requires: not_a_header
";
        assert_eq!(requires_from_script(sql), vec!["schema", "auth:users"]);
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = script_hash("SELECT 1;\n");
        assert_eq!(h.len(), 64);
        assert_eq!(h, script_hash("SELECT 1;\n"));
        assert_ne!(h, script_hash("SELECT 2;\n"));
    }

    #[test]
    fn template_round_trips_through_requires_scanner() {
        let requires = vec!["schema".to_string(), "auth:@v1.0.0".to_string()];
        let sql = script_template(ScriptKind::Deploy, "widgets", "table", &requires);
        assert_eq!(requires_from_script(&sql), requires);
    }
}
