//! SQL cleaning for the transaction-aware executor.
//!
//! Deploy/revert/verify scripts are written to be runnable standalone,
//! so they often carry their own `BEGIN`/`COMMIT` and `CREATE EXTENSION`
//! statements. The engine manages transactions itself and the
//! orchestrator installs extensions, so both are stripped before a
//! script body is executed.

/// Split a script into top-level statements.
///
/// The scanner understands single-quoted strings (with `''` escapes),
/// double-quoted identifiers, dollar-quoted bodies (`$$ ... $$`,
/// `$fn$ ... $fn$`), line comments, and nested block comments.
/// Statement text is preserved verbatim; empty statements are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;
    // Whether anything other than comments and whitespace has been seen
    // since `start`; comment-only fragments are dropped.
    let mut has_content = false;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                has_content = true;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'"' => {
                has_content = true;
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let mut depth = 1;
                i += 2;
                while i < bytes.len() && depth > 0 {
                    if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
            }
            b'$' => {
                has_content = true;
                if let Some(tag_len) = dollar_tag_len(&bytes[i..]) {
                    let tag = &sql[i..i + tag_len];
                    i += tag_len;
                    while i < bytes.len() && !sql[i..].starts_with(tag) {
                        i += 1;
                    }
                    i += tag_len;
                } else {
                    i += 1;
                }
            }
            b';' => {
                let stmt = sql[start..i].trim();
                if has_content && !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                i += 1;
                start = i;
                has_content = false;
            }
            c => {
                if !c.is_ascii_whitespace() {
                    has_content = true;
                }
                i += 1;
            }
        }
    }

    let tail = sql[start..sql.len().min(i)].trim();
    if has_content && !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Length of a `$tag$` opener at the start of `bytes`, if present.
fn dollar_tag_len(bytes: &[u8]) -> Option<usize> {
    let mut j = 1;
    while j < bytes.len() {
        match bytes[j] {
            b'$' => return Some(j + 1),
            c if c.is_ascii_alphanumeric() || c == b'_' => j += 1,
            _ => return None,
        }
    }
    None
}

/// First keyword(s) of a statement, uppercased, comments skipped.
fn leading_keywords(stmt: &str, n: usize) -> Vec<String> {
    stmt.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with("--"))
        .flat_map(|l| l.split_whitespace())
        .take(n)
        .map(|w| w.trim_end_matches(';').to_uppercase())
        .collect()
}

/// Transaction-control statements the engine issues itself.
fn is_transaction_control(stmt: &str) -> bool {
    let words = leading_keywords(stmt, 2);
    match words.first().map(String::as_str) {
        Some("BEGIN") => {
            // `BEGIN` here is transaction control; procedure bodies are
            // inside dollar quotes and never reach this check.
            !matches!(words.get(1).map(String::as_str), Some("ATOMIC"))
        }
        Some("COMMIT") | Some("ROLLBACK") | Some("END") => true,
        Some("START") => matches!(words.get(1).map(String::as_str), Some("TRANSACTION")),
        _ => false,
    }
}

/// `CREATE EXTENSION` and `COMMENT ON EXTENSION`, installed by the
/// orchestrator instead.
fn is_extension_statement(stmt: &str) -> bool {
    let words = leading_keywords(stmt, 3);
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    matches!(
        words.as_slice(),
        ["CREATE", "EXTENSION", ..] | ["COMMENT", "ON", "EXTENSION"]
    )
}

/// Strip transaction-control and extension statements, re-emitting the
/// rest unchanged.
pub fn clean_sql(sql: &str) -> String {
    let kept: Vec<String> = split_statements(sql)
        .into_iter()
        .filter(|s| !is_transaction_control(s) && !is_extension_statement(s))
        .collect();
    if kept.is_empty() {
        String::new()
    } else {
        format!("{};", kept.join(";\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_transaction_control() {
        let sql = "BEGIN;\nCREATE TABLE t (id int);\nCOMMIT;\n";
        assert_eq!(clean_sql(sql), "CREATE TABLE t (id int);");
    }

    #[test]
    fn strips_extension_statements() {
        let sql = "\
BEGIN;
CREATE EXTENSION IF NOT EXISTS citext;
COMMENT ON EXTENSION citext IS 'case-insensitive text';
CREATE TABLE emails (addr citext);
COMMIT;
";
        assert_eq!(clean_sql(sql), "CREATE TABLE emails (addr citext);");
    }

    #[test]
    fn dollar_quoted_bodies_are_opaque() {
        let sql = "\
BEGIN;
CREATE FUNCTION bump() RETURNS trigger AS $body$
BEGIN
  UPDATE counters SET n = n + 1;
  RETURN NEW;
END;
$body$ LANGUAGE plpgsql;
COMMIT;
";
        let cleaned = clean_sql(sql);
        assert!(cleaned.starts_with("CREATE FUNCTION bump()"));
        assert!(cleaned.contains("UPDATE counters SET n = n + 1;"));
        assert!(!cleaned.contains("COMMIT"));
    }

    #[test]
    fn semicolons_inside_strings_do_not_split() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');\nSELECT 1;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('a;b', 'it''s')");
    }

    #[test]
    fn comments_do_not_hide_statements() {
        let sql = "\
-- header; with a stray semicolon
/* block; comment */
CREATE TABLE t (id int); -- trailing
";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("CREATE TABLE t (id int)"));
    }

    #[test]
    fn start_transaction_and_end_are_stripped() {
        let sql = "START TRANSACTION;\nSELECT 1;\nEND;";
        assert_eq!(clean_sql(sql), "SELECT 1;");
    }

    #[test]
    fn begin_atomic_bodies_survive() {
        let sql = "BEGIN ATOMIC SELECT 1; SELECT 2; END";
        // BEGIN ATOMIC is a routine body, not transaction control.
        let cleaned = clean_sql(sql);
        assert!(cleaned.contains("BEGIN ATOMIC"));
    }
}
