//! Plan-file parser.
//!
//! Line-oriented grammar:
//!
//! ```text
//! %syntax-version=1.0.0
//! %project=widgets
//! %uri=https://github.com/example/widgets
//!
//! schema 2023-01-02T10:00:00Z ada <ada@example.com> # widgets schema
//! table [schema] 2023-01-03T10:00:00Z ada <ada@example.com> # widgets table
//! @v1.0.0 2023-01-04T10:00:00Z ada <ada@example.com> # first release
//! ```
//!
//! The accumulating entry point never fails on malformed input: bad lines
//! become structured [`ParseError`]s and parsing continues, so callers can
//! report every problem at once. Execution paths use the fail-fast
//! variant instead, where a broken plan is always fatal.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use nom::{
    IResult,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0, space0, space1},
    combinator::opt,
    multi::separated_list0,
    sequence::{delimited, preceded},
};

use crate::error::{ParseError, ParseErrorKind, PlanFileError};
use crate::reference::{ChangeRef, is_valid_change_name, is_valid_tag_name};

use super::{Change, Plan, Tag};

/// Result of the accumulating parse: whatever could be salvaged, plus
/// every error encountered.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub plan: Plan,
    pub errors: Vec<ParseError>,
}

impl PlanFile {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse plan text, accumulating errors.
pub fn parse_plan(text: &str) -> PlanFile {
    let mut plan = Plan {
        project: String::new(),
        uri: None,
        syntax_version: String::new(),
        changes: Vec::new(),
        tags: Vec::new(),
    };
    let mut errors = Vec::new();
    let mut seen_changes: HashSet<String> = HashSet::new();
    let mut seen_tags: HashSet<String> = HashSet::new();
    let mut in_body = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('%') {
            if in_body {
                errors.push(ParseError {
                    line: line_no,
                    kind: ParseErrorKind::HeaderOutOfOrder(line.to_string()),
                });
                continue;
            }
            match header.split_once('=') {
                Some(("syntax-version", v)) => plan.syntax_version = v.trim().to_string(),
                Some(("project", v)) => plan.project = v.trim().to_string(),
                Some(("uri", v)) => plan.uri = Some(v.trim().to_string()),
                _ => errors.push(ParseError {
                    line: line_no,
                    kind: ParseErrorKind::UnknownHeader(line.to_string()),
                }),
            }
            continue;
        }

        in_body = true;

        if line.starts_with('@') {
            match parse_tag_line(line) {
                Ok(("", raw)) => {
                    if !is_valid_tag_name(raw.name) {
                        errors.push(ParseError {
                            line: line_no,
                            kind: ParseErrorKind::InvalidTagName(raw.name.to_string()),
                        });
                        continue;
                    }
                    if !seen_tags.insert(raw.name.to_string()) {
                        errors.push(ParseError {
                            line: line_no,
                            kind: ParseErrorKind::DuplicateTag(raw.name.to_string()),
                        });
                        continue;
                    }
                    let Some(target) = plan.changes.last() else {
                        errors.push(ParseError {
                            line: line_no,
                            kind: ParseErrorKind::DanglingTag(raw.name.to_string()),
                        });
                        continue;
                    };
                    match parse_timestamp(raw.timestamp) {
                        Ok(timestamp) => plan.tags.push(Tag {
                            name: raw.name.to_string(),
                            change_name: target.name.clone(),
                            timestamp,
                            planner: raw.planner.to_string(),
                            email: raw.email.to_string(),
                            comment: raw.comment.to_string(),
                        }),
                        Err(kind) => errors.push(ParseError { line: line_no, kind }),
                    }
                }
                _ => errors.push(ParseError {
                    line: line_no,
                    kind: ParseErrorKind::MalformedLine,
                }),
            }
            continue;
        }

        // Everything else is a change line. Validate the name token first
        // so bad characters surface as their own error kind rather than a
        // generic malformed-line.
        let name_token = line.split_whitespace().next().unwrap_or("");
        if !is_valid_change_name(name_token) {
            errors.push(ParseError {
                line: line_no,
                kind: ParseErrorKind::InvalidChangeName(name_token.to_string()),
            });
            continue;
        }

        match parse_change_line(line) {
            Ok(("", raw)) => {
                if !seen_changes.insert(raw.name.to_string()) {
                    errors.push(ParseError {
                        line: line_no,
                        kind: ParseErrorKind::DuplicateChange(raw.name.to_string()),
                    });
                    continue;
                }
                let timestamp = match parse_timestamp(raw.timestamp) {
                    Ok(t) => t,
                    Err(kind) => {
                        errors.push(ParseError { line: line_no, kind });
                        continue;
                    }
                };
                let mut dependencies = Vec::new();
                for dep in raw.dependencies {
                    if is_valid_reference(dep) {
                        dependencies.push(dep.to_string());
                    } else {
                        errors.push(ParseError {
                            line: line_no,
                            kind: ParseErrorKind::InvalidDependency(dep.to_string()),
                        });
                    }
                }
                plan.changes.push(Change {
                    name: raw.name.to_string(),
                    dependencies,
                    timestamp,
                    planner: raw.planner.to_string(),
                    email: raw.email.to_string(),
                    comment: raw.comment.to_string(),
                });
            }
            _ => errors.push(ParseError {
                line: line_no,
                kind: ParseErrorKind::MalformedLine,
            }),
        }
    }

    if plan.project.is_empty() {
        errors.push(ParseError { line: 0, kind: ParseErrorKind::MissingProject });
    }
    if plan.syntax_version.is_empty() {
        plan.syntax_version = "1.0.0".to_string();
    }

    PlanFile { plan, errors }
}

/// Read and parse a plan file, accumulating errors. Only I/O failures
/// are fatal here.
pub fn parse_plan_file(path: &Path) -> Result<PlanFile, PlanFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| PlanFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_plan(&text))
}

/// Fail-fast variant: the first structured error aborts the load.
pub fn parse_plan_file_simple(path: &Path) -> Result<Plan, PlanFileError> {
    let file = parse_plan_file(path)?;
    match file.errors.into_iter().next() {
        Some(error) => Err(PlanFileError::Parse {
            path: path.to_path_buf(),
            error,
        }),
        None => Ok(file.plan),
    }
}

struct RawTag<'a> {
    name: &'a str,
    timestamp: &'a str,
    planner: &'a str,
    email: &'a str,
    comment: &'a str,
}

struct RawChange<'a> {
    name: &'a str,
    dependencies: Vec<&'a str>,
    timestamp: &'a str,
    planner: &'a str,
    email: &'a str,
    comment: &'a str,
}

fn bare_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ']')(input)
}

/// `[dep dep ...]`, possibly empty.
fn dependency_block(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        char('['),
        delimited(space0, separated_list0(space1, bare_token), space0),
        char(']'),
    )(input)
}

/// Shared tail of change and tag lines:
/// `<timestamp> <planner ...> <email> [# comment]`.
fn provenance(input: &str) -> IResult<&str, (&str, &str, &str, &str)> {
    let (input, timestamp) = bare_token(input)?;
    let (input, _) = space1(input)?;
    let (input, planner) = take_till(|c| c == '<')(input)?;
    let (input, email) = delimited(char('<'), take_till(|c| c == '>'), char('>'))(input)?;
    let (input, _) = space0(input)?;
    let (input, comment) = opt(preceded(tag("#"), nom::combinator::rest))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((
        input,
        (timestamp, planner.trim(), email, comment.unwrap_or("").trim()),
    ))
}

fn parse_tag_line(input: &str) -> IResult<&str, RawTag<'_>> {
    let (input, _) = char('@')(input)?;
    let (input, name) = bare_token(input)?;
    let (input, _) = space1(input)?;
    let (input, (timestamp, planner, email, comment)) = provenance(input)?;
    Ok((input, RawTag { name, timestamp, planner, email, comment }))
}

fn parse_change_line(input: &str) -> IResult<&str, RawChange<'_>> {
    let (input, name) = bare_token(input)?;
    let (input, _) = space1(input)?;
    let (input, dependencies) = opt(nom::sequence::terminated(dependency_block, space1))(input)?;
    let (input, (timestamp, planner, email, comment)) = provenance(input)?;
    Ok((
        input,
        RawChange {
            name,
            dependencies: dependencies.unwrap_or_default(),
            timestamp,
            planner,
            email,
            comment,
        },
    ))
}

fn parse_timestamp(token: &str) -> Result<DateTime<Utc>, ParseErrorKind> {
    DateTime::parse_from_rfc3339(token)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseErrorKind::InvalidTimestamp(token.to_string()))
}

/// A dependency token is a symbolic reference or a 40-hex SHA-1.
fn is_valid_reference(token: &str) -> bool {
    if token.len() == 40 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    ChangeRef::parse(token).is_some()
}
