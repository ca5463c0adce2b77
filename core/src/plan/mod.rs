//! Plan data model.
//!
//! A plan is the ordered list of changes (and release tags) for one
//! module. Insertion order is deploy order unless dependencies reorder
//! it. See [`parser`] for the on-disk grammar.

pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseErrorKind};
use crate::reference::{is_valid_change_name, is_valid_tag_name};

pub use parser::{PlanFile, parse_plan, parse_plan_file, parse_plan_file_simple};

/// Timestamp format used throughout plan files: ISO-8601 UTC, seconds
/// precision, `Z` suffix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A single migration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub name: String,
    /// Raw reference strings exactly as written in the plan.
    pub dependencies: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub planner: String,
    pub email: String,
    pub comment: String,
}

/// A named release marker pointing at a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub change_name: String,
    pub timestamp: DateTime<Utc>,
    pub planner: String,
    pub email: String,
    pub comment: String,
}

/// One module's plan: project identity plus ordered changes and tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub project: String,
    pub uri: Option<String>,
    pub syntax_version: String,
    pub changes: Vec<Change>,
    pub tags: Vec<Tag>,
}

impl Plan {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            uri: None,
            syntax_version: "1.0.0".to_string(),
            changes: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn change(&self, name: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.name == name)
    }

    pub fn change_index(&self, name: &str) -> Option<usize> {
        self.changes.iter().position(|c| c.name == name)
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// The change a tag points at.
    pub fn tagged_change(&self, tag_name: &str) -> Option<&Change> {
        self.tag(tag_name).and_then(|t| self.change(&t.change_name))
    }

    /// Append a change, enforcing the name grammar and uniqueness.
    pub fn add_change(&mut self, change: Change) -> Result<(), String> {
        if !is_valid_change_name(&change.name) {
            return Err(format!("invalid change name {:?}", change.name));
        }
        if self.change(&change.name).is_some() {
            return Err(format!("duplicate change name {:?}", change.name));
        }
        self.changes.push(change);
        Ok(())
    }

    /// Remove a change by name. Refuses when a tag or a later change still
    /// references it.
    pub fn remove_change(&mut self, name: &str) -> Result<Change, String> {
        let idx = self
            .change_index(name)
            .ok_or_else(|| format!("unknown change {name:?}"))?;
        if let Some(tag) = self.tags.iter().find(|t| t.change_name == name) {
            return Err(format!("change {name:?} is tagged @{}", tag.name));
        }
        if let Some(dependent) = self.changes.iter().find(|c| {
            c.dependencies
                .iter()
                .any(|d| d == name || d.ends_with(&format!(":{name}")))
        }) {
            return Err(format!("change {name:?} is required by {}", dependent.name));
        }
        Ok(self.changes.remove(idx))
    }

    /// Append a tag. An empty `change_name` targets the latest change.
    pub fn add_tag(&mut self, mut tag: Tag) -> Result<(), String> {
        if !is_valid_tag_name(&tag.name) {
            return Err(format!("invalid tag name {:?}", tag.name));
        }
        if self.tag(&tag.name).is_some() {
            return Err(format!("duplicate tag @{}", tag.name));
        }
        if tag.change_name.is_empty() {
            tag.change_name = match self.changes.last() {
                Some(c) => c.name.clone(),
                None => return Err("cannot tag an empty plan".to_string()),
            };
        } else if self.change(&tag.change_name).is_none() {
            return Err(format!("unknown change {:?}", tag.change_name));
        }
        self.tags.push(tag);
        Ok(())
    }

    /// Re-emit the plan in the on-disk grammar. `parse(render(p)) == p`
    /// for any valid plan.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("%syntax-version={}\n", self.syntax_version));
        out.push_str(&format!("%project={}\n", self.project));
        if let Some(uri) = &self.uri {
            out.push_str(&format!("%uri={uri}\n"));
        }
        out.push('\n');
        for change in &self.changes {
            out.push_str(&render_change(change));
            out.push('\n');
            for tag in self.tags.iter().filter(|t| t.change_name == change.name) {
                out.push_str(&render_tag(tag));
                out.push('\n');
            }
        }
        out
    }

    /// Integrity checks shared by the parser and the editing operations:
    /// non-empty project, unique names, tags bound to existing changes.
    pub fn validate(&self) -> Vec<ParseError> {
        let mut errors = Vec::new();
        if self.project.is_empty() {
            errors.push(ParseError { line: 0, kind: ParseErrorKind::MissingProject });
        }
        let mut seen = std::collections::HashSet::new();
        for change in &self.changes {
            if !seen.insert(change.name.as_str()) {
                errors.push(ParseError {
                    line: 0,
                    kind: ParseErrorKind::DuplicateChange(change.name.clone()),
                });
            }
        }
        for tag in &self.tags {
            if self.change(&tag.change_name).is_none() {
                errors.push(ParseError {
                    line: 0,
                    kind: ParseErrorKind::DanglingTag(tag.name.clone()),
                });
            }
        }
        errors
    }
}

fn render_change(change: &Change) -> String {
    let deps = if change.dependencies.is_empty() {
        String::new()
    } else {
        format!("[{}] ", change.dependencies.join(" "))
    };
    format!(
        "{} {}{} {} <{}> # {}",
        change.name,
        deps,
        change.timestamp.format(TIMESTAMP_FORMAT),
        change.planner,
        change.email,
        change.comment,
    )
}

fn render_tag(tag: &Tag) -> String {
    format!(
        "@{} {} {} <{}> # {}",
        tag.name,
        tag.timestamp.format(TIMESTAMP_FORMAT),
        tag.planner,
        tag.email,
        tag.comment,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + s, 0).unwrap()
    }

    fn change(name: &str, deps: &[&str]) -> Change {
        Change {
            name: name.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            timestamp: ts(0),
            planner: "ada".to_string(),
            email: "ada@example.com".to_string(),
            comment: format!("add {name}"),
        }
    }

    #[test]
    fn add_change_enforces_grammar_and_uniqueness() {
        let mut plan = Plan::new("widgets");
        plan.add_change(change("schema", &[])).unwrap();
        let err = plan.add_change(change("schema", &[])).unwrap_err();
        assert!(err.contains("duplicate change name"));
        let err = plan.add_change(change("bad name", &[])).unwrap_err();
        assert!(err.contains("invalid change name"));
    }

    #[test]
    fn remove_change_refuses_referenced_changes() {
        let mut plan = Plan::new("widgets");
        plan.add_change(change("schema", &[])).unwrap();
        plan.add_change(change("table", &["schema"])).unwrap();
        assert!(plan.remove_change("schema").is_err());
        plan.remove_change("table").unwrap();
        plan.remove_change("schema").unwrap();
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn tag_defaults_to_latest_change() {
        let mut plan = Plan::new("widgets");
        plan.add_change(change("schema", &[])).unwrap();
        plan.add_change(change("table", &["schema"])).unwrap();
        plan.add_tag(Tag {
            name: "v1.0.0".to_string(),
            change_name: String::new(),
            timestamp: ts(5),
            planner: "ada".to_string(),
            email: "ada@example.com".to_string(),
            comment: "first release".to_string(),
        })
        .unwrap();
        assert_eq!(plan.tagged_change("v1.0.0").unwrap().name, "table");
    }
}
