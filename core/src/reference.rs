//! Change and tag reference grammar.
//!
//! Every place a dependency or target can be written accepts one of four
//! forms, parsed here and nowhere else:
//!
//! - `users_table` — a change in the current project
//! - `auth:users_table` — a change in another module
//! - `@v1.0.0` — a tag in the current project
//! - `auth:@v1.0.0` — a tag in another module

use nom::{
    IResult,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::{opt, recognize},
    multi::separated_list1,
    sequence::{pair, preceded},
};

/// A parsed change or tag reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeRef {
    Local { name: String },
    CrossModule { project: String, name: String },
    Tag { tag: String },
    CrossModuleTag { project: String, tag: String },
}

/// One `/`-free name segment: leading alphanumeric or `_`, then word
/// characters plus `-` and `.`.
fn name_segment(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.'),
    ))(input)
}

/// A change name: one or more segments joined by `/`.
pub fn parse_change_name(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(char('/'), name_segment))(input)
}

/// A tag name: a single segment, no path separators.
pub fn parse_tag_name(input: &str) -> IResult<&str, &str> {
    name_segment(input)
}

/// A project name: same shape as a tag name.
pub fn parse_project_name(input: &str) -> IResult<&str, &str> {
    name_segment(input)
}

fn parse_reference(input: &str) -> IResult<&str, ChangeRef> {
    let (input, project) = opt(nom::sequence::terminated(parse_project_name, char(':')))(input)?;
    let (input, tag) = opt(preceded(char('@'), parse_tag_name))(input)?;
    match (project, tag) {
        (Some(project), Some(tag)) => Ok((
            input,
            ChangeRef::CrossModuleTag {
                project: project.to_string(),
                tag: tag.to_string(),
            },
        )),
        (None, Some(tag)) => Ok((input, ChangeRef::Tag { tag: tag.to_string() })),
        (Some(project), None) => {
            let (input, name) = parse_change_name(input)?;
            Ok((
                input,
                ChangeRef::CrossModule {
                    project: project.to_string(),
                    name: name.to_string(),
                },
            ))
        }
        (None, None) => {
            let (input, name) = parse_change_name(input)?;
            Ok((input, ChangeRef::Local { name: name.to_string() }))
        }
    }
}

impl ChangeRef {
    /// Parse a reference string, requiring the whole input to match.
    pub fn parse(input: &str) -> Option<ChangeRef> {
        match parse_reference(input) {
            Ok(("", r)) => Some(r),
            _ => None,
        }
    }

    /// The project this reference names, if qualified.
    pub fn project(&self) -> Option<&str> {
        match self {
            ChangeRef::CrossModule { project, .. } | ChangeRef::CrossModuleTag { project, .. } => {
                Some(project)
            }
            _ => None,
        }
    }

    /// True for `@tag` and `project:@tag` forms.
    pub fn is_tag(&self) -> bool {
        matches!(self, ChangeRef::Tag { .. } | ChangeRef::CrossModuleTag { .. })
    }

    /// Re-qualify a bare reference against an owning project.
    pub fn qualified(&self, default_project: &str) -> String {
        match self {
            ChangeRef::Local { name } => format!("{default_project}:{name}"),
            ChangeRef::Tag { tag } => format!("{default_project}:@{tag}"),
            ChangeRef::CrossModule { project, name } => format!("{project}:{name}"),
            ChangeRef::CrossModuleTag { project, tag } => format!("{project}:@{tag}"),
        }
    }
}

impl std::fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeRef::Local { name } => write!(f, "{name}"),
            ChangeRef::CrossModule { project, name } => write!(f, "{project}:{name}"),
            ChangeRef::Tag { tag } => write!(f, "@{tag}"),
            ChangeRef::CrossModuleTag { project, tag } => write!(f, "{project}:@{tag}"),
        }
    }
}

/// Whole-string change name check used by the plan parser and editors.
pub fn is_valid_change_name(name: &str) -> bool {
    matches!(parse_change_name(name), Ok(("", _)))
}

/// Whole-string tag name check.
pub fn is_valid_tag_name(name: &str) -> bool {
    matches!(parse_tag_name(name), Ok(("", _)))
}
