//! The `main.md` sentinel: canonical skeleton and section maintenance.
//!
//! All functions are pure `content -> content` transforms; the manager owns
//! locking and persistence.
use crate::{
    edit::{self, SectionMode},
    error::{Error, Result},
};

pub const TITLE_SECTION: &str = "# Main Memory";
pub const GOALS_SECTION: &str = "## Current Goals";
pub const TASKS_SECTION: &str = "## Active Tasks";
pub const PLANS_SECTION: &str = "## Plans";
pub const COMPLETED_SECTION: &str = "## Completed Tasks";
pub const UPDATES_SECTION: &str = "## Recent Updates";
pub const FILE_INDEX_SECTION: &str = "## File Index";

/// Base content written by `initialize` and restored by `reset`.
pub const TEMPLATE: &str = "# Main Memory\n\n## Current Goals\n\n## Active Tasks\n\n## Plans\n\n## Completed Tasks\n\n## Recent Updates\n\n## File Index\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAction {
    Add,
    Complete,
    Remove,
}

impl std::str::FromStr for ListAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "complete" => Ok(Self::Complete),
            "remove" => Ok(Self::Remove),
            other => Err(Error::InvalidArgument(format!(
                "unknown action {other:?} (expected add, complete or remove)"
            ))),
        }
    }
}

/// Append a section skeleton if a hand-edited `main.md` lost it.
fn ensure_section(content: &str, header: &str) -> String {
    if content.lines().any(|l| l.trim() == header) {
        return content.to_string();
    }
    let mut out = content.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(header);
    out.push('\n');
    out
}

fn add_bullet(content: &str, header: &str, bullet: &str) -> Result<String> {
    let content = ensure_section(content, header);
    edit::edit_section(&content, header, SectionMode::Append, bullet)
}

/// Remove the bullet whose text equals `text` from the named section.
fn remove_bullet(content: &str, header: &str, text: &str) -> Result<String> {
    let body = edit::extract_section(content, header)?;
    let wanted = format!("- {text}");
    if !body.lines().any(|l| l.trim() == wanted) {
        return Err(Error::NotFound(format!(
            "entry {text:?} in section {header:?}"
        )));
    }
    let new_body: Vec<&str> = body.lines().filter(|l| l.trim() != wanted).collect();
    edit::edit_section(content, header, SectionMode::Replace, &new_body.join("\n"))
}

/// Append a dated bullet to Recent Updates.
pub fn append_update(content: &str, text: &str, date: &str) -> Result<String> {
    add_bullet(content, UPDATES_SECTION, &format!("- {date}: {text}"))
}

/// Add an entry to Current Goals or Active Tasks.
pub fn add_entry(content: &str, header: &str, text: &str) -> Result<String> {
    add_bullet(content, header, &format!("- {text}"))
}

/// Move an entry from its section to Completed Tasks, stamped with `date`.
pub fn complete_entry(content: &str, header: &str, text: &str, date: &str) -> Result<String> {
    let without = remove_bullet(content, header, text)?;
    add_bullet(
        &without,
        COMPLETED_SECTION,
        &format!("- {text} (completed {date})"),
    )
}

/// Drop an entry from its section.
pub fn remove_entry(content: &str, header: &str, text: &str) -> Result<String> {
    remove_bullet(content, header, text)
}

/// Add an unchecked plan item.
pub fn add_plan(content: &str, text: &str) -> Result<String> {
    add_bullet(content, PLANS_SECTION, &format!("- [ ] {text}"))
}

/// Check off a plan item in place.
pub fn complete_plan(content: &str, text: &str) -> Result<String> {
    let body = edit::extract_section(content, PLANS_SECTION)?;
    let open = format!("- [ ] {text}");
    if !body.lines().any(|l| l.trim() == open) {
        return Err(Error::NotFound(format!("plan item {text:?}")));
    }
    let new_body: Vec<String> = body
        .lines()
        .map(|l| {
            if l.trim() == open {
                l.replacen("- [ ]", "- [x]", 1)
            } else {
                l.to_string()
            }
        })
        .collect();
    edit::edit_section(
        content,
        PLANS_SECTION,
        SectionMode::Replace,
        &new_body.join("\n"),
    )
}

/// Insert or update the `- [Title](path)` line for a file in the File Index.
pub fn upsert_file_link(content: &str, title: &str, path: &str) -> Result<String> {
    let without = remove_file_link_inner(content, path)?;
    add_bullet(&without, FILE_INDEX_SECTION, &format!("- [{title}]({path})"))
}

/// Remove a file's line from the File Index. Missing lines are a no-op.
pub fn remove_file_link(content: &str, path: &str) -> Result<String> {
    remove_file_link_inner(content, path)
}

fn remove_file_link_inner(content: &str, path: &str) -> Result<String> {
    let content = ensure_section(content, FILE_INDEX_SECTION);
    let body = edit::extract_section(&content, FILE_INDEX_SECTION)?;
    let suffix = format!("]({path})");
    if !body.lines().any(|l| l.trim().ends_with(&suffix)) {
        return Ok(content);
    }
    let new_body: Vec<&str> = body
        .lines()
        .filter(|l| !l.trim().ends_with(&suffix))
        .collect();
    edit::edit_section(
        &content,
        FILE_INDEX_SECTION,
        SectionMode::Replace,
        &new_body.join("\n"),
    )
}
