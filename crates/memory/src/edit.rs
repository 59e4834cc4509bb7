//! Pure content-editing primitives: section replacement, find/replace and
//! positional insertion. The manager wraps these in per-path locks.
use crate::{
    chunker::parse_header,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMode {
    Replace,
    Append,
    Prepend,
}

impl std::str::FromStr for SectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            other => Err(Error::InvalidArgument(format!(
                "unknown section mode {other:?} (expected replace, append or prepend)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Start,
    End,
    AfterMarker,
}

impl std::str::FromStr for InsertPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            "after_marker" => Ok(Self::AfterMarker),
            other => Err(Error::InvalidArgument(format!(
                "unknown insert position {other:?} (expected start, end or after_marker)"
            ))),
        }
    }
}

/// Line span of a section body: the lines strictly after the header line, up
/// to (excluding) the next header of equal or shallower depth.
struct SectionSpan {
    body_start: usize,
    body_end: usize,
}

fn find_section(lines: &[&str], section_header: &str) -> Result<SectionSpan> {
    let wanted = section_header.trim();
    let (level, _) = parse_header(wanted).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "section_header {section_header:?} is not a markdown header line"
        ))
    })?;

    let header_idx = lines
        .iter()
        .position(|line| line.trim() == wanted)
        .ok_or_else(|| Error::NotFound(format!("section {section_header:?}")))?;

    let body_start = header_idx + 1;
    let body_end = lines[body_start..]
        .iter()
        .position(|line| parse_header(line).is_some_and(|(l, _)| l <= level))
        .map(|offset| body_start + offset)
        .unwrap_or(lines.len());

    Ok(SectionSpan {
        body_start,
        body_end,
    })
}

/// Body text of the named section.
pub fn extract_section(content: &str, section_header: &str) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    let span = find_section(&lines, section_header)?;
    Ok(lines[span.body_start..span.body_end].join("\n").trim().to_string())
}

/// Replace, append to, or prepend to the named section's body.
pub fn edit_section(
    content: &str,
    section_header: &str,
    mode: SectionMode,
    text: &str,
) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    let span = find_section(&lines, section_header)?;

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 4);
    out.extend_from_slice(&lines[..span.body_start]);
    let body = &lines[span.body_start..span.body_end];
    match mode {
        SectionMode::Replace => {
            out.push("");
            out.extend(text.lines());
            out.push("");
        },
        SectionMode::Append => {
            // Drop the section's trailing blank lines so the appended text
            // sits directly under the existing body.
            let trimmed_len = body
                .iter()
                .rposition(|l| !l.trim().is_empty())
                .map_or(0, |i| i + 1);
            out.extend_from_slice(&body[..trimmed_len]);
            out.extend(text.lines());
            out.push("");
        },
        SectionMode::Prepend => {
            out.push("");
            out.extend(text.lines());
            out.extend_from_slice(body);
        },
    }
    out.extend_from_slice(&lines[span.body_end..]);
    Ok(normalize(&out))
}

/// Literal or regex find/replace. `max_replacements = -1` means unlimited.
/// Returns the new content and the number of replacements made.
pub fn find_replace(
    content: &str,
    find: &str,
    replace: &str,
    use_regex: bool,
    max_replacements: i64,
) -> Result<(String, usize)> {
    if find.is_empty() {
        return Err(Error::InvalidArgument("find must not be empty".into()));
    }
    if max_replacements == 0 {
        return Ok((content.to_string(), 0));
    }

    if use_regex {
        let re = regex::Regex::new(find)
            .map_err(|e| Error::InvalidArgument(format!("invalid regex {find:?}: {e}")))?;
        let total = re.find_iter(content).count();
        let n = if max_replacements < 0 {
            total
        } else {
            total.min(max_replacements as usize)
        };
        let replaced = re.replacen(content, n, replace).into_owned();
        Ok((replaced, n))
    } else {
        let total = content.matches(find).count();
        let n = if max_replacements < 0 {
            total
        } else {
            total.min(max_replacements as usize)
        };
        Ok((content.replacen(find, replace, n), n))
    }
}

/// Insert `text` at the start, at the end, or after the first line containing
/// `marker`.
pub fn insert(
    content: &str,
    text: &str,
    position: InsertPosition,
    marker: Option<&str>,
) -> Result<String> {
    match position {
        InsertPosition::Start => {
            let mut out = String::with_capacity(content.len() + text.len() + 2);
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(content);
            Ok(out)
        },
        InsertPosition::End => {
            let mut out = content.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(text);
            if !out.ends_with('\n') {
                out.push('\n');
            }
            Ok(out)
        },
        InsertPosition::AfterMarker => {
            let marker = marker.ok_or_else(|| {
                Error::InvalidArgument("after_marker requires a marker".into())
            })?;
            if marker.is_empty() {
                return Err(Error::InvalidArgument("marker must not be empty".into()));
            }
            let lines: Vec<&str> = content.lines().collect();
            let idx = lines
                .iter()
                .position(|l| l.contains(marker))
                .ok_or_else(|| Error::NotFound(format!("marker {marker:?}")))?;

            let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 2);
            out.extend_from_slice(&lines[..=idx]);
            out.extend(text.lines());
            out.extend_from_slice(&lines[idx + 1..]);
            Ok(normalize(&out))
        },
    }
}

/// Header outline of a document, for the `list sections` request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SectionInfo {
    pub level: usize,
    pub title: String,
    pub line: usize,
}

#[must_use]
pub fn outline(content: &str) -> Vec<SectionInfo> {
    content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            parse_header(line).map(|(level, title)| SectionInfo {
                level,
                title: title.to_string(),
                line: idx + 1,
            })
        })
        .collect()
}

/// Join lines, collapsing blank-line runs to a single blank line and
/// guaranteeing a trailing newline.
fn normalize(lines: &[&str]) -> String {
    let mut out = String::new();
    let mut blanks = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blanks = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
