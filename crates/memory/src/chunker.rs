//! Split markdown into bounded chunks that remember their header context.
//!
//! The splitter works in two passes: group the document into sections at ATX
//! header lines while tracking the enclosing header stack, then cut each
//! section into chunks of at most `chunk_size` characters. Overlap is carried
//! between chunks of the same section only, never across a header boundary.

/// A chunk produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    /// Titles of the enclosing headers, outermost first.
    pub header_path: Vec<String>,
    /// Level of the innermost enclosing header (1–6), 0 for pre-header text.
    pub section_level: usize,
}

/// Parse an ATX header line. Returns `(level, title)` for `# ...` through
/// `###### ...`; anything else (including `#######`) is plain text.
pub(crate) fn parse_header(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some((hashes, rest.trim()))
}

struct Section {
    header_path: Vec<String>,
    level: usize,
    /// Full section text, header line included.
    text: String,
    /// Char length of the leading header line, if the section starts with one.
    header_len: Option<usize>,
}

fn flush_section(
    stack: &[(usize, String)],
    lines: &mut Vec<&str>,
    header_len: &mut Option<usize>,
    out: &mut Vec<Section>,
) {
    if lines.is_empty() {
        return;
    }
    out.push(Section {
        header_path: stack.iter().map(|(_, t)| t.clone()).collect(),
        level: stack.last().map(|(l, _)| *l).unwrap_or(0),
        text: lines.join("\n"),
        header_len: header_len.take(),
    });
    lines.clear();
}

/// Group the document into sections, maintaining a running header stack.
fn split_sections(text: &str) -> Vec<Section> {
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_header_len: Option<usize> = None;

    for line in text.lines() {
        if let Some((level, title)) = parse_header(line) {
            flush_section(&stack, &mut current, &mut current_header_len, &mut sections);
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, title.to_string()));
            current_header_len = Some(line.chars().count());
            current.push(line);
        } else {
            current.push(line);
        }
    }
    flush_section(&stack, &mut current, &mut current_header_len, &mut sections);
    sections
}

/// Best break position in `chars[start..window_end]`, by preference:
/// double newline, single newline, sentence end, word boundary, hard cut.
/// The returned position is exclusive and always greater than `start`.
fn find_break(chars: &[char], start: usize, window_end: usize) -> usize {
    let mut newline2 = None;
    let mut newline = None;
    let mut sentence = None;
    let mut word = None;

    for p in (start + 1)..=window_end {
        let prev = chars[p - 1];
        if prev == '\n' {
            newline = Some(p);
            if p >= start + 2 && chars[p - 2] == '\n' {
                newline2 = Some(p);
            }
        } else if matches!(prev, '.' | '!' | '?')
            && (p == chars.len() || chars[p].is_whitespace())
        {
            sentence = Some(p);
        } else if prev.is_whitespace() {
            word = Some(p);
        }
    }

    newline2
        .or(newline)
        .or(sentence)
        .or(word)
        .unwrap_or(window_end)
}

/// Cut one section's text into chunks of at most `chunk_size` chars with
/// `overlap` chars carried over between consecutive chunks.
fn split_section(text: &str, chunk_size: usize, overlap: usize, header_len: Option<usize>) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    // A header line longer than the chunk size is emitted whole; the hard
    // cut must not land inside a header line.
    if let Some(hlen) = header_len
        && hlen > chunk_size
    {
        pieces.push(chars[..hlen].iter().collect::<String>());
        start = hlen;
    }

    while start < chars.len() {
        if chars.len() - start <= chunk_size {
            pieces.push(chars[start..].iter().collect());
            break;
        }
        let brk = find_break(&chars, start, start + chunk_size);
        pieces.push(chars[start..brk].iter().collect());
        start = brk.saturating_sub(overlap).max(start + 1);
    }

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Identical input and parameters always produce the identical sequence.
pub fn chunk_markdown(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for section in split_sections(text) {
        for content in split_section(&section.text, chunk_size, overlap, section.header_len) {
            chunks.push(Chunk {
                content,
                header_path: section.header_path.clone(),
                section_level: section.level,
            });
        }
    }
    chunks
}
