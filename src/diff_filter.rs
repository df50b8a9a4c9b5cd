use lazy_static::lazy_static;

lazy_static! {
    // `//` line comments up to and including the terminator, and non-greedy
    // `/* ... */` blocks. Both are suppressed inside double-quoted string
    // literals, which is what the trailing lookahead (even number of quotes
    // up to the end of the content) is for. The lookarounds rule out the
    // plain regex engine here.
    static ref COMMENT: fancy_regex::Regex = fancy_regex::Regex::new(
        r#"(//[^"\n\r]*(?:"[^"\n\r]*"[^"\n\r]*)*[\r\n]|/\*([^*]|\*(?!/))*?\*/)(?=[^"]*(?:"[^"]*"[^"]*)*$)"#
    )
    .unwrap();
    // Javadoc-style continuation lines on either diff side (`- *`, `+ /*`, ...).
    static ref JDOC_CONTINUATION: regex::Regex = regex::Regex::new(r"^(- |\+)\s*(\*|/\*)").unwrap();
    static ref WHITESPACE_RUN: regex::Regex = regex::Regex::new(r"\s+").unwrap();
}

/// Whether a hunk changes nothing but comments or whitespace.
///
/// Strips comments from the unified-diff body, collapses whitespace runs,
/// drops Javadoc continuation lines, and compares what remains of the
/// deleted side against the added side.
pub fn comment_only_change(content: &str) -> bool {
    // the comment pattern needs a terminator after a trailing `//` comment
    let content = format!("{}\n", content);
    let stripped = COMMENT.replace_all(&content, "");

    let mut removed = String::new();
    let mut added = String::new();
    for line in stripped.split('\n') {
        let line = WHITESPACE_RUN.replace_all(line, " ");
        if JDOC_CONTINUATION.is_match(&line) {
            continue;
        }
        if let Some(body) = line.strip_prefix('-') {
            removed.push_str(body.trim());
        } else if let Some(body) = line.strip_prefix('+') {
            added.push_str(body.trim());
        }
    }
    removed == added
}

/// Whether a deleted line should count as code rather than a comment.
pub fn is_code_line(line: &str) -> bool {
    let line = line.trim_start();
    !(line.starts_with("//") || line.starts_with("/*") || line.starts_with('*'))
}

/// Walk a unified-diff hunk body and return the `(line_number, trimmed_text)`
/// pairs of the added and deleted sides. Line counters start at the hunk's
/// old/new start positions; context lines advance both sides.
pub fn changed_lines(
    old_start: usize,
    new_start: usize,
    content: &str,
) -> (Vec<(usize, String)>, Vec<(usize, String)>) {
    let mut added = Vec::new();
    let mut deleted = Vec::new();

    let mut del_line = old_start;
    let mut add_line = new_start;
    for line in content.split('\n') {
        if let Some(body) = line.strip_prefix('+') {
            added.push((add_line, body.trim().to_string()));
            add_line += 1;
        } else if let Some(body) = line.strip_prefix('-') {
            deleted.push((del_line, body.trim().to_string()));
            del_line += 1;
        } else {
            del_line += 1;
            add_line += 1;
        }
    }

    (added, deleted)
}
