use std::borrow::Cow;

/// Longest file name produced by [`sanitize_filename`], in bytes.
const MAX_FILENAME_LEN: usize = 200;

fn is_control(c: char) -> bool {
    c.is_control() && c != '\t'
}

/// Strip control characters (including ANSI escapes' ESC byte) from feed-supplied
/// text before it reaches log output.
///
/// Returns `Cow::Borrowed` when there is nothing to strip.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_control(*c)).collect())
}

/// Turn a server-supplied name into a safe single path component.
///
/// Path separators and reserved characters become `_`, control characters are
/// dropped, leading dots are removed so the result is never hidden or a
/// parent reference, and the name is capped at 200 bytes on a char boundary.
/// Returns `None` if nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut end = trimmed.len().min(MAX_FILENAME_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    Some(trimmed[..end].to_string())
}
