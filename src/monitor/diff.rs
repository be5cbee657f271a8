//! Line-oriented unified diffs between two versions of a page.

use similar::TextDiff;

/// Lines of context around each hunk.
const CONTEXT_LINES: usize = 3;

/// Unified diff from `before` to `after`, sides labelled `Before` / `After`.
///
/// Line endings are normalized first, so a page that only switched between
/// `\n` and `\r\n` (or gained a trailing newline) does not produce a diff.
/// Returns `None` when the two texts have the same lines.
pub fn unified_diff(before: &str, after: &str) -> Option<String> {
    let before = normalize(before);
    let after = normalize(after);

    let diff = TextDiff::from_lines(before.as_str(), after.as_str());
    let text = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .missing_newline_hint(false)
        .header("Before", "After")
        .to_string();

    if text.is_empty() { None } else { Some(text) }
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    for line in text.lines() {
        out.push_str(line);
        out.push('\n');
    }
    out
}
