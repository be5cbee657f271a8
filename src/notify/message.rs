//! Notification text.

use crate::graph::{WatchedResource, mention};
use crate::monitor::Update;

/// Appended to a message cut short to fit the delivery limit.
///
/// Starts by closing the code fence the cut most likely left open.
pub const TRUNCATION_MARKER: &str = "...```\nThe message was truncated because it was too long :(";

/// Build the notification for a consumed change, fitted to `limit` characters.
///
/// Layout: the resource link with "was updated!", one mention line per
/// subscriber, then the diff fenced as a code block. A change without a diff
/// (nothing cached to compare against) gets only the header and mentions.
pub fn compose(resource: &WatchedResource, update: &Update, limit: usize) -> String {
    let mut text = format!("{} was updated!\n", resource.hyperlink());
    for subscriber in resource.subscribers() {
        text.push_str("* ");
        text.push_str(&mention(subscriber));
        text.push('\n');
    }
    if let Some(diff) = &update.diff {
        text.push_str("\n```diff\n");
        text.push_str(diff);
        text.push_str("```");
    }
    truncate(text, limit)
}

/// Cut `text` to at most `limit` characters, ending with [`TRUNCATION_MARKER`].
///
/// Text already within the limit is returned as is. Lengths count `char`s,
/// so multi-byte text is never split inside a character. A limit too small
/// for the whole marker yields only the marker's first `limit` characters.
pub fn truncate(text: String, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text;
    }
    let marker = TRUNCATION_MARKER.chars().count();
    if limit <= marker {
        return TRUNCATION_MARKER.chars().take(limit).collect();
    }
    let mut cut: String = text.chars().take(limit - marker).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
