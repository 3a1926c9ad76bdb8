//! Scrubbing for error text that reaches end users.
//!
//! Internal failures must never leak filesystem layout or credentials into a
//! chat reply. Filesystem paths collapse to `[path]` and long alphanumeric
//! runs (API keys, tokens) collapse to `[key]`.

use std::sync::LazyLock;

use regex::Regex;

/// Unix or Windows path with at least two separators.
static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z]:)?(?:[/\\][\w.\- ]+){2,}").expect("path regex")
});

/// Token-like run of 20+ alphanumerics.
static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9]{20,}").expect("key regex"));

/// Scrub a message before it is shown to a user.
pub fn redact_user_facing(text: &str) -> String {
    let no_paths = PATH_RE.replace_all(text, "[path]");
    KEY_RE.replace_all(&no_paths, "[key]").into_owned()
}
