//! Sender allow-list enforcement, shared by channel adapters.
//!
//! Deny-by-default: an empty list means no one is allowed. Wildcard `"*"`
//! allows everyone. Entries may include or omit a leading `@`.

/// Returns `true` when the given sender is permitted to interact.
///
/// Matching rules (case-sensitive):
/// - `"*"` — allow everyone
/// - any other entry — match the sender id exactly (leading `@` ignored)
///
/// An empty `allow` slice always returns `false`.
pub fn is_allowed(allow: &[String], sender_id: &str) -> bool {
    if allow.is_empty() {
        return false;
    }
    allow.iter().any(|entry| {
        let entry = entry.trim_start_matches('@');
        entry == "*" || entry == sender_id
    })
}
