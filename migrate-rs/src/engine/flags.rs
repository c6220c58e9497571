//! Flag sanitization for cross-server copies
//!
//! Servers disagree about which flag tokens they accept. Only
//! well-formed system flags (backslash plus alphabetic name) and
//! well-formed keyword tokens survive; anything else is dropped before
//! the append.

/// Keep only well-formed flag tokens.
///
/// Returns `None` when nothing survives: some servers reject an
/// explicit empty flag list, so "no flags" must be passed as absence.
pub fn sanitize_flags(raw: &[String]) -> Option<Vec<String>> {
    let kept: Vec<String> = raw
        .iter()
        .filter(|token| is_valid_flag(token))
        .cloned()
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}

fn is_valid_flag(token: &str) -> bool {
    if let Some(name) = token.strip_prefix('\\') {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic())
    } else {
        !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}
