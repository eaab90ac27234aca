//! Content inspection helpers for the decision engines.

pub const HYPE_TOKENS: [&str; 7] = ["POG", "POGGERS", "OMEGALUL", "LUL", "KEKW", "W", "HYPE"];

/// Does `content` mention the persona, bare or `@`-prefixed,
/// case-insensitively?
pub fn detect_mention(content: &str, display_name: &str) -> bool {
    if display_name.is_empty() {
        return false;
    }
    let lowered = content.to_lowercase();
    let name = display_name.to_lowercase();
    if lowered.contains(&name) {
        return true;
    }
    !name.starts_with('@') && lowered.contains(&format!("@{name}"))
}

/// Any hype token present in the upper-cased content?
pub fn detect_hype(content: &str) -> bool {
    let upper = content.to_uppercase();
    HYPE_TOKENS.iter().any(|token| upper.contains(token))
}

/// First `count` alphanumeric words of `content`, joined by spaces.
pub fn leading_words(content: &str, count: usize) -> String {
    content
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .take(count)
        .collect::<Vec<_>>()
        .join(" ")
}
