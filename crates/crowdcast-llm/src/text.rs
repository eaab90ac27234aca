//! Output post-processing shared by every provider.

/// Collapse a model reply onto a single line, strip `@` handles, and
/// truncate to `max_chars` (ellipsis on overflow). Character-aware so
/// multi-byte sequences never split.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let single_line: String = text.replace(['\n', '\r'], " ");
    let collapsed = single_line.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = collapsed.replace('@', "");
    truncate_chars(stripped.trim(), max_chars)
}

/// Truncate to `max_chars` characters, appending `…` when content is lost.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    if max_chars == 1 {
        return value.chars().take(1).collect();
    }
    let mut out: String = value.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(clean_text("a\nb\r\n  c   d", 100), "a b c d");
    }

    #[test]
    fn strips_at_signs() {
        assert_eq!(clean_text("hey @viewer nice", 100), "hey viewer nice");
    }

    #[test]
    fn truncates_with_ellipsis() {
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("abcdef", 6), "abcdef");
        assert_eq!(truncate_chars("abcdef", 1), "a");
        assert_eq!(truncate_chars("abcdef", 0), "");
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let s = "ééééé";
        assert_eq!(truncate_chars(s, 3), "éé…");
    }
}
