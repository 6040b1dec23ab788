//! Title inference for threads still carrying the default title.

/// Longest inferred title, in characters, before the ellipsis.
pub const MAX_TITLE_CHARS: usize = 48;

/// Derive a sidebar title from the first user message.
///
/// Uses the first non-blank line with whitespace collapsed, cut at a word
/// boundary when it runs past [`MAX_TITLE_CHARS`]. Returns `None` when there
/// is nothing usable.
pub fn infer_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return Some(collapsed);
    }

    let cut: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let ends_on_boundary = collapsed.chars().nth(MAX_TITLE_CHARS) == Some(' ');
    let trimmed = match cut.rfind(' ') {
        _ if ends_on_boundary => cut.as_str(),
        // Only back off to a word boundary if it doesn't eat most of the title
        Some(idx) if idx >= MAX_TITLE_CHARS / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    Some(format!("{}…", trimmed.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_used_verbatim() {
        assert_eq!(infer_title("  What is   Rust? ").as_deref(), Some("What is Rust?"));
    }

    #[test]
    fn first_non_blank_line_wins() {
        assert_eq!(
            infer_title("\n\n  Summarize this\nsecond line").as_deref(),
            Some("Summarize this")
        );
    }

    #[test]
    fn blank_text_yields_none() {
        assert_eq!(infer_title("   \n\t"), None);
    }

    #[test]
    fn long_text_is_cut_at_word_boundary() {
        let text = "Please explain the difference between optimistic and pessimistic locking strategies";
        let title = infer_title(text).unwrap();
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= MAX_TITLE_CHARS + 1);
        assert_eq!(title, "Please explain the difference between optimistic…");
    }

    #[test]
    fn partial_word_is_dropped() {
        let text = "Explain how the borrow checker reasons about lifetimes in closures";
        assert_eq!(
            infer_title(text).as_deref(),
            Some("Explain how the borrow checker reasons about…")
        );
    }

    #[test]
    fn long_unbroken_word_is_hard_cut() {
        let text = "x".repeat(100);
        let title = infer_title(&text).unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS + 1);
    }
}
