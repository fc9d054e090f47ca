/// Collapses whitespace runs to a single space and trims the ends.
///
/// Applied after every recognition path so empty checks agree regardless of
/// which engine produced the text.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recognized text counts by characters, not bytes.
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(clean_text("  こんにちは \n\n 世界\t!  "), "こんにちは 世界 !");
        assert_eq!(clean_text(" \u{3000}\n"), "");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for raw in ["a  b", "\tx\ny ", "", "すごい  ！", "already clean"] {
            let once = clean_text(raw);
            assert_eq!(clean_text(&once), once);
        }
    }

    #[test]
    fn length_counts_characters() {
        assert_eq!(char_len("あ"), 1);
        assert_eq!(char_len("ab"), 2);
    }
}
