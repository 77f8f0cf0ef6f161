//! Text helpers

/// Truncate `message` to at most `max` characters, marking the cut with `...`
pub fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = message.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(truncate("boom", 10), "boom");
    }

    #[test]
    fn test_long_message_cut() {
        let msg = "x".repeat(50);
        let cut = truncate(&msg, 20);
        assert_eq!(cut.chars().count(), 20);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let msg = "é".repeat(30);
        let cut = truncate(&msg, 10);
        assert_eq!(cut.chars().count(), 10);
    }
}
