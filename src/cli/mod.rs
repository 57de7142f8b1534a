pub mod chat;
pub mod list;
pub mod read;

/// Collapse to the first line and cut to `max` characters
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or(text);
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn test_truncate_keeps_short_first_line() {
        assert_eq!(truncate("hello\nworld", 10), "hello");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
