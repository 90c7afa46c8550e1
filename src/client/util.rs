//! Small helpers shared by the chat client

use chrono::{Local, TimeZone, Utc};
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random suffix length of generated ids
const ID_SUFFIX_LEN: usize = 9;

/// Title length before truncation kicks in
pub const TITLE_MAX_CHARS: usize = 30;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a conversation id: `chat_{epoch_ms}_{9 base36 chars}`
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("chat_{}_{}", now_millis(), suffix)
}

/// Keep the first `max_chars` characters, appending "..." when cut
pub fn truncate_title(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Render an epoch-ms timestamp in local time
pub fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "chat");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_generate_id_unique_in_tight_loop() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short", TITLE_MAX_CHARS), "short");

        let exact = "a".repeat(30);
        assert_eq!(truncate_title(&exact, TITLE_MAX_CHARS), exact);

        let long = "b".repeat(31);
        assert_eq!(
            truncate_title(&long, TITLE_MAX_CHARS),
            format!("{}...", "b".repeat(30))
        );
    }

    #[test]
    fn test_truncate_title_multibyte() {
        let text = "你好".repeat(20);
        let title = truncate_title(&text, TITLE_MAX_CHARS);
        assert_eq!(title.chars().count(), 33);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_format_timestamp() {
        let formatted = format_timestamp(now_millis());
        assert_eq!(formatted.len(), "2024-01-01 00:00:00".len());
        assert_eq!(&formatted[4..5], "-");
        assert_eq!(&formatted[10..11], " ");
    }
}
