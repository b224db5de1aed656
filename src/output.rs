//! Terminal and JSON rendering helpers shared by the commands.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::index::{Card, CardData};

const PREVIEW_CHARS: usize = 48;

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Unix seconds as `YYYY-MM-DD HH:MM:SS UTC`.
pub fn format_ts(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => secs.to_string(),
    }
}

/// Unix nanoseconds as `YYYY-MM-DD HH:MM:SS UTC`.
pub fn format_ts_nanos(nanos: i64) -> String {
    format_ts(nanos.div_euclid(1_000_000_000))
}

/// One-line description of what a card holds: its first path, or the start
/// of its text.
pub fn preview(card: &Card) -> String {
    match card.data() {
        CardData::Paths(paths) => match paths.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [first, rest @ ..] => format!("{} (+{} more)", first, rest.len()),
        },
        CardData::Text(text) => {
            let line = text.lines().next().unwrap_or("");
            let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
            if line.chars().count() > PREVIEW_CHARS || text.lines().nth(1).is_some() {
                out.push_str("...");
            }
            format!("\"{}\"", out)
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gart_core::Oid;
    use std::path::Path;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_ts_nanos(86_400_000_000_000), "1970-01-02 00:00:00 UTC");
    }

    #[test]
    fn test_preview() {
        let text = Card::new_text(Oid::for_text("hi"), "hi\nthere");
        assert_eq!(preview(&text), "\"hi...\"");
        let mut file = Card::new_file(Oid::for_text("f"), Path::new("/a/b")).unwrap();
        assert_eq!(preview(&file), "/a/b");
        file.add_path(Path::new("/c")).unwrap();
        assert_eq!(preview(&file), "/a/b (+1 more)");
    }
}
