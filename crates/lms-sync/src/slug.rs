//! Destination folder and entry name derivation.

use chrono::{DateTime, Datelike, FixedOffset};
use lms_core::{join_path, DEFAULT_ENTRY_NAME, TITLE_SLUG_LIMIT};

/// First [`TITLE_SLUG_LIMIT`] characters of the trimmed title, cut on a char
/// boundary.
pub fn truncate_title(title: &str) -> &str {
    let title = title.trim();
    match title.char_indices().nth(TITLE_SLUG_LIMIT) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

/// Lower-cases and collapses every run of characters outside `[a-z0-9]`
/// into a single `-`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(ch);
        } else {
            pending_separator = true;
        }
    }
    out
}

pub fn entry_name(title: &str, start: &DateTime<FixedOffset>) -> String {
    let base = normalize(truncate_title(title));
    let base = if base.is_empty() {
        DEFAULT_ENTRY_NAME
    } else {
        base.as_str()
    };
    let month = start.format("%b").to_string().to_ascii_lowercase();
    format!("{base}-{month}-{}", start.format("%d"))
}

pub fn destination_folder(target_path: &str, start: &DateTime<FixedOffset>) -> String {
    let year = join_path(target_path, &start.year().to_string());
    join_path(&year, &format!("{:02}", start.month()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .expect("offset")
            .with_ymd_and_hms(y, m, d, 9, 0, 0)
            .single()
            .expect("ts")
    }

    #[test]
    fn scenario_title_becomes_dated_slug() {
        assert_eq!(entry_name("Safety Training", &at(2024, 1, 15)), "safety-training-jan-15");
        assert_eq!(destination_folder("/content/events/lms-import", &at(2024, 1, 15)), "/content/events/lms-import/2024/01");
        assert_eq!(entry_name("Budget 101", &at(2024, 12, 3)), "budget-101-dec-03");
    }

    #[test]
    fn long_titles_truncate_to_exactly_57_chars() {
        let long = "A".repeat(80);
        assert_eq!(truncate_title(&long).chars().count(), 57);

        let exact = "B".repeat(57);
        assert_eq!(truncate_title(&exact), exact);
        let short = "Short title";
        assert_eq!(truncate_title(short), short);
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        let title = "é".repeat(60);
        let cut = truncate_title(&title);
        assert_eq!(cut.chars().count(), 57);
        assert_eq!(cut.len(), 57 * 'é'.len_utf8());
    }

    #[test]
    fn separators_collapse_and_trim() {
        assert_eq!(normalize("  AEM: Basic -- Training (2024)!  "), "aem-basic-training-2024");
        assert_eq!(normalize("EH&S / Lab Safety"), "eh-s-lab-safety");
        assert_eq!(normalize("***"), "");
    }

    #[test]
    fn blank_titles_use_fallback_name() {
        assert_eq!(entry_name("", &at(2024, 1, 15)), "imported-training-event-jan-15");
        assert_eq!(entry_name("  !!  ", &at(2024, 1, 15)), "imported-training-event-jan-15");
    }

    #[test]
    fn identical_title_and_date_give_identical_names() {
        let a = entry_name("Lab Safety Refresher", &at(2024, 3, 7));
        let b = entry_name("Lab Safety Refresher", &at(2024, 3, 7));
        assert_eq!(a, b);
        assert_ne!(a, entry_name("Lab Safety Refresher", &at(2024, 3, 8)));
    }
}
