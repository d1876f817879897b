//! Formatting utilities (Telegram MarkdownV2 / HTML rendering of portal data).

use std::sync::OnceLock;

use regex::Regex;

use crate::records::{AttendanceRecord, StudentProfile};

/// Work reports longer than this many characters are cut and suffixed with `...`.
pub const WORK_REPORT_MAX_CHARS: usize = 900;

/// Characters Telegram MarkdownV2 reserves outside entities.
const MARKDOWN_V2_SPECIAL: &str = r"_*[]()~`>#+-=|{}.!";

fn markdown_v2_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The backslash itself is part of the class.
    RE.get_or_init(|| Regex::new(r"[\\_*\[\]()~`>#+\-=|{}.!]").expect("valid regex"))
}

/// Escape text for Telegram MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    markdown_v2_re().replace_all(text, r"\$0").into_owned()
}

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plain-text rendering of a MarkdownV2 message.
///
/// Escaped characters are kept as literals; unescaped markup characters are dropped.
pub fn strip_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
            continue;
        }
        if MARKDOWN_V2_SPECIAL.contains(c) {
            continue;
        }
        out.push(c);
    }
    out
}

/// `5400 -> "1h 30m"`.
pub fn format_duration_hm(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours}h {minutes}m")
}

/// Cut `text` to `max_chars` characters, appending `...` when anything was dropped.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// MarkdownV2 report for one attendance record: a quoted timeline and the work report
/// in a monospace span.
pub fn format_record_text(record: &AttendanceRecord) -> String {
    let mut message = format!(">📅 *Date:* {}\n", escape_markdown_v2(&record.date));
    message.push_str(&format!(
        ">⏰ *Check\\-In:* {}\n",
        escape_markdown_v2(&record.check_in_time)
    ));

    if let Some(out) = &record.check_out_time {
        message.push_str(&format!(">🛑 *Check\\-Out:* {}\n", escape_markdown_v2(out)));
    }
    if let Some(secs) = record.working_seconds {
        message.push_str(&format!(">⏳ *Duration:* {}\n", format_duration_hm(secs)));
    }

    if let Some(report) = &record.work_report {
        let report = truncate_with_ellipsis(report, WORK_REPORT_MAX_CHARS);
        message.push_str(&format!(
            "\n📝 *Work Report:*\n\n`{}`",
            escape_markdown_v2(&report)
        ));
    }

    message
}

/// HTML profile card.
pub fn format_profile_html(profile: &StudentProfile) -> String {
    let field = |v: &Option<String>| escape_html(v.as_deref().unwrap_or("N/A"));
    let fees = profile.course_fees().map(escape_html).unwrap_or("N/A".to_string());
    let status = if profile.active {
        "🟢 Active"
    } else {
        "🔴 Inactive"
    };

    format!(
        "👤 <b>Student Profile</b>\n\n\
         🆔 <b>User ID:</b> <code>{}</code>\n\
         📛 <b>Name:</b> {}\n\
         🎂 <b>DOB:</b> {}\n\
         📱 <b>Mobile:</b> <code>{}</code>\n\
         📧 <b>Email:</b> <code>{}</code>\n\
         🎓 <b>Course:</b> {}\n\
         📚 <b>Applied For:</b> {}\n\
         💰 <b>Fees:</b> ₹{}\n\
         📅 <b>Joined:</b> {}\n\
         ✨ <b>Status:</b> {}",
        field(&profile.user_id),
        field(&profile.full_name),
        field(&profile.dob),
        field(&profile.mobile),
        field(&profile.email),
        field(&profile.current_course),
        field(&profile.apply_for_course),
        fees,
        field(&profile.join_date),
        status,
    )
}

/// HTML body of the `/settings` screen.
pub fn format_settings_html(stretch_enabled: bool) -> String {
    let status = if stretch_enabled {
        "✅ Enabled (x2.0 Vertical)"
    } else {
        "❌ Disabled (Original)"
    };
    format!("⚙️ <b>Image Settings</b>\n\nVertical Stretching: {status}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markdown_v2_class() {
        assert_eq!(escape_markdown_v2("a_b*c"), r"a\_b\*c");
        assert_eq!(
            escape_markdown_v2("[x](y)~`>#+-=|{}.!"),
            r"\[x\]\(y\)\~\`\>\#\+\-\=\|\{\}\.\!"
        );
        assert_eq!(escape_markdown_v2(r"a\b"), r"a\\b");
        assert_eq!(escape_markdown_v2("plain text 123"), "plain text 123");
    }

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn strips_markup_but_keeps_escaped_literals() {
        let md = ">⏰ *Check\\-In:* 09\\.00\n`a\\_b`";
        assert_eq!(strip_markdown_v2(md), "⏰ Check-In: 09.00\na_b");
    }

    #[test]
    fn duration_hours_minutes() {
        assert_eq!(format_duration_hm(5400), "1h 30m");
        assert_eq!(format_duration_hm(59), "0h 0m");
        assert_eq!(format_duration_hm(3600 * 9 + 61), "9h 1m");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
        assert_eq!(truncate_with_ellipsis("abcd", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("ééé", 2), "éé...");
    }

    #[test]
    fn record_text_layout() {
        let rec = AttendanceRecord {
            date: "2025-01-10".to_string(),
            check_in_time: "09:00".to_string(),
            check_out_time: Some("18:30".to_string()),
            working_seconds: Some(5400),
            work_report: Some("Fixed bug #12.".to_string()),
            ..Default::default()
        };
        let text = format_record_text(&rec);
        assert_eq!(
            text,
            ">📅 *Date:* 2025\\-01\\-10\n\
             >⏰ *Check\\-In:* 09:00\n\
             >🛑 *Check\\-Out:* 18:30\n\
             >⏳ *Duration:* 1h 30m\n\
             \n📝 *Work Report:*\n\n`Fixed bug \\#12\\.`"
        );
    }

    #[test]
    fn record_text_truncates_long_report() {
        let rec = AttendanceRecord {
            date: "d".to_string(),
            check_in_time: "t".to_string(),
            work_report: Some("x".repeat(WORK_REPORT_MAX_CHARS + 50)),
            ..Default::default()
        };
        let text = format_record_text(&rec);
        let expected = format!("`{}\\.\\.\\.`", "x".repeat(WORK_REPORT_MAX_CHARS));
        assert!(text.ends_with(&expected));
        assert!(!text.contains("Check\\-Out"));
        assert!(!text.contains("Duration"));
    }

    #[test]
    fn profile_card_escapes_and_defaults() {
        let p = StudentProfile {
            full_name: Some("A <B>".to_string()),
            active: true,
            ..Default::default()
        };
        let html = format_profile_html(&p);
        assert!(html.contains("<b>Name:</b> A &lt;B&gt;"));
        assert!(html.contains("<b>Fees:</b> ₹N/A"));
        assert!(html.contains("🟢 Active"));
    }
}
