use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{DocStatus, Priority};

static TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)[-*]\s+\[([xX\- ])\]\s+(.*)$").expect("task regex"));
static BLOCK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^([A-Za-z0-9_-]+)\s*$").expect("block id regex"));
static DUE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"📅\s*(\d{4}-\d{1,2}-\d{1,2})").expect("due date regex"));
static DUE_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*due\s*:\s*(\d{4}-\d{1,2}-\d{1,2})\s*\)").expect("due paren regex"));
static COMPLETION_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"✅\s*(\d{4}-\d{1,2}-\d{1,2})").expect("completion regex"));
static PRIORITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[⏫🔼🔽]").expect("priority regex"));
// Hyphens and slashes allowed so markers like #from-reminders stick together.
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([A-Za-z0-9_/-]+)").expect("tag regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// One task line taken apart. Offsets are not tracked; the rewriter works on
/// whole lines keyed by block token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub indent: String,
    pub status: DocStatus,
    pub description: String,
    pub block_id: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
}

/// Date-only parsing: datetime strings are truncated at `T`, trailing zone
/// designators dropped.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let s = s.split('T').next()?;
    let s = s.split('+').next()?.trim_end_matches('Z');
    let mut parts = s.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn priority_from_symbol(sym: &str) -> Option<Priority> {
    match sym {
        "⏫" => Some(Priority::High),
        "🔼" => Some(Priority::Medium),
        "🔽" => Some(Priority::Low),
        _ => None,
    }
}

fn priority_symbol(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "⏫",
        Priority::Medium => "🔼",
        Priority::Low => "🔽",
    }
}

/// Parse a single Markdown line; `None` when it is not a task line.
pub fn parse_task_line(line: &str) -> Option<ParsedLine> {
    let caps = TASK_RE.captures(line)?;
    let indent = caps.get(1).map_or("", |m| m.as_str()).to_owned();
    let status_char = caps.get(2).map_or(" ", |m| m.as_str());
    let mut content = caps.get(3).map_or("", |m| m.as_str()).to_owned();

    let mut status = match status_char {
        "x" | "X" => DocStatus::Done,
        "-" => DocStatus::Cancelled,
        _ => DocStatus::Todo,
    };

    let block_id = BLOCK_ID_RE.captures(&content).map(|c| c[1].to_owned());
    if let Some(start) = BLOCK_ID_RE.find(&content).map(|m| m.start()) {
        content.truncate(start);
        let trimmed = content.trim_end().len();
        content.truncate(trimmed);
    }

    let completion_date = COMPLETION_DATE_RE
        .captures(&content)
        .and_then(|c| parse_date(&c[1]));
    content = COMPLETION_DATE_RE.replace_all(&content, "").into_owned();

    let due_date = DUE_DATE_RE
        .captures(&content)
        .and_then(|c| parse_date(&c[1]))
        .or_else(|| {
            DUE_PAREN_RE
                .captures(&content)
                .and_then(|c| parse_date(&c[1]))
        });
    content = DUE_DATE_RE.replace_all(&content, "").into_owned();
    content = DUE_PAREN_RE.replace_all(&content, "").into_owned();

    let priority = PRIORITY_RE
        .find(&content)
        .and_then(|m| priority_from_symbol(m.as_str()));
    content = PRIORITY_RE.replace_all(&content, "").into_owned();

    let tags: Vec<String> = TAG_RE
        .captures_iter(&content)
        .map(|c| format!("#{}", &c[1]))
        .collect();
    if tags.iter().any(|t| t.eq_ignore_ascii_case("#cancelled")) {
        status = DocStatus::Cancelled;
    }
    content = TAG_RE.replace_all(&content, "").into_owned();

    let description = WS_RE.replace_all(content.trim(), " ").into_owned();

    Some(ParsedLine {
        indent,
        status,
        description,
        block_id,
        due_date,
        completion_date,
        priority,
        tags,
    })
}

/// Render a task line. Field order matches what the parser strips so that
/// format → parse round-trips.
#[allow(clippy::too_many_arguments)]
pub fn format_task_line(
    description: &str,
    status: DocStatus,
    due_date: Option<NaiveDate>,
    completion_date: Option<NaiveDate>,
    priority: Option<Priority>,
    tags: &[String],
    block_id: Option<&str>,
    indent: &str,
) -> String {
    let status_char = match status {
        DocStatus::Done => 'x',
        DocStatus::Cancelled => '-',
        DocStatus::Todo => ' ',
    };
    let mut parts: Vec<String> = vec![format!("{indent}- [{status_char}]")];
    if !description.is_empty() {
        parts.push(description.to_owned());
    }
    if let Some(d) = completion_date {
        parts.push(format!("✅ {}", d.format("%Y-%m-%d")));
    }
    if let Some(p) = priority {
        parts.push(priority_symbol(p).to_owned());
    }
    if let Some(d) = due_date {
        parts.push(format!("📅 {}", d.format("%Y-%m-%d")));
    }
    let mut tags: Vec<String> = tags
        .iter()
        .map(|t| {
            if t.starts_with('#') {
                t.clone()
            } else {
                format!("#{t}")
            }
        })
        .collect();
    if status == DocStatus::Cancelled && !tags.iter().any(|t| t.eq_ignore_ascii_case("#cancelled"))
    {
        tags.push("#cancelled".to_owned());
    }
    parts.extend(tags);
    if let Some(id) = block_id {
        parts.push(format!("^{id}"));
    }
    parts.join(" ")
}

/// Requested edits for [`edit_task_line`]. `None` leaves the token alone;
/// `Some(None)` in `due`/`priority` removes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineEdit {
    pub status: Option<DocStatus>,
    pub due: Option<Option<NaiveDate>>,
    pub priority: Option<Option<Priority>>,
    pub description: Option<String>,
}

impl LineEdit {
    pub fn is_empty(&self) -> bool {
        *self == LineEdit::default()
    }
}

/// Conservative single-line rewrite: only the requested tokens change, the
/// indentation, tags and trailing block token survive as-is. Duplicate due
/// and priority tokens get cleaned up along the way.
pub fn edit_task_line(raw: &str, edit: &LineEdit) -> String {
    let Some(parsed) = parse_task_line(raw) else {
        return raw.to_owned();
    };

    let status = edit.status.unwrap_or(parsed.status);
    let due = edit.due.unwrap_or(parsed.due_date);
    let priority = edit.priority.unwrap_or(parsed.priority);
    let description = edit
        .description
        .clone()
        .unwrap_or_else(|| parsed.description.clone());

    format_task_line(
        &description,
        status,
        due,
        parsed.completion_date,
        priority,
        &parsed.tags,
        parsed.block_id.as_deref(),
        &parsed.indent,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parse_full_line() {
        let line = "  - [ ] Ship the report 🔼 📅 2025-01-10 #work #q1 ^ab12cd34";
        let parsed = parse_task_line(line).unwrap();
        assert_eq!(
            parsed,
            ParsedLine {
                indent: "  ".into(),
                status: DocStatus::Todo,
                description: "Ship the report".into(),
                block_id: Some("ab12cd34".into()),
                due_date: NaiveDate::from_ymd_opt(2025, 1, 10),
                completion_date: None,
                priority: Some(Priority::Medium),
                tags: vec!["#work".into(), "#q1".into()],
            }
        );
    }

    #[test]
    fn parse_non_task_lines() {
        assert_eq!(parse_task_line("# A heading"), None);
        assert_eq!(parse_task_line("plain text"), None);
        assert_eq!(parse_task_line("- not a checkbox"), None);
    }

    #[test]
    fn cancelled_via_checkbox_and_tag() {
        let dash = parse_task_line("- [-] Dropped idea").unwrap();
        assert_eq!(dash.status, DocStatus::Cancelled);

        let tagged = parse_task_line("- [ ] Dropped idea #cancelled").unwrap();
        assert_eq!(tagged.status, DocStatus::Cancelled);
    }

    #[test]
    fn parse_date_truncates_datetime() {
        let want = NaiveDate::from_ymd_opt(2025, 1, 10);
        assert_eq!(parse_date("2025-01-10"), want);
        assert_eq!(parse_date("2025-1-10"), want);
        assert_eq!(parse_date("2025-01-10T14:03:00Z"), want);
        assert_eq!(parse_date("2025-01-10T14:03:00+02:00"), want);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn format_parse_round_trip() {
        let line = format_task_line(
            "Water the plants",
            DocStatus::Todo,
            NaiveDate::from_ymd_opt(2025, 3, 1),
            None,
            Some(Priority::Low),
            &["#home".to_owned()],
            Some("xyzzy123"),
            "",
        );
        assert_eq!(line, "- [ ] Water the plants 🔽 📅 2025-03-01 #home ^xyzzy123");
        let parsed = parse_task_line(&line).unwrap();
        assert_eq!(parsed.description, "Water the plants");
        assert_eq!(parsed.priority, Some(Priority::Low));
        assert_eq!(parsed.block_id.as_deref(), Some("xyzzy123"));
    }

    #[test]
    fn edit_changes_only_requested_tokens() {
        let raw = "  - [ ] Pay rent ⏫ 📅 2025-02-01 #money ^rent0001";
        let edited = edit_task_line(
            raw,
            &LineEdit {
                status: Some(DocStatus::Done),
                due: Some(NaiveDate::from_ymd_opt(2025, 2, 3)),
                ..LineEdit::default()
            },
        );
        assert_eq!(edited, "  - [x] Pay rent ⏫ 📅 2025-02-03 #money ^rent0001");
    }

    #[test]
    fn edit_cleans_duplicate_tokens() {
        // Two due dates on the same line collapse into the requested one.
        let raw = "- [ ] Call dentist 📅 2025-02-01 📅 2025-02-02 ^call0001";
        let edited = edit_task_line(
            raw,
            &LineEdit {
                due: Some(NaiveDate::from_ymd_opt(2025, 2, 5)),
                ..LineEdit::default()
            },
        );
        assert_eq!(edited, "- [ ] Call dentist 📅 2025-02-05 ^call0001");
    }

    #[test]
    fn edit_leaves_non_task_lines_alone() {
        let raw = "## Notes";
        assert_eq!(edit_task_line(raw, &LineEdit::default()), raw);
    }
}
