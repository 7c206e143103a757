//! Free-text history import.
//!
//! Operators paste spawn logs copied from chat, one encounter per line:
//!
//! ```text
//! 21:30 Phantom Stag
//! 03:15 Ridge Matron (missed 2 times)
//! ```
//!
//! Times are today's wall clock; a time still in the future is rolled back
//! one day. Malformed lines are reported per line and skipped; a bad line
//! never fails the batch. Kind-name resolution happens at the persistence
//! layer; this parser only extracts time, name, and the miss suffix.

use chrono::{DateTime, Duration, Utc};

/// One successfully parsed line, anchored to a concrete instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedLine {
    pub line_no: usize,
    pub kind_name: String,
    pub occurred_at: DateTime<Utc>,
    pub missed: i64,
}

/// One skipped line with the reason the operator sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportIssue {
    pub line_no: usize,
    pub raw: String,
    pub reason: String,
}

/// Parse a pasted history block. Blank lines are ignored; everything else is
/// either an [`ImportedLine`] or an [`ImportIssue`].
pub fn parse_history(text: &str, now: DateTime<Utc>) -> (Vec<ImportedLine>, Vec<ImportIssue>) {
    let mut lines = Vec::new();
    let mut issues = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed, now) {
            Ok(mut parsed) => {
                parsed.line_no = line_no;
                lines.push(parsed);
            }
            Err(reason) => issues.push(ImportIssue {
                line_no,
                raw: trimmed.to_string(),
                reason,
            }),
        }
    }

    (lines, issues)
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Result<ImportedLine, String> {
    let (time_text, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| "expected `HH:MM <name>`".to_string())?;

    let (hour, minute) = parse_wall_time(time_text)
        .ok_or_else(|| format!("bad time `{time_text}`, expected HH:MM"))?;

    let (name, missed) = split_miss_suffix(rest.trim())?;
    if name.is_empty() {
        return Err("missing encounter name".to_string());
    }

    let mut occurred_at = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| format!("bad time `{time_text}`"))?
        .and_utc();
    // A pasted time later than now means it happened yesterday.
    if occurred_at > now {
        occurred_at -= Duration::days(1);
    }

    Ok(ImportedLine {
        line_no: 0,
        kind_name: name.to_string(),
        occurred_at,
        missed,
    })
}

fn parse_wall_time(text: &str) -> Option<(u32, u32)> {
    let (h, m) = text.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Split a trailing `(missed N times)` marker off the name. The singular
/// `(missed 1 time)` spelling is accepted too.
fn split_miss_suffix(rest: &str) -> Result<(&str, i64), String> {
    let Some(open) = rest.rfind('(') else {
        return Ok((rest, 0));
    };
    let Some(inner) = rest[open..]
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    else {
        return Ok((rest, 0));
    };

    let mut words = inner.split_whitespace();
    match (words.next(), words.next(), words.next(), words.next()) {
        (Some("missed"), Some(count), Some("time" | "times"), None) => {
            let missed: i64 = count
                .parse()
                .map_err(|_| format!("bad miss count `{count}`"))?;
            if missed < 0 {
                return Err(format!("bad miss count `{count}`"));
            }
            Ok((rest[..open].trim_end(), missed))
        }
        // Parenthesized text that is not a miss marker stays part of the name.
        _ => Ok((rest, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_plain_line_anchored_to_today() {
        let (lines, issues) = parse_history("09:30 Phantom Stag", noon());
        assert!(issues.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind_name, "Phantom Stag");
        assert_eq!(lines[0].missed, 0);
        assert_eq!(
            lines[0].occurred_at,
            Utc.with_ymd_and_hms(2025, 3, 12, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn future_times_roll_back_one_day() {
        let (lines, issues) = parse_history("21:15 Ridge Matron", noon());
        assert!(issues.is_empty());
        assert_eq!(
            lines[0].occurred_at,
            Utc.with_ymd_and_hms(2025, 3, 11, 21, 15, 0).unwrap()
        );
    }

    #[test]
    fn miss_suffix_is_extracted() {
        let (lines, _) = parse_history("03:15 Ridge Matron (missed 2 times)", noon());
        assert_eq!(lines[0].kind_name, "Ridge Matron");
        assert_eq!(lines[0].missed, 2);

        let (lines, _) = parse_history("03:15 Ridge Matron (missed 1 time)", noon());
        assert_eq!(lines[0].missed, 1);
    }

    #[test]
    fn unrelated_parentheses_stay_in_the_name() {
        let (lines, issues) = parse_history("09:30 Warden (north camp)", noon());
        assert!(issues.is_empty());
        assert_eq!(lines[0].kind_name, "Warden (north camp)");
        assert_eq!(lines[0].missed, 0);
    }

    #[test]
    fn bad_lines_are_reported_not_fatal() {
        let text = "09:30 Phantom Stag\nnot a line\n25:99 Ghost\n10:00 Warden";
        let (lines, issues) = parse_history(text, noon());
        assert_eq!(lines.len(), 2);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line_no, 2);
        assert_eq!(issues[1].line_no, 3);
        assert!(issues[1].reason.contains("25:99"));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let (lines, issues) = parse_history("\n  \n09:30 Stag\n\n", noon());
        assert_eq!(lines.len(), 1);
        assert!(issues.is_empty());
        assert_eq!(lines[0].line_no, 3);
    }

    #[test]
    fn missing_name_is_an_issue() {
        let (lines, issues) = parse_history("09:30 ", noon());
        assert!(lines.is_empty());
        assert_eq!(issues.len(), 1);
    }
}
