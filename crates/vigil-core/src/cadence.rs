//! Cadence configuration normalization.
//!
//! Legacy catalog rows carry cadence as free text (`"2h"`, `"3.5h/R"`,
//! `"120"`) and boolean-ish flags as `"Y"`/`"true"`/`"1"`. Both are
//! normalized here, exactly once, at the persistence/seed boundary; call
//! sites only ever see a typed [`CadenceRule`].

use contracts::CadenceRule;

/// Case-insensitive truthy parsing for legacy string flags.
pub fn parse_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}

/// Parse interval cadence text into a rule.
///
/// Accepted forms: `"2h"`, `"3.5h"`, a trailing `/R` jitter marker on
/// either, or a bare minute count (`"120"`). Anything else is `None`; the
/// caller stores the raw text and degrades to "unknown next time".
pub fn parse_cadence_spec(raw: &str) -> Option<CadenceRule> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (base, jitter) = match trimmed
        .strip_suffix("/R")
        .or_else(|| trimmed.strip_suffix("/r"))
    {
        Some(stripped) => (stripped.trim(), true),
        None => (trimmed, false),
    };

    if let Some(hours_text) = base.strip_suffix('h').or_else(|| base.strip_suffix('H')) {
        let hours: f64 = hours_text.trim().parse().ok()?;
        if !hours.is_finite() || hours <= 0.0 {
            return None;
        }
        let minutes = (hours * 60.0).round() as i64;
        return Some(CadenceRule::Interval { minutes, jitter });
    }

    let minutes: i64 = base.parse().ok()?;
    if minutes <= 0 {
        return None;
    }
    Some(CadenceRule::Interval { minutes, jitter })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_hours() {
        assert_eq!(
            parse_cadence_spec("2h"),
            Some(CadenceRule::Interval {
                minutes: 120,
                jitter: false
            })
        );
    }

    #[test]
    fn parses_fractional_hours_with_jitter() {
        assert_eq!(
            parse_cadence_spec("3.5h/R"),
            Some(CadenceRule::Interval {
                minutes: 210,
                jitter: true
            })
        );
        assert_eq!(
            parse_cadence_spec("7.5H/r"),
            Some(CadenceRule::Interval {
                minutes: 450,
                jitter: true
            })
        );
    }

    #[test]
    fn parses_bare_minutes() {
        assert_eq!(
            parse_cadence_spec("480"),
            Some(CadenceRule::Interval {
                minutes: 480,
                jitter: false
            })
        );
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!(parse_cadence_spec(""), None);
        assert_eq!(parse_cadence_spec("soon"), None);
        assert_eq!(parse_cadence_spec("-2h"), None);
        assert_eq!(parse_cadence_spec("0"), None);
    }

    #[test]
    fn truthy_accepts_legacy_spellings() {
        for raw in ["Y", "y", "TRUE", "true", "1", " yes "] {
            assert!(parse_truthy(raw), "{raw:?} should be truthy");
        }
        for raw in ["N", "0", "false", "", "maybe"] {
            assert!(!parse_truthy(raw), "{raw:?} should be falsy");
        }
    }
}
