use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

/// Line diff between two property documents. Unchanged lines are dropped.
pub fn diff_lines(before: &Value, after: &Value) -> Vec<(ChangeTag, String)> {
    let old = pretty(before);
    let new = pretty(after);
    TextDiff::from_lines(&old, &new)
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| (change.tag(), change.value().trim_end().to_string()))
        .collect()
}

/// Print the changes between two property documents
pub fn print_diff(before: &Value, after: &Value) {
    for (tag, line) in diff_lines(before, after) {
        match tag {
            ChangeTag::Delete => println!("{}", format!("- {line}").red()),
            ChangeTag::Insert => println!("{}", format!("+ {line}").green()),
            ChangeTag::Equal => {}
        }
    }
}

/// Format how long ago `ts` was, relative to `now`
pub fn format_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);
    if duration.num_seconds() < 60 {
        "just now".to_string()
    } else if duration.num_minutes() < 60 {
        format!("{} minutes ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{} hours ago", duration.num_hours())
    } else {
        format!("{} days ago", duration.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_diff_lines_only_changes() {
        let before = json!({"description": "old", "ifl_processors": 2});
        let after = json!({"description": "new", "ifl_processors": 2});
        let lines = diff_lines(&before, &after);
        assert_eq!(
            lines,
            vec![
                (ChangeTag::Delete, r#"  "description": "old","#.to_string()),
                (ChangeTag::Insert, r#"  "description": "new","#.to_string()),
            ]
        );
    }

    #[test]
    fn test_diff_lines_identical() {
        let value = json!({"name": "lp01"});
        assert!(diff_lines(&value, &value).is_empty());
    }

    #[test]
    fn test_diff_lines_from_nothing() {
        let lines = diff_lines(&json!({}), &json!({"name": "eth0"}));
        assert!(lines.iter().any(|(tag, line)| *tag == ChangeTag::Delete && line == "{}"));
        assert!(
            lines
                .iter()
                .any(|(tag, line)| *tag == ChangeTag::Insert && line.contains("\"eth0\""))
        );
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_age(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(format_age(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_age(now - Duration::days(2), now), "2 days ago");
    }
}
