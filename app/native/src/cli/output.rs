//! CLI output formatting.

use std::fmt::{self, Write as _};

use colored::Colorize;

use crate::modules::fleet::types::DisplayState;

/// Prints a JSON value pretty-printed with syntax highlighting.
///
/// Keys are cyan, strings green, numbers yellow, and literals magenta.
pub fn print_highlighted_json(value: &serde_json::Value) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    println!("{}", highlight_json(&json));
}

/// Colors pretty-printed JSON.
///
/// A string is a key when it is followed by a colon, which holds for output of
/// `serde_json::to_string_pretty`.
fn highlight_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len() * 2);
    let mut chars = json.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        match ch {
            '"' => {
                let mut end = json.len();
                let mut escaped = false;
                for (i, c) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        end = i + 1;
                        break;
                    }
                }
                let literal = &json[start..end];
                let is_key = json[end..].trim_start().starts_with(':');
                let _ = if is_key {
                    write!(out, "{}", literal.cyan())
                } else {
                    write!(out, "{}", literal.green())
                };
            }
            '{' | '}' | '[' | ']' => {
                let _ = write!(out, "{}", ch.to_string().white().bold());
            }
            c if c == '-' || c.is_ascii_alphanumeric() => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || matches!(next, '.' | '-' | '+') {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let scalar = &json[start..end];
                let _ = match scalar {
                    "true" | "false" | "null" => write!(out, "{}", scalar.magenta()),
                    _ if scalar.parse::<f64>().is_ok() => write!(out, "{}", scalar.yellow()),
                    _ => write!(out, "{scalar}"),
                };
            }
            c => out.push(c),
        }
    }

    out
}

/// Truncates a string to a maximum number of characters, adding an ellipsis.
///
/// Counts characters rather than bytes.
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }
    let cut = s.char_indices().nth(max_chars - 1).map_or(s.len(), |(idx, _)| idx);
    format!("{}…", &s[..cut])
}

/// Formats a boolean as a colored check mark.
#[must_use]
pub fn format_bool(value: bool) -> String {
    if value { "✓".green().to_string() } else { "✗".red().to_string() }
}

/// Formats a lifecycle state, highlighting states still in flight.
#[must_use]
pub fn format_state(state: DisplayState) -> String {
    let label = state.to_string();
    match state {
        DisplayState::Running => label.green().to_string(),
        DisplayState::Disabled => label.dimmed().to_string(),
        _ => label.yellow().to_string(),
    }
}

/// Formats an optional value, using `-` when absent.
#[must_use]
pub fn format_optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(json: &str) -> String {
        colored::control::set_override(false);
        highlight_json(json)
    }

    #[test]
    fn test_highlight_preserves_text() {
        let json = "{\n  \"name\": \"Desk \\\"A\\\"\",\n  \"serialNum\": 3,\n  \"enabled\": true,\n  \"x\": -1.5\n}";
        assert_eq!(plain(json), json);
    }

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("Desk", 10), "Desk");
        assert_eq!(truncate("Desk", 4), "Desk");
    }

    #[test]
    fn test_truncate_long_name() {
        assert_eq!(truncate("Living room projector", 8), "Living …");
        assert_eq!(truncate("Desk", 1), "…");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("Écran 🌍 principal", 8), "Écran 🌍…");
    }

    #[test]
    fn test_format_bool() {
        assert!(format_bool(true).contains('✓'));
        assert!(format_bool(false).contains('✗'));
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(7)), "7");
        assert_eq!(format_optional::<u32>(None), "-");
    }

    #[test]
    fn test_format_state_keeps_label() {
        colored::control::set_override(false);
        assert_eq!(format_state(DisplayState::Rebuilding), "rebuilding");
    }
}
