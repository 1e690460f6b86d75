//! Best-effort metadata manifest scraping
//!
//! Manifests are externally authored YAML or JSON. Rather than validating a
//! schema, [`parse_manifest`] pulls the handful of known keys out line by
//! line. Anything it cannot understand is left empty; it never fails.

use crate::models::UnitMetadata;
use regex::Regex;
use std::sync::OnceLock;

struct ManifestPatterns {
    key_line: Regex,
    list_item: Regex,
}

fn patterns() -> &'static ManifestPatterns {
    static PATTERNS: OnceLock<ManifestPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("static manifest pattern is valid");
        ManifestPatterns {
            key_line: compile(r#"^(\s*)["']?([A-Za-z_][A-Za-z0-9_]*)["']?\s*:\s*(.*?)\s*$"#),
            list_item: compile(r"^(\s*)-\s+(.*?)\s*$"),
        }
    })
}

/// Split a JSON object into its top-level `"key": value` entries, one per
/// line. Members of nested objects are dropped.
fn json_entries(text: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut brackets = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if depth == 1 {
                current.push(c);
            }
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '{' => {
                depth += 1;
                continue;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    entries.push(std::mem::take(&mut current));
                }
                continue;
            }
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            ',' if depth == 1 && brackets == 0 => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            '"' => in_string = true,
            _ => {}
        }

        if depth == 1 {
            current.push(if c == '\n' || c == '\r' { ' ' } else { c });
        }
    }
    entries.push(current);

    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Strip a trailing comma and surrounding quotes from a scalar
fn clean_scalar(raw: &str) -> String {
    let value = raw.trim().trim_end_matches(',').trim();
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    unquoted.replace("\\\"", "\"").replace("\\n", "\n")
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn is_block_indicator(value: &str) -> bool {
    matches!(value, "|" | ">" | "|-" | ">-" | "|+" | ">+")
}

/// Split the body of an inline list ("a, 'b', \"c\"") into cleaned items
fn split_inline_list(body: &str) -> Vec<String> {
    body.split(',')
        .map(clean_scalar)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extract metadata from manifest text
pub fn parse_manifest(text: &str) -> UnitMetadata {
    let entries;
    let lines: Vec<&str> = if text.trim_start().starts_with('{') {
        entries = json_entries(text);
        entries.iter().map(String::as_str).collect()
    } else {
        text.lines().collect()
    };
    let mut meta = UnitMetadata::default();
    let mut seen_tags = false;
    let mut i = 0;

    while i < lines.len() {
        let Some(caps) = patterns().key_line.captures(lines[i]) else {
            i += 1;
            continue;
        };
        let indent = caps[1].len();
        let key = caps[2].to_ascii_lowercase();
        let value = caps[3].to_string();
        i += 1;

        match key.as_str() {
            "name" if meta.display_name.is_none() => {
                meta.display_name = non_empty(clean_scalar(&value));
            }
            "level" | "difficulty" if meta.level.is_none() => {
                meta.level = non_empty(clean_scalar(&value));
            }
            "description" if meta.description.is_none() => {
                if is_block_indicator(&value) || value.is_empty() {
                    let folded = value.starts_with('>');
                    let mut body = Vec::new();
                    while i < lines.len()
                        && (lines[i].trim().is_empty() || indent_of(lines[i]) > indent)
                    {
                        body.push(lines[i].trim());
                        i += 1;
                    }
                    let joined = if folded {
                        body.join(" ")
                    } else {
                        body.join("\n")
                    };
                    meta.description = non_empty(joined.trim().to_string());
                } else {
                    meta.description = non_empty(clean_scalar(&value));
                }
            }
            "tags" if !seen_tags => {
                seen_tags = true;
                if let Some(rest) = value.strip_prefix('[') {
                    // Inline list, possibly spanning lines (JSON arrays)
                    let mut body = rest.to_string();
                    while !body.contains(']') && i < lines.len() {
                        body.push(',');
                        body.push_str(lines[i].trim());
                        i += 1;
                    }
                    let body = body.split(']').next().unwrap_or_default();
                    meta.tags = split_inline_list(body);
                } else if value.is_empty() {
                    while i < lines.len() {
                        if lines[i].trim().is_empty() {
                            i += 1;
                            continue;
                        }
                        match patterns().list_item.captures(lines[i]) {
                            Some(item) if item[1].len() >= indent => {
                                let tag = clean_scalar(&item[2]);
                                if !tag.is_empty() {
                                    meta.tags.push(tag);
                                }
                                i += 1;
                            }
                            _ => break,
                        }
                    }
                } else {
                    meta.tags = split_inline_list(&value);
                }
            }
            _ => {}
        }
    }

    meta
}
