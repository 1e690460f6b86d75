//! Static catalog of known build-manifest breakage and the rewrites for it
//!
//! Every function here is pure: content in, rewritten content plus the
//! changes made out. Nothing touches the filesystem.

use super::{FixItem, FixKind};
use regex::Regex;
use std::sync::OnceLock;

/// Base image tags that no longer resolve upstream, with a working replacement
pub const BROKEN_TAGS: &[(&str, &str)] = &[
    ("mysql:5.7.15", "mysql:5.7"),
    ("mysql:5.7.16", "mysql:5.7"),
    ("mysql:5.7.17", "mysql:5.7"),
    ("postgres:9.6.1", "postgres:9.6"),
    ("python:3.6.0-slim", "python:3.6-slim"),
];

/// Tool images whose `latest` enforces policies the benchmarks rely on breaking
pub const PINNED_TOOLS: &[(&str, &str)] = &[("composer:latest", "composer:2.2")];

/// Distribution family whose package repositories moved to an archive host
#[derive(Debug)]
pub struct EolFamily {
    pub name: &'static str,
    pub markers: &'static [&'static str],
    pub archive_host: &'static str,
    /// Instruction pointing apt at the archive
    pub mirror_fix: &'static str,
}

pub const EOL_FAMILIES: &[EolFamily] = &[
    EolFamily {
        name: "Debian",
        markers: &[
            "jessie", "stretch", "buster", "php:5", "php:7.0", "php:7.1", "php:7.2",
            "python:2.7", "node:8", "node:10",
        ],
        archive_host: "archive.debian.org",
        mirror_fix: "RUN sed -i -e 's|deb.debian.org|archive.debian.org|g' \
                     -e 's|security.debian.org|archive.debian.org|g' \
                     -e '/-updates/d' /etc/apt/sources.list",
    },
    EolFamily {
        name: "Ubuntu",
        markers: &[
            "ubuntu:14.04",
            "ubuntu:16.04",
            "ubuntu:18.10",
            "ubuntu:19.04",
            "ubuntu:19.10",
        ],
        archive_host: "old-releases.ubuntu.com",
        mirror_fix: "RUN sed -i -e 's|archive.ubuntu.com|old-releases.ubuntu.com|g' \
                     -e 's|security.ubuntu.com|old-releases.ubuntu.com|g' /etc/apt/sources.list",
    },
];

const PACKAGE_INDEX_REFRESH: &str = "apt-get update";

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Replace whole-token occurrences of `from` with `to`.
///
/// `mysql:5.7.1` does not match inside `mysql:5.7.15`, nor `sql:5.7.15`
/// inside `mysql:5.7.15`. Returns None when nothing matched.
pub fn replace_token(content: &str, from: &str, to: &str) -> Option<String> {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let mut replaced = false;

    for (start, _) in content.match_indices(from) {
        let end = start + from.len();
        let before_ok = content[..start].chars().next_back().map_or(true, |c| !is_tag_char(c));
        let after_ok = content[end..].chars().next().map_or(true, |c| !is_tag_char(c));
        if before_ok && after_ok {
            out.push_str(&content[last..start]);
            out.push_str(to);
            last = end;
            replaced = true;
        }
    }

    if !replaced {
        return None;
    }
    out.push_str(&content[last..]);
    Some(out)
}

/// Apply every tag table entry, one FixItem per rewritten tag
pub fn fix_tags(
    content: &str,
    file: &str,
    table: &[(&str, &str)],
    kind: FixKind,
) -> (String, Vec<FixItem>) {
    let mut current = content.to_string();
    let mut items = Vec::new();

    for (from, to) in table {
        if let Some(next) = replace_token(&current, from, to) {
            let description = match kind {
                FixKind::PinnedTool => format!("Pin {} to {}", from, to),
                _ => format!("Replace unavailable base image {} with {}", from, to),
            };
            items.push(FixItem {
                kind,
                file: file.to_string(),
                description,
                before: Some(from.to_string()),
                after: Some(to.to_string()),
            });
            current = next;
        }
    }

    (current, items)
}

/// Point apt at the archive mirror for end-of-life base distributions.
///
/// Applies only when the file refreshes the package index and does not
/// already reference the archive. The mirror fix is inserted right before
/// the instruction that runs the first index refresh.
pub fn fix_eol_repository(content: &str, file: &str) -> Option<(String, FixItem)> {
    let family = EOL_FAMILIES
        .iter()
        .find(|f| f.markers.iter().any(|m| content.contains(m)))?;

    if content.contains(family.archive_host) {
        return None;
    }

    let lines: Vec<&str> = content.lines().collect();
    let refresh = lines
        .iter()
        .position(|l| !l.trim_start().starts_with('#') && l.contains(PACKAGE_INDEX_REFRESH))?;

    // Walk back over continuation lines to the start of the instruction
    let mut start = refresh;
    while start > 0 && lines[start - 1].trim_end().ends_with('\\') {
        start -= 1;
    }

    let indent: String = lines[start]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    let inserted = format!("{}{}", indent, family.mirror_fix);

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    out.insert(start, inserted.clone());
    let mut rewritten = out.join("\n");
    if content.ends_with('\n') {
        rewritten.push('\n');
    }

    let item = FixItem {
        kind: FixKind::EolRepository,
        file: file.to_string(),
        description: format!(
            "{} release is end-of-life; use {} for packages",
            family.name, family.archive_host
        ),
        before: Some(lines[start].trim().to_string()),
        after: Some(format!("{}\n{}", inserted.trim(), lines[start].trim())),
    };

    Some((rewritten, item))
}

/// Compose `expose` patterns, compiled once
struct ExposePatterns {
    block: Regex,
    inline: Regex,
    item: Regex,
    host_mapping: Regex,
}

fn expose_patterns() -> &'static ExposePatterns {
    static PATTERNS: OnceLock<ExposePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("static expose pattern is valid");
        ExposePatterns {
            block: compile(r"^(\s*)expose:\s*(?:#.*)?$"),
            inline: compile(r"^(\s*expose:\s*)\[(.*)\](\s*)$"),
            item: compile(r#"^(\s*-\s*)(["']?)([^"'\s]+)(["']?)(\s*)$"#),
            host_mapping: compile(r"^(?:[0-9.]+:)?[0-9]+:([0-9]+(?:/[a-z]+)?)$"),
        }
    })
}

/// Container port of an expose entry that wrongly carries a host mapping
fn container_port(entry: &str) -> Option<String> {
    expose_patterns().host_mapping.captures(entry).map(|c| c[1].to_string())
}

fn expose_item_fix(file: &str, before: &str, after: &str) -> FixItem {
    FixItem {
        kind: FixKind::ComposeExpose,
        file: file.to_string(),
        description: "expose takes container ports only; drop the host mapping".to_string(),
        before: Some(before.to_string()),
        after: Some(after.to_string()),
    }
}

/// Rewrite `expose` entries of the form `HOST:CONTAINER` to `CONTAINER`
pub fn fix_compose_expose(content: &str, file: &str) -> (String, Vec<FixItem>) {
    let mut out = Vec::new();
    let mut items = Vec::new();
    let mut block_indent: Option<usize> = None;

    for line in content.lines() {
        let indent = line.len() - line.trim_start().len();

        if let Some(expose_indent) = block_indent {
            // Sequence items may sit at the key's own indentation
            let same_level_item = indent == expose_indent && line.trim_start().starts_with('-');
            if line.trim().is_empty() || indent > expose_indent || same_level_item {
                if let Some(caps) = expose_patterns().item.captures(line) {
                    if let Some(port) = container_port(&caps[3]) {
                        let rewritten = format!("{}{}{}{}{}", &caps[1], &caps[2], port, &caps[4], &caps[5]);
                        items.push(expose_item_fix(file, line.trim(), rewritten.trim()));
                        out.push(rewritten);
                        continue;
                    }
                }
                out.push(line.to_string());
                continue;
            }
            block_indent = None;
        }

        if expose_patterns().block.is_match(line) {
            block_indent = Some(indent);
            out.push(line.to_string());
            continue;
        }

        if let Some(caps) = expose_patterns().inline.captures(line) {
            let mut changed = false;
            let entries: Vec<String> = caps[2]
                .split(',')
                .map(|raw| {
                    let trimmed = raw.trim();
                    let quote = trimmed
                        .chars()
                        .next()
                        .filter(|c| *c == '"' || *c == '\'');
                    let bare = trimmed.trim_matches(|c| c == '"' || c == '\'');
                    match container_port(bare) {
                        Some(port) => {
                            changed = true;
                            match quote {
                                Some(q) => format!("{}{}{}", q, port, q),
                                None => port,
                            }
                        }
                        None => trimmed.to_string(),
                    }
                })
                .collect();

            if changed {
                let rewritten = format!("{}[{}]{}", &caps[1], entries.join(", "), &caps[3]);
                items.push(expose_item_fix(file, line.trim(), rewritten.trim()));
                out.push(rewritten);
                continue;
            }
        }

        out.push(line.to_string());
    }

    if items.is_empty() {
        return (content.to_string(), items);
    }

    let mut rewritten = out.join("\n");
    if content.ends_with('\n') {
        rewritten.push('\n');
    }
    (rewritten, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_token_respects_boundaries() {
        assert_eq!(
            replace_token("FROM mysql:5.7.15\n", "mysql:5.7.15", "mysql:5.7").as_deref(),
            Some("FROM mysql:5.7\n")
        );
        assert_eq!(replace_token("FROM mysql:5.7.15", "mysql:5.7.1", "mysql:5.7"), None);
        assert_eq!(replace_token("FROM mymysql:5.7.15", "mysql:5.7.15", "mysql:5.7"), None);
        assert_eq!(
            replace_token("FROM library/mysql:5.7.15 AS db", "mysql:5.7.15", "mysql:5.7").as_deref(),
            Some("FROM library/mysql:5.7 AS db")
        );
        assert_eq!(
            replace_token("a mysql:5.7.15 b mysql:5.7.15", "mysql:5.7.15", "x").as_deref(),
            Some("a x b x")
        );
    }

    #[test]
    fn test_pinned_tool() {
        let content = "COPY --from=composer:latest /usr/bin/composer /usr/bin/composer\n";
        let (fixed, items) = fix_tags(content, "Dockerfile", PINNED_TOOLS, FixKind::PinnedTool);
        assert_eq!(fixed, "COPY --from=composer:2.2 /usr/bin/composer /usr/bin/composer\n");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].after.as_deref(), Some("composer:2.2"));
    }

    #[test]
    fn test_eol_fix_inserted_before_index_refresh() {
        let content = "FROM php:7.1-apache\nCOPY . /var/www/html\nRUN apt-get update && apt-get install -y curl\n";
        let (fixed, item) = fix_eol_repository(content, "app/Dockerfile").unwrap();

        let lines: Vec<&str> = fixed.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("RUN sed -i"));
        assert!(lines[2].contains("archive.debian.org"));
        assert_eq!(lines[3], "RUN apt-get update && apt-get install -y curl");
        assert!(fixed.ends_with('\n'));
        assert_eq!(item.kind, FixKind::EolRepository);
        assert_eq!(item.file, "app/Dockerfile");
    }

    #[test]
    fn test_eol_fix_targets_instruction_start() {
        let content = "FROM debian:stretch\nRUN set -ex \\\n    && apt-get update \\\n    && apt-get install -y nginx\n";
        let (fixed, _) = fix_eol_repository(content, "Dockerfile").unwrap();
        let lines: Vec<&str> = fixed.lines().collect();
        assert!(lines[1].contains("archive.debian.org"));
        assert_eq!(lines[2], "RUN set -ex \\");
    }

    #[test]
    fn test_eol_gate() {
        // No package index refresh: left alone
        assert!(fix_eol_repository("FROM node:8\nCOPY . /app\n", "Dockerfile").is_none());
        // Already on the archive
        let archived = "FROM debian:jessie\nRUN echo deb http://archive.debian.org/debian jessie main > /etc/apt/sources.list\nRUN apt-get update\n";
        assert!(fix_eol_repository(archived, "Dockerfile").is_none());
        // Supported release
        assert!(fix_eol_repository("FROM debian:bookworm\nRUN apt-get update\n", "Dockerfile").is_none());
    }

    #[test]
    fn test_eol_fix_skips_commented_refresh() {
        let content = "FROM debian:buster\n# RUN apt-get update\nCOPY . /app\nRUN apt-get update && apt-get install -y git\n";
        let (fixed, _) = fix_eol_repository(content, "Dockerfile").unwrap();
        let lines: Vec<&str> = fixed.lines().collect();
        assert_eq!(lines[1], "# RUN apt-get update");
        assert_eq!(lines[2], "COPY . /app");
        assert!(lines[3].contains("archive.debian.org"));
        assert_eq!(lines[4], "RUN apt-get update && apt-get install -y git");

        // A refresh that only appears in a comment does not qualify
        assert!(fix_eol_repository("FROM debian:buster\n# RUN apt-get update\n", "Dockerfile").is_none());
    }

    #[test]
    fn test_ubuntu_family() {
        let content = "FROM ubuntu:16.04\nRUN apt-get update\n";
        let (fixed, item) = fix_eol_repository(content, "Dockerfile").unwrap();
        assert!(fixed.contains("old-releases.ubuntu.com"));
        assert!(item.description.starts_with("Ubuntu"));
    }

    #[test]
    fn test_expose_block_list() {
        let content = "services:\n  web:\n    expose:\n      - \"8080:80\"\n      - 3306\n      - 127.0.0.1:9000:9000/tcp\n    ports:\n      - \"8080:80\"\n";
        let (fixed, items) = fix_compose_expose(content, "docker-compose.yml");

        assert_eq!(
            fixed,
            "services:\n  web:\n    expose:\n      - \"80\"\n      - 3306\n      - 9000/tcp\n    ports:\n      - \"8080:80\"\n"
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].before.as_deref(), Some("- \"8080:80\""));
        assert_eq!(items[0].after.as_deref(), Some("- \"80\""));
    }

    #[test]
    fn test_expose_items_at_key_indent() {
        let content = "services:\n  web:\n    expose:\n    - \"8080:80\"\n    - 3306\n    image: nginx\n";
        let (fixed, items) = fix_compose_expose(content, "docker-compose.yml");

        assert_eq!(
            fixed,
            "services:\n  web:\n    expose:\n    - \"80\"\n    - 3306\n    image: nginx\n"
        );
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_expose_inline_list() {
        let content = "    expose: [\"8080:80\", \"443\"]\n";
        let (fixed, items) = fix_compose_expose(content, "docker-compose.yml");
        assert_eq!(fixed, "    expose: [\"80\", \"443\"]\n");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_valid_expose_untouched() {
        let content = "services:\n  web:\n    expose:\n      - \"80\"\n";
        let (fixed, items) = fix_compose_expose(content, "docker-compose.yml");
        assert_eq!(fixed, content);
        assert!(items.is_empty());
    }
}
