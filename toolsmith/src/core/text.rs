//! Text helpers for generated responses, tool names and command lines.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

static WHOLE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?```$").unwrap()
});

static INNER_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());

/// Remove markdown code fences from a model response.
///
/// A response that is entirely one fenced block yields the block body. A
/// response with prose around a fenced block yields the first block body.
/// Anything else is returned trimmed.
pub fn strip_markdown_fences(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(caps) = WHOLE_FENCE_RE.captures(trimmed) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = INNER_FENCE_RE.captures(trimmed) {
        return caps[1].trim().to_string();
    }
    trimmed.to_string()
}

/// Whether cleaned code still carries an interpreter stack trace.
pub fn contains_traceback(code: &str) -> bool {
    code.contains("Traceback")
}

/// Keep ASCII alphanumerics, `_` and `-`; drop everything else.
pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Split a command line into program and arguments.
///
/// Whitespace separates words; single quotes preserve everything literally,
/// double quotes allow `\"` and `\\` escapes, and a backslash outside quotes
/// escapes the next character.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => bail!("unterminated single quote in `{line}`"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => bail!("unterminated double quote in `{line}`"),
                        },
                        Some(inner) => current.push(inner),
                        None => bail!("unterminated double quote in `{line}`"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => bail!("trailing backslash in `{line}`"),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_language_tagged_fence() {
        let response = "```python\nprint('hi')\n```";
        assert_eq!(strip_markdown_fences(response), "print('hi')");
    }

    #[test]
    fn strips_bare_fence_and_whitespace() {
        let response = "  ```\n[1, 2]\n```  \n";
        assert_eq!(strip_markdown_fences(response), "[1, 2]");
    }

    #[test]
    fn extracts_fenced_block_from_prose() {
        let response = "Here is the plan:\n```json\n[]\n```\nGood luck.";
        assert_eq!(strip_markdown_fences(response), "[]");
    }

    #[test]
    fn unfenced_text_is_trimmed_only() {
        assert_eq!(strip_markdown_fences("\nimport os\n"), "import os");
    }

    #[test]
    fn detects_traceback_marker() {
        assert!(contains_traceback(
            "Traceback (most recent call last):\n  File \"x.py\""
        ));
        assert!(!contains_traceback("print('ok')"));
    }

    #[test]
    fn sanitize_drops_disallowed_characters() {
        assert_eq!(sanitize_tool_name("list text-files!.py"), "listtext-filespy");
        assert_eq!(sanitize_tool_name("我的工具"), "");
        assert_eq!(sanitize_tool_name("disk_usage"), "disk_usage");
    }

    #[test]
    fn split_handles_quotes_and_escapes() {
        let words = split_command_line(r#"pip install --upgrade "certifi>=2024" 'a b' c\ d"#)
            .expect("split");
        assert_eq!(
            words,
            vec!["pip", "install", "--upgrade", "certifi>=2024", "a b", "c d"]
        );
    }

    #[test]
    fn split_keeps_empty_quoted_word() {
        let words = split_command_line(r#"echo "" x"#).expect("split");
        assert_eq!(words, vec!["echo", "", "x"]);
    }

    #[test]
    fn split_rejects_unbalanced_quotes() {
        let err = split_command_line("echo 'oops").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
        assert!(split_command_line("   ").expect("split").is_empty());
    }
}
